//! Shared types for fanout

mod error;

pub use error::{FanoutError, Result};
