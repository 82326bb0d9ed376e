//! Canonical topic naming
//!
//! Pure mapping from domain entity references to broker topic strings.
//! Topic strings are a wire contract shared with the mobile clients and the
//! broker's auth plugin — changing a prefix is a breaking change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix for per-request chat topics
pub const REQUEST_PREFIX: &str = "mufield/requests";
/// Prefix for per-friendship chat topics
pub const FRIENDSHIP_PREFIX: &str = "mufield/friendships";
/// Prefix for per-group chat topics
pub const GROUP_PREFIX: &str = "mufield/groups";
/// Prefix for per-user post topics; also the site-wide broadcast topic
pub const POST_PREFIX: &str = "mufield/posts";
/// Prefix for per-user system feed topics
pub const USER_FEED_PREFIX: &str = "sys/twist/feeds";
/// Fixed topic for the daily featured tracks (published retained)
pub const DAILY_TRACK_TOPIC: &str = "sys/twist/music";

/// Closed set of topic categories
///
/// Adding a category is a compile-time-checked change: every match over
/// this enum is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicCategory {
    /// Pending friend-request chat, keyed by request id
    Request,
    /// Confirmed friendship chat, keyed by friendship id
    Friendship,
    /// Group chat, keyed by group id
    Group,
    /// A user's posts, keyed by the owning user id
    Post,
    /// A user's system feed, keyed by user id
    UserFeed,
}

impl TopicCategory {
    /// Topic prefix for this category
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Request => REQUEST_PREFIX,
            Self::Friendship => FRIENDSHIP_PREFIX,
            Self::Group => GROUP_PREFIX,
            Self::Post => POST_PREFIX,
            Self::UserFeed => USER_FEED_PREFIX,
        }
    }
}

impl fmt::Display for TopicCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "request",
            Self::Friendship => "friendship",
            Self::Group => "group",
            Self::Post => "post",
            Self::UserFeed => "user_feed",
        };
        f.write_str(name)
    }
}

/// Canonical topic string for an entity within a category
///
/// Same id always yields the same topic; distinct prefixes guarantee no
/// collisions across categories.
pub fn topic(category: TopicCategory, entity_id: &str) -> String {
    format!("{}/{}", category.prefix(), entity_id)
}

/// Site-wide post broadcast topic (wildcard principal gets read access)
pub fn post_broadcast_topic() -> &'static str {
    POST_PREFIX
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_id_same_topic() {
        assert_eq!(
            topic(TopicCategory::Group, "42"),
            topic(TopicCategory::Group, "42")
        );
    }

    #[test]
    fn test_distinct_ids_distinct_topics() {
        assert_ne!(
            topic(TopicCategory::Friendship, "1"),
            topic(TopicCategory::Friendship, "2")
        );
    }

    #[test]
    fn test_no_cross_category_collision() {
        let categories = [
            TopicCategory::Request,
            TopicCategory::Friendship,
            TopicCategory::Group,
            TopicCategory::Post,
            TopicCategory::UserFeed,
        ];
        for a in &categories {
            for b in &categories {
                if a != b {
                    assert_ne!(topic(*a, "7"), topic(*b, "7"));
                }
            }
        }
    }

    #[test]
    fn test_canonical_strings() {
        assert_eq!(topic(TopicCategory::Request, "9"), "mufield/requests/9");
        assert_eq!(topic(TopicCategory::UserFeed, "u1"), "sys/twist/feeds/u1");
        assert_eq!(post_broadcast_topic(), "mufield/posts");
        assert_eq!(DAILY_TRACK_TOPIC, "sys/twist/music");
    }

    #[test]
    fn test_prefix_is_a_proper_prefix() {
        for c in [
            TopicCategory::Request,
            TopicCategory::Friendship,
            TopicCategory::Group,
            TopicCategory::Post,
            TopicCategory::UserFeed,
        ] {
            assert!(topic(c, "x").starts_with(c.prefix()));
        }
    }
}
