//! Cache tags and invalidation
//!
//! Queries declare the tags they provide; change events and mutations mark
//! every query carrying a tag stale. Invalidation is per collection, never
//! per row.

pub mod dispatcher;
pub mod query;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use dispatcher::CacheInvalidator;
pub use query::{Fetcher, QueryCache};

/// Collection-level cache tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheTag {
    Content,
    Businesses,
    Users,
}

impl CacheTag {
    pub const ALL: [CacheTag; 3] = [CacheTag::Content, CacheTag::Businesses, CacheTag::Users];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTag::Content => "CONTENT",
            CacheTag::Businesses => "BUSINESSES",
            CacheTag::Users => "USERS",
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of invalidation signals, normally the [`QueryCache`]
pub trait InvalidationSink: Send + Sync {
    /// Mark every query carrying any of `tags` stale
    fn invalidate_tags(&self, tags: &[CacheTag]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_names() {
        assert_eq!(CacheTag::Content.to_string(), "CONTENT");
        assert_eq!(
            serde_json::to_string(&CacheTag::Businesses).unwrap(),
            "\"BUSINESSES\""
        );
        let tag: CacheTag = serde_json::from_str("\"USERS\"").unwrap();
        assert_eq!(tag, CacheTag::Users);
    }
}
