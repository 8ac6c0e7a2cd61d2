use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Platform-assigned author identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl AuthorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Reference to another post, e.g. the original of a retweet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: String,
    pub author_id: AuthorId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: AuthorId,
    pub created_at: DateTime<Utc>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retweeted_from: Option<PostRef>,
    #[serde(default)]
    pub hashtags: BTreeSet<String>,
}

impl Post {
    pub fn is_reply(&self) -> bool {
        self.in_reply_to_id.is_some()
    }

    pub fn is_retweet(&self) -> bool {
        self.retweeted_from.is_some()
    }

    /// Neither a reply nor a retweet.
    pub fn is_original(&self) -> bool {
        !self.is_reply() && !self.is_retweet()
    }

    /// Whole days elapsed between creation and `now`.
    pub fn age_in_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Three-way sentiment label. For cached extreme classifications `Pos`/`Neg`
/// mean "extremely positive/negative" and everything else is `Neut`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Pos,
    Neg,
    Neut,
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SentimentLabel::Pos => "pos",
            SentimentLabel::Neg => "neg",
            SentimentLabel::Neut => "neut",
        };
        f.write_str(label)
    }
}
