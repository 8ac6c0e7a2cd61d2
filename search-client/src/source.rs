use sentiscan_core::{AuthorId, CoreError, Post};

/// Lazy, pull-based stream of posts. Each pull may cost a network round-trip
/// and rate-limit budget; nothing is requested before the first pull.
///
/// Sources yield posts newest first.
pub trait PostSource {
    /// Next post, or `Ok(None)` once the source is exhausted.
    async fn next_post(&mut self) -> Result<Option<Post>, CoreError>;

    /// Called once per completed fetch with the number of posts pulled, for
    /// rate-limit accounting.
    async fn report_checked(&mut self, _operation: &str, _checked_count: usize) {}
}

/// Parameters of one search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub query: String,
    pub geocode: Option<String>,
    /// Hard cap on posts the source will yield.
    pub max_items: usize,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, geocode: Option<String>, max_items: usize) -> Self {
        Self {
            query: query.into(),
            geocode,
            max_items,
        }
    }
}

/// Factory for post sources: keyword/geography searches and author timelines.
pub trait PostProvider {
    type Source: PostSource;

    fn search(&self, query: &SearchQuery) -> Self::Source;

    /// An author's own posts, newest first, capped at `max_items`.
    fn user_timeline(&self, author: &AuthorId, max_items: usize) -> Self::Source;
}

/// Single-post lookup by id.
pub trait PostLookup {
    async fn lookup_post(&self, post_id: &str) -> Result<Post, CoreError>;
}
