//! In-memory post provider for replaying saved data and for tests.

use crate::source::{PostLookup, PostProvider, PostSource, SearchQuery};
use sentiscan_core::{AuthorId, CoreError, Post, SearchApiError};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
struct PullCounters {
    search: AtomicUsize,
    timeline: AtomicUsize,
    reported_checked: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Search,
    Timeline,
    Detached,
}

/// Source over a fixed list of posts. Every `next_post` call counts as a pull.
#[derive(Debug)]
pub struct VecSource {
    posts: VecDeque<Post>,
    failure: Option<SearchApiError>,
    kind: SourceKind,
    pulls: usize,
    counters: Arc<PullCounters>,
}

impl VecSource {
    pub fn new(posts: Vec<Post>) -> Self {
        Self {
            posts: posts.into(),
            failure: None,
            kind: SourceKind::Detached,
            pulls: 0,
            counters: Arc::default(),
        }
    }

    /// Pulls made on this source.
    pub fn pulls(&self) -> usize {
        self.pulls
    }
}

impl PostSource for VecSource {
    async fn next_post(&mut self) -> Result<Option<Post>, CoreError> {
        self.pulls += 1;
        match self.kind {
            SourceKind::Search => self.counters.search.fetch_add(1, Ordering::SeqCst),
            SourceKind::Timeline => self.counters.timeline.fetch_add(1, Ordering::SeqCst),
            SourceKind::Detached => 0,
        };

        if let Some(error) = &self.failure {
            return Err(CoreError::SearchApi(error.clone()));
        }
        Ok(self.posts.pop_front())
    }

    async fn report_checked(&mut self, _operation: &str, checked_count: usize) {
        self.counters
            .reported_checked
            .fetch_add(checked_count, Ordering::SeqCst);
    }
}

/// Serves canned search results (keyed by geocode) and author timelines.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    searches: HashMap<Option<String>, Vec<Post>>,
    timelines: HashMap<AuthorId, Vec<Post>>,
    failing_timelines: HashSet<AuthorId>,
    counters: Arc<PullCounters>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search_results(mut self, geocode: Option<&str>, posts: Vec<Post>) -> Self {
        self.searches.insert(geocode.map(str::to_string), posts);
        self
    }

    /// Timelines are served newest first regardless of insertion order.
    pub fn with_timeline(mut self, author: AuthorId, mut posts: Vec<Post>) -> Self {
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.timelines.insert(author, posts);
        self
    }

    /// Any pull on this author's timeline fails.
    pub fn with_failing_timeline(mut self, author: AuthorId) -> Self {
        self.failing_timelines.insert(author);
        self
    }

    pub fn search_pulls(&self) -> usize {
        self.counters.search.load(Ordering::SeqCst)
    }

    pub fn timeline_pulls(&self) -> usize {
        self.counters.timeline.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.search_pulls() + self.timeline_pulls()
    }

    /// Sum of `checked_count` reported by completed fetches.
    pub fn reported_checked(&self) -> usize {
        self.counters.reported_checked.load(Ordering::SeqCst)
    }

    fn source(&self, posts: Vec<Post>, kind: SourceKind) -> VecSource {
        VecSource {
            posts: posts.into(),
            failure: None,
            kind,
            pulls: 0,
            counters: Arc::clone(&self.counters),
        }
    }
}

impl PostProvider for InMemoryProvider {
    type Source = VecSource;

    fn search(&self, query: &SearchQuery) -> VecSource {
        let posts = self
            .searches
            .get(&query.geocode)
            .map(|posts| posts.iter().take(query.max_items).cloned().collect())
            .unwrap_or_default();
        self.source(posts, SourceKind::Search)
    }

    fn user_timeline(&self, author: &AuthorId, max_items: usize) -> VecSource {
        let posts = self
            .timelines
            .get(author)
            .map(|posts| posts.iter().take(max_items).cloned().collect())
            .unwrap_or_default();
        let mut source = self.source(posts, SourceKind::Timeline);
        if self.failing_timelines.contains(author) {
            source.failure = Some(SearchApiError::AuthorNotFound {
                author_id: author.to_string(),
            });
        }
        source
    }
}

impl PostLookup for InMemoryProvider {
    async fn lookup_post(&self, post_id: &str) -> Result<Post, CoreError> {
        self.searches
            .values()
            .chain(self.timelines.values())
            .flatten()
            .find(|post| post.id == post_id)
            .cloned()
            .ok_or_else(|| {
                CoreError::SearchApi(SearchApiError::PostNotFound {
                    post_id: post_id.to_string(),
                })
            })
    }
}
