//! Draining a post source through a three-way filter.
//!
//! The filter may accept a post, reject it, or stop the walk altogether. Stop
//! is reserved for the chronological cutoff: sources are newest first, so the
//! first post older than the cutoff means every later post is too.

use crate::source::{PostLookup, PostProvider, PostSource, SearchQuery};
use chrono::{DateTime, Utc};
use sentiscan_core::{CoreError, ErrorExt, FilterConfig, Post, SearchConfig};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Accept,
    Reject,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// `target_count` posts were accepted.
    LimitReached,
    /// The filter signalled the chronological boundary.
    BoundaryReached,
    /// The source ran dry first.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub posts: Vec<Post>,
    pub status: FetchStatus,
    /// Posts pulled from the source, accepted or not.
    pub checked_count: usize,
}

impl FetchOutcome {
    pub fn accepted_count(&self) -> usize {
        self.posts.len()
    }
}

/// Cutoff, reply and retweet clauses. Only the cutoff can stop a walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostFilter {
    pub until: Option<DateTime<Utc>>,
    pub not_reply: bool,
    pub not_retweet: bool,
}

impl PostFilter {
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Rejects replies and retweets, never stops.
    pub fn originals_only() -> Self {
        Self {
            until: None,
            not_reply: true,
            not_retweet: true,
        }
    }

    /// Cutoff only: keeps replies and retweets.
    pub fn until(until: Option<DateTime<Utc>>) -> Self {
        Self {
            until,
            ..Self::default()
        }
    }

    pub fn evaluate(&self, post: &Post) -> FilterDecision {
        if let Some(until) = self.until {
            if post.created_at < until {
                return FilterDecision::Stop;
            }
        }
        if self.not_reply && post.is_reply() {
            return FilterDecision::Reject;
        }
        if self.not_retweet && post.is_retweet() {
            return FilterDecision::Reject;
        }
        FilterDecision::Accept
    }
}

impl From<&FilterConfig> for PostFilter {
    fn from(config: &FilterConfig) -> Self {
        Self {
            until: config.until,
            not_reply: config.not_reply,
            not_retweet: config.not_retweet,
        }
    }
}

/// Pulls posts one at a time until `target_count` are accepted, the predicate
/// returns [`FilterDecision::Stop`], or the source is exhausted.
pub async fn fetch<S, P>(
    source: &mut S,
    mut predicate: P,
    target_count: usize,
    operation: &str,
) -> Result<FetchOutcome, CoreError>
where
    S: PostSource,
    P: FnMut(&Post) -> FilterDecision,
{
    let mut posts = Vec::new();
    let mut checked_count = 0;

    let status = if target_count == 0 {
        FetchStatus::LimitReached
    } else {
        loop {
            let Some(post) = source.next_post().await? else {
                break FetchStatus::Exhausted;
            };
            checked_count += 1;

            match predicate(&post) {
                FilterDecision::Accept => {
                    posts.push(post);
                    if posts.len() == target_count {
                        break FetchStatus::LimitReached;
                    }
                }
                FilterDecision::Reject => {}
                FilterDecision::Stop => {
                    debug!("Boundary reached at post {} ({})", post.id, post.created_at);
                    break FetchStatus::BoundaryReached;
                }
            }
        }
    };

    debug!(
        "{}: checked {} posts, accepted {}, status {:?}",
        operation,
        checked_count,
        posts.len(),
        status
    );
    source.report_checked(operation, checked_count).await;

    Ok(FetchOutcome {
        posts,
        status,
        checked_count,
    })
}

/// Runs the configured search and returns the posts passing the configured
/// filter, bounded by `num_results`.
pub async fn fetch_posts<P: PostProvider>(
    provider: &P,
    search: &SearchConfig,
) -> Result<FetchOutcome, CoreError> {
    let query = SearchQuery::new(
        search.query_string(),
        search.resolved_geocode()?,
        search.max_searches,
    );
    let filter = PostFilter::from(&search.filter);
    let mut source = provider.search(&query);

    let outcome = fetch(
        &mut source,
        |post| filter.evaluate(post),
        search.num_results,
        "search",
    )
    .await?;
    info!(
        "Search '{}' returned {} posts ({} checked)",
        query.query,
        outcome.accepted_count(),
        outcome.checked_count
    );
    Ok(outcome)
}

/// Looks posts up one by one. A failing lookup (deleted or protected post) is
/// logged and the id dropped; the batch always completes.
pub async fn backfill<L: PostLookup>(lookup: &L, post_ids: &[String]) -> Vec<Post> {
    let mut posts = Vec::with_capacity(post_ids.len());
    for post_id in post_ids {
        match lookup.lookup_post(post_id).await {
            Ok(post) => posts.push(post),
            Err(e) => {
                e.log_warn();
                warn!("Dropping post {} from backfill", post_id);
            }
        }
    }
    info!("Backfilled {}/{} posts", posts.len(), post_ids.len());
    posts
}
