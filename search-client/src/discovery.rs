use crate::fetcher::{fetch, PostFilter};
use crate::source::{PostProvider, PostSource};
use chrono::{DateTime, Duration, Utc};
use sentiscan_core::{AuthorId, CoreError, ErrorExt, GetUserConfig, Post, SearchType};
use std::collections::HashSet;
use tracing::{debug, info};

/// Burst/recency heuristic separating active human authors from bots and
/// dormant accounts.
#[derive(Debug, Clone)]
pub struct Qualifier {
    pub timeline_depth: usize,
    pub burst_posts: usize,
    pub max_inactive_days: i64,
    pub now: DateTime<Utc>,
}

impl Qualifier {
    pub fn new(config: &GetUserConfig, now: DateTime<Utc>) -> Self {
        Self {
            timeline_depth: config.timeline_depth,
            burst_posts: config.burst_posts,
            max_inactive_days: config.max_inactive_days,
            now,
        }
    }

    /// `originals` must be the author's own posts (no replies or retweets),
    /// newest first.
    pub fn judge(&self, originals: &[Post]) -> bool {
        let Some(latest) = originals.first() else {
            return false;
        };

        let burst_window = Duration::hours(24);
        if self.burst_posts > 0
            && originals.len() > self.burst_posts
            && originals[..self.burst_posts]
                .iter()
                .all(|post| self.now - post.created_at < burst_window)
        {
            return false;
        }

        latest.age_in_days(self.now) <= self.max_inactive_days
    }

    pub async fn is_qualified<P: PostProvider>(
        &self,
        provider: &P,
        author: &AuthorId,
    ) -> Result<bool, CoreError> {
        let mut source = provider.user_timeline(author, self.timeline_depth);
        let filter = PostFilter::originals_only();
        let outcome = fetch(
            &mut source,
            |post| filter.evaluate(post),
            self.timeline_depth,
            "qualify",
        )
        .await?;
        Ok(self.judge(&outcome.posts))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub authors: Vec<AuthorId>,
    pub checked_count: usize,
    pub disqualified: usize,
}

/// Extracts fresh author ids from a stream of posts.
pub struct UserDiscovery<'a, P: PostProvider> {
    provider: &'a P,
    search_type: SearchType,
    qualifier: Option<Qualifier>,
}

impl<'a, P: PostProvider> UserDiscovery<'a, P> {
    pub fn new(provider: &'a P, search_type: SearchType) -> Self {
        Self {
            provider,
            search_type,
            qualifier: None,
        }
    }

    pub fn with_qualifier(mut self, qualifier: Qualifier) -> Self {
        self.qualifier = Some(qualifier);
        self
    }

    pub fn from_config(provider: &'a P, config: &GetUserConfig, now: DateTime<Utc>) -> Self {
        let discovery = Self::new(provider, config.search_type);
        if config.good_user {
            discovery.with_qualifier(Qualifier::new(config, now))
        } else {
            discovery
        }
    }

    fn candidate(&self, post: &Post) -> Option<AuthorId> {
        match self.search_type {
            SearchType::RecentUser => Some(post.author_id.clone()),
            SearchType::RecentRetweetedUser => post
                .retweeted_from
                .as_ref()
                .map(|original| original.author_id.clone()),
        }
    }

    /// Collects up to `target_count` authors not in `already_seen`. The seen
    /// check runs before qualification so known authors cost no extra pulls.
    pub async fn discover<S: PostSource>(
        &self,
        source: &mut S,
        target_count: usize,
        already_seen: &HashSet<AuthorId>,
    ) -> Result<DiscoveryOutcome, CoreError> {
        let mut outcome = DiscoveryOutcome::default();
        let mut considered: HashSet<AuthorId> = HashSet::new();

        while outcome.authors.len() < target_count {
            let Some(post) = source.next_post().await? else {
                break;
            };
            outcome.checked_count += 1;

            let Some(author) = self.candidate(&post) else {
                continue;
            };
            if already_seen.contains(&author) || !considered.insert(author.clone()) {
                continue;
            }

            if let Some(qualifier) = &self.qualifier {
                match qualifier.is_qualified(self.provider, &author).await {
                    Ok(true) => {}
                    Ok(false) => {
                        debug!("Author {} did not qualify", author);
                        outcome.disqualified += 1;
                        continue;
                    }
                    Err(e) => {
                        e.log_warn();
                        debug!("Treating author {} as unqualified", author);
                        outcome.disqualified += 1;
                        continue;
                    }
                }
            }

            outcome.authors.push(author);
        }

        source
            .report_checked("discover", outcome.checked_count)
            .await;
        info!(
            "Discovered {} new authors ({} posts checked, {} disqualified)",
            outcome.authors.len(),
            outcome.checked_count,
            outcome.disqualified
        );
        Ok(outcome)
    }
}
