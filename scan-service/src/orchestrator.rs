use crate::plan::ScanPlan;
use crate::state::ScanState;
use search_client::{fetch, FetchStatus, PostFilter, PostProvider, SearchQuery, UserDiscovery};
use sentiscan_core::{AuthorId, CoreError, ErrorExt, TimelineMode};
use serde::Serialize;
use std::collections::HashSet;
use timeline_store::{PersistOutcome, ScanStorage};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    /// Fresh authors found, indexed by partition.
    pub discovered_per_partition: Vec<usize>,
    pub failed_partitions: Vec<usize>,
    pub persisted: usize,
    pub skipped_existing: usize,
    /// `complete_until` timelines that never reached the cutoff.
    pub incomplete: usize,
    pub failed: usize,
    /// Timelines persisted for ids left behind by an earlier run.
    pub backfilled: usize,
    /// Posts pulled from the provider, discovery and timelines combined.
    pub posts_checked: usize,
}

impl ScanReport {
    pub fn discovered(&self) -> usize {
        self.discovered_per_partition.iter().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Harvest {
    Persisted,
    SkippedExisting,
    Incomplete,
    Failed,
}

pub struct ScanOrchestrator<P: PostProvider> {
    storage: ScanStorage,
    provider: P,
    plan: ScanPlan,
    state: ScanState,
    /// Partition/author pairs already harvested (or attempted) in this session.
    attempted: HashSet<(usize, AuthorId)>,
}

impl<P: PostProvider> ScanOrchestrator<P> {
    /// Rebuilds the scan state from the author files on disk.
    pub async fn resume(storage: ScanStorage, provider: P, plan: ScanPlan) -> Result<Self, CoreError> {
        plan.validate()?;
        let state = ScanState::load(&storage, plan.partitions()).await?;
        info!(
            "Resuming scan in {} with {} known authors over {} partitions",
            storage.root().display(),
            state.len(),
            plan.partitions()
        );
        Ok(Self {
            storage,
            provider,
            plan,
            state,
            attempted: HashSet::new(),
        })
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn into_state(self) -> ScanState {
        self.state
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    pub async fn run(&mut self) -> Result<ScanReport, CoreError> {
        let mut report = ScanReport::default();
        let mut fresh_by_partition = Vec::with_capacity(self.plan.partitions());

        for partition in 0..self.plan.partitions() {
            let fresh = match self.discover_partition(partition, &mut report).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    e.log_warn();
                    warn!("Partition {} contributes no authors this run", partition);
                    report.failed_partitions.push(partition);
                    Vec::new()
                }
            };
            report.discovered_per_partition.push(fresh.len());
            self.storage.append_author_ids(partition, &fresh).await?;
            fresh_by_partition.push(fresh);
        }

        for (partition, fresh) in fresh_by_partition.iter().enumerate() {
            for author in fresh {
                let outcome = self.harvest(partition, author, &mut report).await;
                report.tally(outcome);
            }
        }

        if self.plan.backfill_pending {
            let pending = self.backfill_pending().await?;
            report.absorb(pending);
        }

        info!(
            "Scan finished: {} new authors, {} timelines persisted, {} skipped, {} incomplete, {} failed",
            report.discovered(),
            report.persisted,
            report.skipped_existing,
            report.incomplete,
            report.failed
        );
        Ok(report)
    }

    async fn discover_partition(
        &mut self,
        partition: usize,
        report: &mut ScanReport,
    ) -> Result<Vec<AuthorId>, CoreError> {
        let geocode = self.plan.geocodes[partition].clone();
        let query = SearchQuery::new(self.plan.query.clone(), geocode, self.plan.max_searches);
        debug!("Discovering authors for partition {} ({:?})", partition, query.geocode);

        // Without session-wide ids only the partition's own file counts as seen.
        let already_seen = if self.plan.get_user.unique_ids {
            self.state.authors().clone()
        } else {
            self.storage
                .load_author_ids(partition)
                .await?
                .into_iter()
                .collect()
        };

        let discovery = UserDiscovery::from_config(&self.provider, &self.plan.get_user, self.plan.now);
        let mut source = self.provider.search(&query);
        let outcome = discovery
            .discover(&mut source, self.plan.get_user.num_users, &already_seen)
            .await?;
        report.posts_checked += outcome.checked_count;

        for author in &outcome.authors {
            self.state.insert(author.clone());
        }
        info!(
            "Partition {}: {} new authors",
            partition,
            outcome.authors.len()
        );
        Ok(outcome.authors)
    }

    async fn harvest(&mut self, partition: usize, author: &AuthorId, report: &mut ScanReport) -> Harvest {
        if !self.attempted.insert((partition, author.clone())) {
            return Harvest::SkippedExisting;
        }
        match self.harvest_timeline(partition, author, report).await {
            Ok(outcome) => outcome,
            Err(e) => {
                e.log_warn();
                warn!("Skipping timeline of {} in partition {}", author, partition);
                Harvest::Failed
            }
        }
    }

    async fn harvest_timeline(
        &self,
        partition: usize,
        author: &AuthorId,
        report: &mut ScanReport,
    ) -> Result<Harvest, CoreError> {
        if self.storage.timeline_exists(partition, author).await? {
            debug!("Timeline of {} already on disk", author);
            return Ok(Harvest::SkippedExisting);
        }

        let filter = PostFilter::until(self.plan.until);
        let mut source = self
            .provider
            .user_timeline(author, self.plan.max_timeline_searches);
        let outcome = fetch(
            &mut source,
            |post| filter.evaluate(post),
            self.plan.max_timeline_searches,
            "timeline",
        )
        .await?;
        report.posts_checked += outcome.checked_count;

        if self.plan.timeline_mode == TimelineMode::CompleteUntil
            && outcome.status != FetchStatus::BoundaryReached
        {
            warn!(
                "Timeline of {} ended {:?} before the cutoff; not persisted",
                author, outcome.status
            );
            return Ok(Harvest::Incomplete);
        }

        match self
            .storage
            .write_timeline(partition, author, &outcome.posts)
            .await?
        {
            PersistOutcome::Written => Ok(Harvest::Persisted),
            PersistOutcome::AlreadyExists => Ok(Harvest::SkippedExisting),
        }
    }

    /// Harvests timelines for ids recorded in the author files but missing on
    /// disk, e.g. after a run that stopped between the two steps.
    pub async fn backfill_pending(&mut self) -> Result<ScanReport, CoreError> {
        let mut report = ScanReport::default();
        for partition in 0..self.plan.partitions() {
            let mut recorded = HashSet::new();
            for author in self.storage.load_author_ids(partition).await? {
                if !recorded.insert(author.clone())
                    || self.attempted.contains(&(partition, author.clone()))
                    || self.storage.timeline_exists(partition, &author).await?
                {
                    continue;
                }
                let outcome = self.harvest(partition, &author, &mut report).await;
                if outcome == Harvest::Persisted {
                    report.backfilled += 1;
                }
                report.tally(outcome);
            }
        }
        if report.backfilled > 0 {
            info!("Backfilled {} pending timelines", report.backfilled);
        }
        Ok(report)
    }
}

impl ScanReport {
    fn tally(&mut self, outcome: Harvest) {
        match outcome {
            Harvest::Persisted => self.persisted += 1,
            Harvest::SkippedExisting => self.skipped_existing += 1,
            Harvest::Incomplete => self.incomplete += 1,
            Harvest::Failed => self.failed += 1,
        }
    }

    fn absorb(&mut self, other: ScanReport) {
        self.persisted += other.persisted;
        self.skipped_existing += other.skipped_existing;
        self.incomplete += other.incomplete;
        self.failed += other.failed;
        self.backfilled += other.backfilled;
        self.posts_checked += other.posts_checked;
    }
}
