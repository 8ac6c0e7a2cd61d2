use chrono::{DateTime, Utc};
use sentiscan_core::{AppConfig, ConfigError, GetUserConfig, TimelineMode};
use tracing::warn;

/// Everything one scan run needs, resolved from the configuration up front so
/// a bad location or a missing cutoff fails before any network traffic.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub query: String,
    /// One entry per partition; `None` searches without a geocode.
    pub geocodes: Vec<Option<String>>,
    pub max_searches: usize,
    pub get_user: GetUserConfig,
    pub until: Option<DateTime<Utc>>,
    pub timeline_mode: TimelineMode,
    pub max_timeline_searches: usize,
    pub backfill_pending: bool,
    pub now: DateTime<Utc>,
}

impl ScanPlan {
    /// Partitions come from `full_scan.locations` when `full_scan.active` is
    /// set; otherwise the single search geocode (if any) forms partition 0.
    pub fn from_config(config: &AppConfig, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        let geocodes = if config.full_scan.active {
            config
                .partition_geocodes()?
                .into_iter()
                .map(Some)
                .collect()
        } else {
            if !config.full_scan.locations.is_empty() {
                warn!(
                    "full_scan.active is off; ignoring {} configured locations",
                    config.full_scan.locations.len()
                );
            }
            vec![config.search.resolved_geocode()?]
        };

        let plan = Self {
            query: config.search.query_string(),
            geocodes,
            max_searches: config.search.max_searches,
            get_user: config.get_user.clone(),
            until: config.search.filter.until,
            timeline_mode: config.full_scan.timeline_mode,
            max_timeline_searches: config.full_scan.max_timeline_searches,
            backfill_pending: config.full_scan.backfill_pending,
            now,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeline_mode == TimelineMode::CompleteUntil && self.until.is_none() {
            return Err(ConfigError::MissingField {
                field: "search.filter.until".to_string(),
            });
        }
        if self.query.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "search.query".to_string(),
            });
        }
        Ok(())
    }

    pub fn partitions(&self) -> usize {
        self.geocodes.len()
    }
}
