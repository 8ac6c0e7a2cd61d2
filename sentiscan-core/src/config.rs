//! TOML configuration for searches, author discovery, sentiment analysis and
//! the full scan.
//!
//! Every section has defaults, so a minimal file only needs the parts that
//! differ. Enum-like values (`search_type`, `bucket`, `timeline_mode`) are
//! parsed strictly: an unknown value is a configuration error, never a silent
//! fallback.

use crate::error::ConfigError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const BEARER_TOKEN_ENV: &str = "SENTISCAN_BEARER_TOKEN";

/// Known search centres, as `lat,long`.
const NAMED_LOCATIONS: &[(&str, &str)] = &[
    ("darmstadt", "49.8728,8.6511"),
    ("frankfurt", "50.110924,8.682127"),
    ("newyork", "40.712776,-74.005974"),
    ("hannover", "52.3756631,9.7338833"),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub search: SearchConfig,
    pub get_user: GetUserConfig,
    pub analyze_sentiment: AnalyzeSentimentConfig,
    pub plot: PlotConfig,
    pub full_scan: FullScanConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub user_agent: String,
    /// Posts requested per page.
    pub page_size: u32,
    /// Sleep until the window resets instead of failing on HTTP 429.
    pub wait_on_rate_limit: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twitter.com/1.1".to_string(),
            bearer_token: None,
            user_agent: "sentiscan/0.1".to_string(),
            page_size: 100,
            wait_on_rate_limit: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub query: Vec<String>,
    /// Literal `lat,long,radius` geocode; wins over `location`.
    pub geocode: Option<String>,
    pub location: Option<String>,
    /// Radius in kilometres around `location`.
    pub radius: u32,
    /// Upper bound on posts pulled from one search.
    pub max_searches: usize,
    /// Upper bound on posts accepted by the filter.
    pub num_results: usize,
    /// Log rate-limit headers after each fetch.
    pub rate_limit: bool,
    pub filter: FilterConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            query: Vec::new(),
            geocode: None,
            location: None,
            radius: 100,
            max_searches: 1000,
            num_results: 100,
            rate_limit: true,
            filter: FilterConfig::default(),
        }
    }
}

impl SearchConfig {
    /// Terms joined into one query string.
    pub fn query_string(&self) -> String {
        self.query.join(" OR ")
    }

    pub fn resolved_geocode(&self) -> Result<Option<String>, ConfigError> {
        if let Some(geocode) = &self.geocode {
            return Ok(Some(geocode.clone()));
        }
        match &self.location {
            Some(location) => resolve_location(location, self.radius).map(Some),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Chronological cutoff: posts created before this instant end the walk.
    pub until: Option<DateTime<Utc>>,
    pub not_reply: bool,
    pub not_retweet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SearchType {
    RecentUser,
    RecentRetweetedUser,
}

impl FromStr for SearchType {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "recent_user" => Ok(SearchType::RecentUser),
            "recent_retweeted_user" => Ok(SearchType::RecentRetweetedUser),
            other => Err(ConfigError::InvalidValue {
                field: "get_user.search_type".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for SearchType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SearchType> for String {
    fn from(value: SearchType) -> Self {
        match value {
            SearchType::RecentUser => "recent_user".to_string(),
            SearchType::RecentRetweetedUser => "recent_retweeted_user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GetUserConfig {
    pub search_type: SearchType,
    pub num_users: usize,
    /// Apply the burst/recency qualification to each fresh author.
    pub good_user: bool,
    /// Remember author ids across calls within a session.
    pub unique_ids: bool,
    /// Posts pulled from an author's timeline for qualification.
    pub timeline_depth: usize,
    pub burst_posts: usize,
    pub max_inactive_days: i64,
}

impl Default for GetUserConfig {
    fn default() -> Self {
        Self {
            search_type: SearchType::RecentUser,
            num_users: 40,
            good_user: true,
            unique_ids: true,
            timeline_depth: 100,
            burst_posts: 5,
            max_inactive_days: 14,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzeSentimentConfig {
    /// Polarity above which a post counts as extremely positive.
    pub pos_boundary: f64,
    /// A post below the negated value counts as extremely negative.
    pub neg_boundary: f64,
    pub users_dir: PathBuf,
    /// Authors processed between two ledger flushes.
    pub flush_every: usize,
    /// Tab-separated `word<TAB>weight` lexicon; the built-in list is used when absent.
    pub lexicon_path: Option<PathBuf>,
}

impl Default for AnalyzeSentimentConfig {
    fn default() -> Self {
        Self {
            pos_boundary: 0.8,
            neg_boundary: 0.7,
            users_dir: PathBuf::from("saved_data/users"),
            flush_every: 100,
            lexicon_path: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BucketScheme {
    DayGroup,
    CalendarWeek,
}

impl FromStr for BucketScheme {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "day_group" => Ok(BucketScheme::DayGroup),
            "calendar_week" => Ok(BucketScheme::CalendarWeek),
            other => Err(ConfigError::InvalidValue {
                field: "plot.bucket".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for BucketScheme {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BucketScheme> for String {
    fn from(value: BucketScheme) -> Self {
        match value {
            BucketScheme::DayGroup => "day_group".to_string(),
            BucketScheme::CalendarWeek => "calendar_week".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotConfig {
    pub bucket: BucketScheme,
    /// Days per bucket for `day_group`.
    pub group_by: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Default for PlotConfig {
    fn default() -> Self {
        Self {
            bucket: BucketScheme::DayGroup,
            group_by: 3,
            start_date: NaiveDate::from_ymd_opt(2020, 3, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2020, 6, 26).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TimelineMode {
    /// Persist whatever the cutoff-bounded fetch returned.
    Bounded,
    /// Persist only timelines that walked back past the cutoff.
    CompleteUntil,
}

impl FromStr for TimelineMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bounded" => Ok(TimelineMode::Bounded),
            "complete_until" => Ok(TimelineMode::CompleteUntil),
            other => Err(ConfigError::InvalidValue {
                field: "full_scan.timeline_mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for TimelineMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimelineMode> for String {
    fn from(value: TimelineMode) -> Self {
        match value {
            TimelineMode::Bounded => "bounded".to_string(),
            TimelineMode::CompleteUntil => "complete_until".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FullScanConfig {
    pub active: bool,
    pub path: PathBuf,
    /// One partition per entry: a named location or a literal geocode.
    pub locations: Vec<String>,
    pub timeline_mode: TimelineMode,
    /// Upper bound on posts pulled from one author's timeline.
    pub max_timeline_searches: usize,
    /// Fetch timelines for ids recorded by an earlier run but never persisted.
    pub backfill_pending: bool,
}

impl Default for FullScanConfig {
    fn default() -> Self {
        Self {
            active: false,
            path: PathBuf::from("saved_data/full_scan"),
            locations: Vec::new(),
            timeline_mode: TimelineMode::Bounded,
            max_timeline_searches: 3200,
            backfill_pending: true,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound {
                path: path.display().to_string(),
            },
            std::io::ErrorKind::PermissionDenied => ConfigError::InvalidFormat {
                details: format!("{} is not readable", path.display()),
            },
            _ => ConfigError::InvalidFormat {
                details: e.to_string(),
            },
        })?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let boundaries = [
            ("analyze_sentiment.pos_boundary", self.analyze_sentiment.pos_boundary),
            ("analyze_sentiment.neg_boundary", self.analyze_sentiment.neg_boundary),
        ];
        for (field, value) in boundaries {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        if self.plot.group_by == 0 {
            return Err(ConfigError::InvalidValue {
                field: "plot.group_by".to_string(),
                value: "0".to_string(),
            });
        }
        if self.plot.start_date > self.plot.end_date {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "plot.start_date {} is after plot.end_date {}",
                    self.plot.start_date, self.plot.end_date
                ),
            });
        }
        if self.analyze_sentiment.flush_every == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analyze_sentiment.flush_every".to_string(),
                value: "0".to_string(),
            });
        }
        if self.full_scan.active && self.full_scan.locations.is_empty() {
            return Err(ConfigError::MissingField {
                field: "full_scan.locations".to_string(),
            });
        }
        Ok(())
    }

    /// Bearer token from the config file, falling back to the environment.
    pub fn bearer_token(&self) -> Result<String, ConfigError> {
        if let Some(token) = &self.api.bearer_token {
            return Ok(token.clone());
        }
        std::env::var(BEARER_TOKEN_ENV).map_err(|_| ConfigError::MissingEnvironmentVariable {
            var_name: BEARER_TOKEN_ENV.to_string(),
        })
    }

    /// Geocodes of the full-scan partitions, in partition order.
    pub fn partition_geocodes(&self) -> Result<Vec<String>, ConfigError> {
        self.full_scan
            .locations
            .iter()
            .map(|location| resolve_location(location, self.search.radius))
            .collect()
    }
}

/// Turns a named location or a literal `lat,long[,radius]` into a geocode.
pub fn resolve_location(location: &str, radius_km: u32) -> Result<String, ConfigError> {
    let key = location.trim().to_lowercase();
    if let Some((_, coords)) = NAMED_LOCATIONS.iter().find(|(name, _)| *name == key) {
        return Ok(format!("{},{}km", coords, radius_km));
    }

    let parts: Vec<&str> = location.split(',').map(str::trim).collect();
    let coords_ok = parts.len() >= 2 && parts[..2].iter().all(|p| p.parse::<f64>().is_ok());
    match parts.len() {
        2 if coords_ok => Ok(format!("{},{},{}km", parts[0], parts[1], radius_km)),
        3 if coords_ok => Ok(parts.join(",")),
        _ => Err(ConfigError::InvalidValue {
            field: "location".to_string(),
            value: location.to_string(),
        }),
    }
}
