use crate::metrics::{ApiMetrics, MetricsCollector, RequestMetrics};
use crate::rate_limiter::{RateLimitConfig, RateLimitReport, RateLimitStatus, RateLimiter, API_WINDOW};
use crate::source::{PostLookup, PostProvider, PostSource, SearchQuery};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use sentiscan_core::{
    retry_with_backoff, ApiConfig, AuthorId, CoreError, Post, PostRef, SearchApiError,
};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

#[derive(Debug, Clone, Deserialize)]
pub struct RawStatus {
    pub id_str: String,
    pub created_at: String,
    #[serde(default)]
    pub full_text: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    pub user: RawUser,
    #[serde(default)]
    pub in_reply_to_status_id_str: Option<String>,
    #[serde(default)]
    pub retweeted_status: Option<Box<RawStatus>>,
    #[serde(default)]
    pub entities: RawEntities,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id_str: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntities {
    #[serde(default)]
    pub hashtags: Vec<RawHashtag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawHashtag {
    pub text: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    statuses: Vec<RawStatus>,
}

fn parse_created_at(raw: &str) -> Result<DateTime<Utc>, SearchApiError> {
    DateTime::parse_from_str(raw, CREATED_AT_FORMAT)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|e| SearchApiError::InvalidResponse {
            details: format!("bad created_at '{}': {}", raw, e),
        })
}

impl TryFrom<RawStatus> for Post {
    type Error = SearchApiError;

    fn try_from(status: RawStatus) -> Result<Self, Self::Error> {
        let created_at = parse_created_at(&status.created_at)?;
        let retweeted_from = status.retweeted_status.map(|original| PostRef {
            id: original.id_str,
            author_id: AuthorId::new(original.user.id_str),
        });

        Ok(Post {
            id: status.id_str,
            author_id: AuthorId::new(status.user.id_str),
            created_at,
            text: status.full_text.or(status.text).unwrap_or_default(),
            in_reply_to_id: status.in_reply_to_status_id_str,
            retweeted_from,
            hashtags: status
                .entities
                .hashtags
                .into_iter()
                .map(|tag| tag.text)
                .collect(),
        })
    }
}

/// The three v1.1 endpoints the harvester touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Search,
    UserTimeline(AuthorId),
    Show(String),
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Search => "/search/tweets.json",
            Endpoint::UserTimeline(_) => "/statuses/user_timeline.json",
            Endpoint::Show(_) => "/statuses/show.json",
        }
    }

    fn not_found(&self) -> SearchApiError {
        match self {
            Endpoint::UserTimeline(author) => SearchApiError::AuthorNotFound {
                author_id: author.to_string(),
            },
            Endpoint::Show(post_id) => SearchApiError::PostNotFound {
                post_id: post_id.clone(),
            },
            Endpoint::Search => SearchApiError::InvalidResponse {
                details: "search endpoint not found".to_string(),
            },
        }
    }
}

#[derive(Debug)]
struct Limiters {
    search: RateLimiter,
    timeline: RateLimiter,
    lookup: RateLimiter,
}

impl Limiters {
    fn for_endpoint(&self, endpoint: &Endpoint) -> &RateLimiter {
        match endpoint {
            Endpoint::Search => &self.search,
            Endpoint::UserTimeline(_) => &self.timeline,
            Endpoint::Show(_) => &self.lookup,
        }
    }
}

/// HTTP client for the v1.1 REST API using app-only bearer auth.
///
/// Cloning is cheap; clones share rate limiters and metrics.
#[derive(Debug, Clone)]
pub struct SearchApiClient {
    http_client: Client,
    base_url: String,
    bearer_token: String,
    page_size: u32,
    wait_on_rate_limit: bool,
    report_rate_limit: bool,
    limiters: Arc<Limiters>,
    metrics: Arc<MetricsCollector>,
}

impl SearchApiClient {
    pub fn new(
        config: &ApiConfig,
        bearer_token: String,
        report_rate_limit: bool,
    ) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(30))
            .build()?;

        let wait = config.wait_on_rate_limit;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token,
            page_size: config.page_size.clamp(1, 200),
            wait_on_rate_limit: wait,
            report_rate_limit,
            limiters: Arc::new(Limiters {
                search: RateLimiter::new(RateLimitConfig::search(), wait),
                timeline: RateLimiter::new(RateLimitConfig::user_timeline(), wait),
                lookup: RateLimiter::new(RateLimitConfig::lookup(), wait),
            }),
            metrics: Arc::new(MetricsCollector::new()),
        })
    }

    /// Sends one request, retrying transient failures (and 429s when
    /// `wait_on_rate_limit` is set).
    pub async fn make_request(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, String)],
    ) -> Result<Response, CoreError> {
        let max_retries = if self.wait_on_rate_limit { 3 } else { 0 };
        let max_delay = if self.wait_on_rate_limit {
            API_WINDOW
        } else {
            Duration::from_secs(30)
        };
        let client = self;
        retry_with_backoff(
            move || client.send_once(endpoint, query_params),
            max_retries,
            Duration::from_secs(1),
            max_delay,
        )
        .await
    }

    async fn send_once(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, String)],
    ) -> Result<Response, CoreError> {
        let limiter = self.limiters.for_endpoint(endpoint);
        let waited = limiter.acquire().await.map_err(CoreError::SearchApi)?;
        if !waited.is_zero() {
            debug!("Waited {:?} before {}", waited, endpoint.path());
        }

        let url = format!("{}{}", self.base_url, endpoint.path());
        let start_time = Instant::now();
        debug!("GET {}", endpoint.path());

        let result = self
            .http_client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(query_params)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!("Network error for {}: {}", endpoint.path(), e);
                self.record(endpoint, None, start_time, false, false).await;
                return Err(if e.is_timeout() {
                    CoreError::SearchApi(SearchApiError::RequestTimeout)
                } else {
                    CoreError::Network(e)
                });
            }
        };

        let report = RateLimitReport::from_headers(response.headers());
        if let Some(report) = &report {
            limiter.record_report(report.clone()).await;
            self.metrics.record_rate_limit(report.clone()).await;
        }

        let status = response.status();
        let rate_limited = status.as_u16() == 429;
        self.record(
            endpoint,
            Some(status.as_u16()),
            start_time,
            status.is_success(),
            rate_limited,
        )
        .await;

        if status.is_success() {
            return Ok(response);
        }

        warn!("Request to {} failed with status {}", endpoint.path(), status);
        let api_error = match status.as_u16() {
            429 => {
                limiter.record_rate_limited().await;
                let retry_after = report
                    .map(|report| report.time_until_reset(Utc::now()).as_secs())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(60);
                SearchApiError::RateLimitExceeded { retry_after }
            }
            400 | 401 => SearchApiError::InvalidToken,
            403 => SearchApiError::Forbidden {
                resource: endpoint.path().to_string(),
            },
            404 => endpoint.not_found(),
            code if status.is_server_error() => SearchApiError::ServerError { status_code: code },
            code => SearchApiError::InvalidResponse {
                details: format!("unexpected status {}", code),
            },
        };
        Err(CoreError::SearchApi(api_error))
    }

    async fn record(
        &self,
        endpoint: &Endpoint,
        status_code: Option<u16>,
        start_time: Instant,
        success: bool,
        rate_limited: bool,
    ) {
        self.metrics
            .record_request(RequestMetrics {
                endpoint: endpoint.path().to_string(),
                status_code,
                response_time: start_time.elapsed(),
                success,
                rate_limited,
            })
            .await;
    }

    async fn get_statuses(
        &self,
        endpoint: &Endpoint,
        query_params: &[(&str, String)],
    ) -> Result<Vec<Post>, CoreError> {
        let response = self.make_request(endpoint, query_params).await?;
        let body = response.text().await?;

        let raw: Vec<RawStatus> = match endpoint {
            Endpoint::Search => serde_json::from_str::<SearchResponse>(&body)
                .map(|page| page.statuses)
                .map_err(|e| invalid_body(endpoint, e))?,
            Endpoint::UserTimeline(_) => {
                serde_json::from_str(&body).map_err(|e| invalid_body(endpoint, e))?
            }
            Endpoint::Show(_) => {
                vec![serde_json::from_str(&body).map_err(|e| invalid_body(endpoint, e))?]
            }
        };

        raw.into_iter()
            .map(|status| Post::try_from(status).map_err(CoreError::SearchApi))
            .collect()
    }

    pub async fn get_metrics(&self) -> ApiMetrics {
        self.metrics.get_metrics().await
    }

    /// Client-side view of the search endpoint budget.
    pub async fn get_rate_limit_status(&self) -> RateLimitStatus {
        self.limiters.search.status().await
    }
}

fn invalid_body(endpoint: &Endpoint, e: serde_json::Error) -> CoreError {
    error!("Failed to parse {} response: {}", endpoint.path(), e);
    CoreError::SearchApi(SearchApiError::InvalidResponse {
        details: format!("unparseable {} body", endpoint.path()),
    })
}

impl PostProvider for SearchApiClient {
    type Source = ApiPostSource;

    fn search(&self, query: &SearchQuery) -> ApiPostSource {
        let mut params = vec![
            ("q", query.query.clone()),
            ("result_type", "recent".to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        if let Some(geocode) = &query.geocode {
            params.push(("geocode", geocode.clone()));
        }
        ApiPostSource::new(self.clone(), Endpoint::Search, params, query.max_items)
    }

    fn user_timeline(&self, author: &AuthorId, max_items: usize) -> ApiPostSource {
        let params = vec![
            ("user_id", author.to_string()),
            ("include_rts", "true".to_string()),
            ("exclude_replies", "false".to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        ApiPostSource::new(
            self.clone(),
            Endpoint::UserTimeline(author.clone()),
            params,
            max_items,
        )
    }
}

impl PostLookup for SearchApiClient {
    async fn lookup_post(&self, post_id: &str) -> Result<Post, CoreError> {
        let endpoint = Endpoint::Show(post_id.to_string());
        let params = [
            ("id", post_id.to_string()),
            ("tweet_mode", "extended".to_string()),
        ];
        let mut posts = self.get_statuses(&endpoint, &params).await?;
        posts.pop().ok_or_else(|| {
            CoreError::SearchApi(SearchApiError::PostNotFound {
                post_id: post_id.to_string(),
            })
        })
    }
}

/// Pages through a search or timeline with `max_id`, newest first. Nothing is
/// requested until the first pull.
#[derive(Debug)]
pub struct ApiPostSource {
    client: SearchApiClient,
    endpoint: Endpoint,
    params: Vec<(&'static str, String)>,
    buffer: VecDeque<Post>,
    max_id: Option<u64>,
    yielded: usize,
    max_items: usize,
    exhausted: bool,
}

impl ApiPostSource {
    fn new(
        client: SearchApiClient,
        endpoint: Endpoint,
        params: Vec<(&'static str, String)>,
        max_items: usize,
    ) -> Self {
        Self {
            client,
            endpoint,
            params,
            buffer: VecDeque::new(),
            max_id: None,
            yielded: 0,
            max_items,
            exhausted: false,
        }
    }

    async fn fetch_page(&mut self) -> Result<(), CoreError> {
        let remaining = self.max_items - self.yielded;
        let count = remaining.min(self.client.page_size as usize);

        let mut params = self.params.clone();
        params.push(("count", count.to_string()));
        if let Some(max_id) = self.max_id {
            params.push(("max_id", max_id.to_string()));
        }

        let page = self.client.get_statuses(&self.endpoint, &params).await?;
        debug!("{} returned {} posts", self.endpoint.path(), page.len());

        let oldest = page.iter().filter_map(|post| post.id.parse::<u64>().ok()).min();
        match oldest {
            Some(oldest) if oldest > 0 => self.max_id = Some(oldest - 1),
            _ => self.exhausted = true,
        }
        if page.is_empty() {
            self.exhausted = true;
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl PostSource for ApiPostSource {
    async fn next_post(&mut self) -> Result<Option<Post>, CoreError> {
        if self.yielded >= self.max_items {
            return Ok(None);
        }
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        let next = self.buffer.pop_front();
        if next.is_some() {
            self.yielded += 1;
        }
        Ok(next)
    }

    async fn report_checked(&mut self, operation: &str, checked_count: usize) {
        self.client
            .metrics
            .record_checked(operation, checked_count)
            .await;

        if !self.client.report_rate_limit {
            return;
        }
        let limiter = self.client.limiters.for_endpoint(&self.endpoint);
        match limiter.last_report().await {
            Some(report) => info!(
                "{}: checked {} posts; {} requests (~{} posts) left, resets at {}",
                operation,
                checked_count,
                report.remaining,
                report.posts_remaining(self.client.page_size as usize),
                report.reset_at
            ),
            None => info!("{}: checked {} posts", operation, checked_count),
        }
    }
}
