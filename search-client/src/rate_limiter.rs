use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use sentiscan_core::SearchApiError;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::time::sleep;

/// Budget windows of the v1.1 API are fifteen minutes long.
pub const API_WINDOW: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub time_window: Duration,
    pub burst_allowance: u32,
}

impl RateLimitConfig {
    /// `search/tweets` under app-only auth.
    pub fn search() -> Self {
        Self {
            max_requests: 450,
            time_window: API_WINDOW,
            burst_allowance: 15,
        }
    }

    /// `statuses/user_timeline` under app-only auth.
    pub fn user_timeline() -> Self {
        Self {
            max_requests: 1500,
            time_window: API_WINDOW,
            burst_allowance: 30,
        }
    }

    /// `statuses/show` under app-only auth.
    pub fn lookup() -> Self {
        Self {
            max_requests: 900,
            time_window: API_WINDOW,
            burst_allowance: 20,
        }
    }
}

/// Budget reported by the server in `x-rate-limit-*` response headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitReport {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitReport {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<i64>().ok())
        };

        let remaining = header("x-rate-limit-remaining")?;
        let reset_at = Utc.timestamp_opt(header("x-rate-limit-reset")?, 0).single()?;
        Some(Self {
            limit: header("x-rate-limit-limit").and_then(|v| u32::try_from(v).ok()),
            remaining: u32::try_from(remaining).unwrap_or(0),
            reset_at,
        })
    }

    /// Posts still obtainable in this window at `posts_per_request` per call.
    pub fn posts_remaining(&self, posts_per_request: usize) -> usize {
        self.remaining as usize * posts_per_request
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub fn time_until_reset(&self, now: DateTime<Utc>) -> Duration {
        (self.reset_at - now).to_std().unwrap_or_default()
    }
}

#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_rate: f64, // tokens per second
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst_allowance.max(1) as f64;
        let refill_rate = config.max_requests as f64 / config.time_window.as_secs_f64();

        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_rate,
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        state.last_refill = now;
    }

    /// Takes `tokens_needed` tokens, or returns how long until they exist.
    pub async fn acquire(&self, tokens_needed: f64) -> Result<(), Duration> {
        let mut state = self.state.lock().await;
        self.refill(&mut state);

        if state.tokens >= tokens_needed {
            state.tokens -= tokens_needed;
            Ok(())
        } else {
            let missing = tokens_needed - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_rate))
        }
    }

    pub async fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().await;
        self.refill(&mut state);
        state.tokens
    }
}

#[derive(Debug, Clone)]
pub struct WindowStats {
    pub window_start: SystemTime,
    pub request_count: u32,
    pub rate_limited_requests: u32,
}

#[derive(Debug)]
pub struct WindowTracker {
    window_duration: Duration,
    current_window: WindowStats,
}

impl WindowTracker {
    pub fn new(window_duration: Duration) -> Self {
        Self {
            window_duration,
            current_window: Self::fresh_window(SystemTime::now()),
        }
    }

    fn fresh_window(window_start: SystemTime) -> WindowStats {
        WindowStats {
            window_start,
            request_count: 0,
            rate_limited_requests: 0,
        }
    }

    pub fn record_request(&mut self) {
        self.ensure_current_window();
        self.current_window.request_count += 1;
    }

    pub fn record_rate_limited(&mut self) {
        self.ensure_current_window();
        self.current_window.rate_limited_requests += 1;
    }

    pub fn current_window_stats(&self) -> WindowStats {
        self.current_window.clone()
    }

    fn ensure_current_window(&mut self) {
        let now = SystemTime::now();
        let window_age = now
            .duration_since(self.current_window.window_start)
            .unwrap_or_default();

        if window_age >= self.window_duration {
            self.current_window = Self::fresh_window(now);
        }
    }
}

/// Client-side pacing for one endpoint, combined with the last budget the
/// server reported for it.
#[derive(Debug)]
pub struct RateLimiter {
    token_bucket: TokenBucket,
    config: RateLimitConfig,
    wait_on_exhausted: bool,
    window_tracker: Mutex<WindowTracker>,
    last_report: Mutex<Option<RateLimitReport>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, wait_on_exhausted: bool) -> Self {
        Self {
            token_bucket: TokenBucket::new(&config),
            window_tracker: Mutex::new(WindowTracker::new(config.time_window)),
            config,
            wait_on_exhausted,
            last_report: Mutex::new(None),
        }
    }

    /// Waits until a request may be sent and returns the time spent waiting.
    ///
    /// When the server reported an exhausted budget this either sleeps until
    /// the reset or fails with `RateLimitExceeded`, depending on
    /// `wait_on_exhausted`.
    pub async fn acquire(&self) -> Result<Duration, SearchApiError> {
        let start_time = Instant::now();

        let reset_wait = {
            let report = self.last_report.lock().await;
            report
                .as_ref()
                .filter(|report| report.is_exhausted())
                .map(|report| report.time_until_reset(Utc::now()))
                .filter(|wait| !wait.is_zero())
        };
        if let Some(wait) = reset_wait {
            if !self.wait_on_exhausted {
                return Err(SearchApiError::RateLimitExceeded {
                    retry_after: wait.as_secs().max(1),
                });
            }
            tracing::warn!("Rate limit budget exhausted, sleeping {:?} until reset", wait);
            sleep(wait).await;
            *self.last_report.lock().await = None;
        }

        loop {
            match self.token_bucket.acquire(1.0).await {
                Ok(()) => break,
                Err(wait_time) => {
                    tracing::debug!("Client-side pacing, waiting {:?}", wait_time);
                    sleep(wait_time).await;
                }
            }
        }

        self.window_tracker.lock().await.record_request();
        Ok(start_time.elapsed())
    }

    pub async fn record_report(&self, report: RateLimitReport) {
        *self.last_report.lock().await = Some(report);
    }

    pub async fn record_rate_limited(&self) {
        self.window_tracker.lock().await.record_rate_limited();
    }

    pub async fn last_report(&self) -> Option<RateLimitReport> {
        self.last_report.lock().await.clone()
    }

    pub async fn status(&self) -> RateLimitStatus {
        let available_tokens = self.token_bucket.available_tokens().await;
        let window = self.window_tracker.lock().await.current_window_stats();

        RateLimitStatus {
            available_tokens: available_tokens as u32,
            max_tokens: self.config.burst_allowance,
            requests_per_window: self.config.max_requests,
            current_window_requests: window.request_count,
            rate_limited_requests: window.rate_limited_requests,
            window_start_time: window.window_start,
            server_remaining: self.last_report().await.map(|report| report.remaining),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub available_tokens: u32,
    pub max_tokens: u32,
    pub requests_per_window: u32,
    pub current_window_requests: u32,
    pub rate_limited_requests: u32,
    pub window_start_time: SystemTime,
    pub server_remaining: Option<u32>,
}

impl RateLimitStatus {
    pub fn requests_remaining_in_window(&self) -> u32 {
        let local = self
            .requests_per_window
            .saturating_sub(self.current_window_requests);
        self.server_remaining.map_or(local, |remote| remote.min(local))
    }

    pub fn window_utilization_percentage(&self) -> f64 {
        (self.current_window_requests as f64 / self.requests_per_window as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn fast_config(burst: u32) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: 20, // 20 tokens per second
            time_window: Duration::from_secs(1),
            burst_allowance: burst,
        }
    }

    #[tokio::test]
    async fn test_token_bucket_burst() {
        let bucket = TokenBucket::new(&fast_config(3));

        for _ in 0..3 {
            assert!(bucket.acquire(1.0).await.is_ok());
        }
        let wait = bucket.acquire(1.0).await.unwrap_err();
        assert!(wait <= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_token_bucket_refill() {
        let bucket = TokenBucket::new(&fast_config(1));

        assert!(bucket.acquire(1.0).await.is_ok());
        assert!(bucket.acquire(1.0).await.is_err());

        sleep(Duration::from_millis(120)).await;
        assert!(bucket.acquire(1.0).await.is_ok());
    }

    #[tokio::test]
    async fn test_limiter_counts_requests() {
        let limiter = RateLimiter::new(fast_config(5), true);

        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let status = limiter.status().await;
        assert_eq!(status.current_window_requests, 2);
        assert_eq!(status.requests_remaining_in_window(), 18);
        assert_eq!(status.window_utilization_percentage(), 10.0);
        assert!(status.server_remaining.is_none());

        limiter
            .record_report(RateLimitReport {
                limit: Some(20),
                remaining: 4,
                reset_at: Utc::now() + chrono::Duration::seconds(60),
            })
            .await;
        assert_eq!(limiter.status().await.requests_remaining_in_window(), 4);
    }

    #[tokio::test]
    async fn test_exhausted_budget_without_waiting_fails() {
        let limiter = RateLimiter::new(RateLimitConfig::search(), false);
        limiter
            .record_report(RateLimitReport {
                limit: Some(450),
                remaining: 0,
                reset_at: Utc::now() + chrono::Duration::seconds(120),
            })
            .await;

        match limiter.acquire().await {
            Err(SearchApiError::RateLimitExceeded { retry_after }) => {
                assert!(retry_after > 100 && retry_after <= 120)
            }
            other => panic!("expected rate limit error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_elapsed_reset_does_not_block() {
        let limiter = RateLimiter::new(RateLimitConfig::search(), false);
        limiter
            .record_report(RateLimitReport {
                limit: None,
                remaining: 0,
                reset_at: Utc::now() - chrono::Duration::seconds(5),
            })
            .await;

        assert!(limiter.acquire().await.is_ok());
    }

    #[test]
    fn test_report_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-limit", HeaderValue::from_static("450"));
        headers.insert("x-rate-limit-remaining", HeaderValue::from_static("12"));
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1590000000"));

        let report = RateLimitReport::from_headers(&headers).unwrap();
        assert_eq!(report.limit, Some(450));
        assert_eq!(report.remaining, 12);
        assert_eq!(report.reset_at.timestamp(), 1_590_000_000);
        assert_eq!(report.posts_remaining(100), 1200);

        headers.remove("x-rate-limit-reset");
        assert!(RateLimitReport::from_headers(&headers).is_none());
    }
}
