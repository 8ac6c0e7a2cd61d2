use crate::error::*;
use std::future::Future;
use std::time::Duration;
use tracing::{error, info, warn};

/// Fallback wait for retryable failures that carry no hint of their own.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(30);

pub trait ErrorExt {
    fn log_error(&self) -> &Self;
    fn log_warn(&self) -> &Self;
    fn is_retryable(&self) -> bool;
    fn retry_after(&self) -> Option<Duration>;
    fn user_friendly_message(&self) -> String;
    fn error_code(&self) -> &'static str;
}

impl ErrorExt for CoreError {
    fn log_error(&self) -> &Self {
        error!(code = self.error_code(), "{}", self);
        match self {
            CoreError::SearchApi(e) => error!("Search API error details: {:?}", e),
            CoreError::Storage(e) => error!("Storage error details: {:?}", e),
            CoreError::Classifier(e) => error!("Classifier error details: {:?}", e),
            CoreError::Config(e) => error!("Configuration error details: {:?}", e),
            _ => {}
        }
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = self.error_code(), "{}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            CoreError::SearchApi(e) => e.is_retryable(),
            CoreError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            CoreError::SearchApi(e) => e.retry_after(),
            _ if self.is_retryable() => Some(Duration::from_secs(5)),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            CoreError::SearchApi(e) => e.user_friendly_message(),
            CoreError::Config(e) => e.user_friendly_message(),
            CoreError::Storage(StorageError::CorruptRecord { path, line, .. }) => {
                format!("Stored data in {} is unreadable at line {}.", path, line)
            }
            CoreError::Storage(StorageError::InvalidPath { path }) => {
                format!("'{}' cannot be used as a storage file name.", path)
            }
            CoreError::Storage(StorageError::WriteFailed { path, .. }) => {
                format!("Could not write {}. Check free space and permissions.", path)
            }
            CoreError::Classifier(ClassifierError::LexiconLoadFailed { path }) => {
                format!("Sentiment lexicon {} could not be loaded.", path)
            }
            CoreError::Classifier(_) => {
                "Sentiment classification failed for this timeline.".to_string()
            }
            CoreError::Network(_) => {
                "Network connection error. Please check your internet connection.".to_string()
            }
            CoreError::Io(e) => format!("File system error: {}", e),
            CoreError::Serialization(_) => "A stored record is not valid JSON.".to_string(),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            CoreError::SearchApi(e) => e.error_code(),
            CoreError::Storage(_) => "STORAGE",
            CoreError::Classifier(_) => "CLASSIFIER",
            CoreError::Config(e) => e.error_code(),
            CoreError::Io(_) => "IO",
            CoreError::Serialization(_) => "SERIALIZATION",
            CoreError::Network(_) => "NETWORK",
        }
    }
}

impl ErrorExt for SearchApiError {
    fn log_error(&self) -> &Self {
        error!(code = self.error_code(), "{}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = self.error_code(), "{}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        match self {
            SearchApiError::RateLimitExceeded { .. } => true,
            SearchApiError::RequestTimeout => true,
            SearchApiError::ServerError { status_code } => *status_code >= 500,
            _ => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            SearchApiError::RateLimitExceeded { retry_after } => {
                Some(Duration::from_secs(*retry_after))
            }
            _ if self.is_retryable() => Some(DEFAULT_RETRY_DELAY),
            _ => None,
        }
    }

    fn user_friendly_message(&self) -> String {
        match self {
            SearchApiError::RateLimitExceeded { retry_after } => format!(
                "Rate limit window exhausted. It resets in {} seconds.",
                retry_after
            ),
            SearchApiError::Forbidden { resource } => {
                format!("Access to {} was refused.", resource)
            }
            SearchApiError::PostNotFound { post_id } => {
                format!("Post {} was deleted or is protected.", post_id)
            }
            SearchApiError::AuthorNotFound { author_id } => {
                format!("Author '{}' not found or protected.", author_id)
            }
            SearchApiError::InvalidToken => format!(
                "Bearer token is invalid. Set api.bearer_token or {}.",
                crate::config::BEARER_TOKEN_ENV
            ),
            SearchApiError::RequestTimeout => {
                "Request to the search API timed out. Please try again.".to_string()
            }
            SearchApiError::InvalidResponse { details } => {
                format!("The search API answered with something unexpected: {}", details)
            }
            SearchApiError::ServerError { status_code } => {
                format!("The search API is failing (HTTP {}).", status_code)
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SearchApiError::RateLimitExceeded { .. } => "SEARCH_RATE_LIMIT",
            SearchApiError::Forbidden { .. } => "SEARCH_FORBIDDEN",
            SearchApiError::PostNotFound { .. } => "SEARCH_POST_NOT_FOUND",
            SearchApiError::AuthorNotFound { .. } => "SEARCH_AUTHOR_NOT_FOUND",
            SearchApiError::InvalidToken => "SEARCH_INVALID_TOKEN",
            SearchApiError::RequestTimeout => "SEARCH_TIMEOUT",
            SearchApiError::InvalidResponse { .. } => "SEARCH_INVALID_RESPONSE",
            SearchApiError::ServerError { .. } => "SEARCH_SERVER_ERROR",
        }
    }
}

impl ErrorExt for ConfigError {
    fn log_error(&self) -> &Self {
        error!(code = self.error_code(), "{}", self);
        self
    }

    fn log_warn(&self) -> &Self {
        warn!(code = self.error_code(), "{}", self);
        self
    }

    fn is_retryable(&self) -> bool {
        false
    }

    fn retry_after(&self) -> Option<Duration> {
        None
    }

    fn user_friendly_message(&self) -> String {
        match self {
            ConfigError::FileNotFound { path } => {
                format!("Configuration file '{}' not found.", path)
            }
            ConfigError::InvalidFormat { details } => {
                format!("Configuration file is unreadable: {}", details)
            }
            ConfigError::Parse(e) => format!("Configuration file is not valid TOML: {}", e),
            ConfigError::MissingField { field } => {
                format!("Required configuration field '{}' is missing.", field)
            }
            ConfigError::InvalidValue { field, value } => {
                format!(
                    "Invalid value '{}' for configuration field '{}'.",
                    value, field
                )
            }
            ConfigError::MissingEnvironmentVariable { var_name } => format!(
                "Environment variable '{}' is required but not set.",
                var_name
            ),
            ConfigError::ValidationFailed { reason } => {
                format!("Configuration is inconsistent: {}", reason)
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ConfigError::FileNotFound { .. } => "CONFIG_FILE_NOT_FOUND",
            ConfigError::InvalidFormat { .. } => "CONFIG_INVALID_FORMAT",
            ConfigError::MissingField { .. } => "CONFIG_MISSING_FIELD",
            ConfigError::InvalidValue { .. } => "CONFIG_INVALID_VALUE",
            ConfigError::MissingEnvironmentVariable { .. } => "CONFIG_MISSING_ENV_VAR",
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
            ConfigError::Parse(_) => "CONFIG_PARSE_ERROR",
        }
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `max_retries` retries have been spent. Delays double each attempt, capped at
/// `max_delay`, unless the error carries its own retry hint.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: ErrorExt,
{
    let mut attempt = 0;
    let mut delay = initial_delay;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if attempt >= max_retries || !error.is_retryable() {
                    return Err(error);
                }

                if let Some(retry_delay) = error.retry_after() {
                    delay = retry_delay;
                }
                delay = delay.min(max_delay);

                info!(
                    "Retrying operation (attempt {}/{}) after {:?}",
                    attempt + 1,
                    max_retries,
                    delay
                );

                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, max_delay);
                attempt += 1;
            }
        }
    }
}
