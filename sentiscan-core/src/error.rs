use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Search API error: {0}")]
    SearchApi(#[from] SearchApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

#[derive(Error, Debug, Clone)]
pub enum SearchApiError {
    #[error("Rate limit exceeded. Retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Forbidden access to resource: {resource}")]
    Forbidden { resource: String },

    #[error("Post not found: {post_id}")]
    PostNotFound { post_id: String },

    #[error("Author not found or protected: {author_id}")]
    AuthorNotFound { author_id: String },

    #[error("Invalid bearer token")]
    InvalidToken,

    #[error("Request timeout")]
    RequestTimeout,

    #[error("Invalid API response: {details}")]
    InvalidResponse { details: String },

    #[error("Server error: {status_code}")]
    ServerError { status_code: u16 },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Invalid storage path: {path}")]
    InvalidPath { path: String },

    #[error("Corrupt record in {path} at line {line}: {reason}")]
    CorruptRecord {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Write failed for {path}: {reason}")]
    WriteFailed { path: String, reason: String },
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Lexicon could not be loaded: {path}")]
    LexiconLoadFailed { path: String },

    #[error("Classifier returned {actual} labels for {expected} texts")]
    BatchLengthMismatch { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {details}")]
    InvalidFormat { details: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    #[error("Environment variable not set: {var_name}")]
    MissingEnvironmentVariable { var_name: String },

    #[error("Configuration validation failed: {reason}")]
    ValidationFailed { reason: String },

    #[error("Configuration parsing error: {0}")]
    Parse(#[from] toml::de::Error),
}
