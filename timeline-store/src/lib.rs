//! On-disk storage: partitioned scan output (author id files and per-author
//! timelines) and the sentiment cache (overview ledger and per-author labels).

pub mod atomic;
pub mod scan_storage;
pub mod sentiment_store;

pub use atomic::{atomic_write, atomic_write_json};
pub use scan_storage::{PersistOutcome, ScanStorage};
pub use sentiment_store::{AuthorLabels, ClassificationOverview, SentimentStore, OVERVIEW_FILE};
