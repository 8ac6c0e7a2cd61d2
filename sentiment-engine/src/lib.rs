//! Sentiment side of the pipeline: classifiers, the per-author label cache,
//! time bucketing and the per-bucket roll-ups.

pub mod aggregate;
pub mod bucket;
pub mod cache;
pub mod classifier;
pub mod lexicon;
pub mod profile;

pub use aggregate::{author_bucket_stats, summarize, AuthorBuckets, BucketStat};
pub use bucket::{BucketKey, TimeBucketer};
pub use cache::{CacheStats, ClassificationCache};
pub use classifier::{Classifier, ExtremeBoundaries};
pub use lexicon::LexiconClassifier;
pub use profile::TimelineProfile;
