use crate::atomic::atomic_write_json;
use crate::scan_storage::read_optional;
use sentiscan_core::{AuthorId, CoreError, SentimentLabel, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const OVERVIEW_FILE: &str = "sentiment_analysis_overview.json";

/// Classifier name to the authors it has already labeled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationOverview(BTreeMap<String, BTreeSet<AuthorId>>);

impl ClassificationOverview {
    pub fn contains(&self, classifier: &str, author: &AuthorId) -> bool {
        self.0
            .get(classifier)
            .is_some_and(|authors| authors.contains(author))
    }

    /// Returns false when the author was already recorded.
    pub fn insert(&mut self, classifier: &str, author: AuthorId) -> bool {
        self.0.entry(classifier.to_string()).or_default().insert(author)
    }

    pub fn authors(&self, classifier: &str) -> impl Iterator<Item = &AuthorId> {
        self.0.get(classifier).into_iter().flatten()
    }

    pub fn classifiers(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Classifier name to per-post labels, in timeline order.
pub type AuthorLabels = BTreeMap<String, Vec<SentimentLabel>>;

#[derive(Debug, Clone)]
pub struct SentimentStore {
    users_dir: PathBuf,
}

impl SentimentStore {
    pub fn new(users_dir: impl Into<PathBuf>) -> Self {
        Self {
            users_dir: users_dir.into(),
        }
    }

    pub fn overview_path(&self) -> PathBuf {
        self.users_dir.join(OVERVIEW_FILE)
    }

    pub fn labels_path(&self, author: &AuthorId) -> Result<PathBuf, StorageError> {
        let id = author.as_str();
        if id.is_empty() || id.contains(['/', '\\', '\0']) || id.starts_with('.') {
            return Err(StorageError::InvalidPath {
                path: id.to_string(),
            });
        }
        Ok(self.users_dir.join(format!("{}_sentiment.json", id)))
    }

    pub async fn load_overview(&self) -> Result<ClassificationOverview, CoreError> {
        load_json_or_default(&self.overview_path()).await
    }

    pub async fn save_overview(&self, overview: &ClassificationOverview) -> Result<(), CoreError> {
        atomic_write_json(&self.overview_path(), overview).await?;
        debug!("Saved classification overview");
        Ok(())
    }

    pub async fn load_labels(&self, author: &AuthorId) -> Result<AuthorLabels, CoreError> {
        load_json_or_default(&self.labels_path(author)?).await
    }

    /// Read-modify-write: labels of other classifiers in the file survive.
    pub async fn merge_labels(
        &self,
        author: &AuthorId,
        classifier: &str,
        labels: Vec<SentimentLabel>,
    ) -> Result<(), CoreError> {
        let path = self.labels_path(author)?;
        let mut existing: AuthorLabels = load_json_or_default(&path).await?;
        existing.insert(classifier.to_string(), labels);
        atomic_write_json(&path, &existing).await?;
        Ok(())
    }
}

async fn load_json_or_default<T>(path: &Path) -> Result<T, CoreError>
where
    T: Default + for<'de> Deserialize<'de>,
{
    let Some(contents) = read_optional(path).await? else {
        return Ok(T::default());
    };
    serde_json::from_str(&contents).map_err(|e| {
        CoreError::Storage(StorageError::CorruptRecord {
            path: path.display().to_string(),
            line: e.line(),
            reason: e.to_string(),
        })
    })
}
