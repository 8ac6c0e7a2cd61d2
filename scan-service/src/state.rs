use sentiscan_core::{AuthorId, CoreError};
use std::collections::{BTreeSet, HashSet};
use timeline_store::ScanStorage;

/// Every author ever discovered, across all partitions. Only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanState {
    authors: HashSet<AuthorId>,
}

impl ScanState {
    /// Union of the author files of partitions `0..partitions` and of any
    /// other `users_<i>` file on disk, e.g. from a run with more locations.
    /// Missing files count as empty.
    pub async fn load(storage: &ScanStorage, partitions: usize) -> Result<Self, CoreError> {
        let mut indices: BTreeSet<usize> = (0..partitions).collect();
        indices.extend(storage.author_partitions().await?);

        let mut state = Self::default();
        for partition in indices {
            state
                .authors
                .extend(storage.load_author_ids(partition).await?);
        }
        Ok(state)
    }

    pub fn contains(&self, author: &AuthorId) -> bool {
        self.authors.contains(author)
    }

    /// Returns false if the author was already known.
    pub fn insert(&mut self, author: AuthorId) -> bool {
        self.authors.insert(author)
    }

    pub fn len(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
    }

    pub fn authors(&self) -> &HashSet<AuthorId> {
        &self.authors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_unions_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        storage
            .append_author_ids(0, &[AuthorId::new("a"), AuthorId::new("b")])
            .await
            .unwrap();
        storage
            .append_author_ids(2, &[AuthorId::new("b"), AuthorId::new("c")])
            .await
            .unwrap();

        let state = ScanState::load(&storage, 3).await.unwrap();
        assert_eq!(state.len(), 3);
        assert!(state.contains(&AuthorId::new("c")));

        let empty = ScanState::load(&ScanStorage::new(dir.path().join("none")), 3)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_load_includes_partitions_beyond_plan() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        storage
            .append_author_ids(0, &[AuthorId::new("a")])
            .await
            .unwrap();
        storage
            .append_author_ids(5, &[AuthorId::new("z")])
            .await
            .unwrap();

        let state = ScanState::load(&storage, 2).await.unwrap();
        assert_eq!(state.len(), 2);
        assert!(state.contains(&AuthorId::new("z")));
    }
}
