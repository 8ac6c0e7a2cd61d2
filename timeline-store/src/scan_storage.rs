//! Partitioned storage for full scans.
//!
//! ```text
//! <root>/users/users_<i>        one author id per line, append-only
//! <root>/tweets/<i>/<author_id> one serialized post per line, write-once
//! ```

use crate::atomic::atomic_write;
use sentiscan_core::{AuthorId, CoreError, ErrorExt, Post, StorageError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Written,
    /// A timeline for this author already exists; nothing was written.
    AlreadyExists,
}

#[derive(Debug, Clone)]
pub struct ScanStorage {
    root: PathBuf,
}

/// Author ids become file names, so anything that could escape the
/// partition directory is refused.
fn checked_file_name(author: &AuthorId) -> Result<&str, StorageError> {
    let id = author.as_str();
    let safe = !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\', '\0']);
    if safe {
        Ok(id)
    } else {
        Err(StorageError::InvalidPath {
            path: id.to_string(),
        })
    }
}

fn io_write_failed(path: &Path, e: std::io::Error) -> CoreError {
    CoreError::Storage(StorageError::WriteFailed {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Reads a whole file, treating a missing file as empty.
pub(crate) async fn read_optional(path: &Path) -> Result<Option<String>, CoreError> {
    match fs::read_to_string(path).await {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(CoreError::Io(e)),
    }
}

impl ScanStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn authors_path(&self, partition: usize) -> PathBuf {
        self.root.join("users").join(format!("users_{}", partition))
    }

    pub fn timeline_dir(&self, partition: usize) -> PathBuf {
        self.root.join("tweets").join(partition.to_string())
    }

    pub fn timeline_path(&self, partition: usize, author: &AuthorId) -> Result<PathBuf, CoreError> {
        Ok(self.timeline_dir(partition).join(checked_file_name(author)?))
    }

    /// Ids in file order. Missing file is an empty partition.
    pub async fn load_author_ids(&self, partition: usize) -> Result<Vec<AuthorId>, CoreError> {
        let path = self.authors_path(partition);
        let Some(contents) = read_optional(&path).await? else {
            return Ok(Vec::new());
        };
        Ok(contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(AuthorId::new)
            .collect())
    }

    pub async fn append_author_ids(
        &self,
        partition: usize,
        authors: &[AuthorId],
    ) -> Result<(), CoreError> {
        if authors.is_empty() {
            return Ok(());
        }
        let path = self.authors_path(partition);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| io_write_failed(parent, e))?;
        }

        let mut buffer = String::new();
        for author in authors {
            buffer.push_str(checked_file_name(author)?);
            buffer.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| io_write_failed(&path, e))?;
        file.write_all(buffer.as_bytes())
            .await
            .map_err(|e| io_write_failed(&path, e))?;
        file.flush().await.map_err(|e| io_write_failed(&path, e))?;

        debug!("Appended {} ids to {}", authors.len(), path.display());
        Ok(())
    }

    pub async fn timeline_exists(
        &self,
        partition: usize,
        author: &AuthorId,
    ) -> Result<bool, CoreError> {
        let path = self.timeline_path(partition, author)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Write-once: an existing timeline is left untouched.
    pub async fn write_timeline(
        &self,
        partition: usize,
        author: &AuthorId,
        posts: &[Post],
    ) -> Result<PersistOutcome, CoreError> {
        let path = self.timeline_path(partition, author)?;
        if fs::try_exists(&path).await? {
            return Ok(PersistOutcome::AlreadyExists);
        }

        let mut ndjson = String::new();
        for post in posts {
            ndjson.push_str(&serde_json::to_string(post)?);
            ndjson.push('\n');
        }
        atomic_write(&path, ndjson.as_bytes()).await?;

        debug!("Persisted {} posts to {}", posts.len(), path.display());
        Ok(PersistOutcome::Written)
    }

    pub async fn load_timeline(
        &self,
        partition: usize,
        author: &AuthorId,
    ) -> Result<Vec<Post>, CoreError> {
        let path = self.timeline_path(partition, author)?;
        let contents = fs::read_to_string(&path).await?;

        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str(line).map_err(|e| {
                    CoreError::Storage(StorageError::CorruptRecord {
                        path: path.display().to_string(),
                        line: index + 1,
                        reason: e.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Partition indices present under `tweets/`, ascending.
    pub async fn partitions(&self) -> Result<Vec<usize>, CoreError> {
        let mut partitions = Vec::new();
        let tweets = self.root.join("tweets");
        let mut entries = match fs::read_dir(&tweets).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(partitions),
            Err(e) => return Err(CoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(index) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                partitions.push(index);
            }
        }
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// Authors with a persisted timeline in `partition`, sorted by id.
    pub async fn timeline_authors(&self, partition: usize) -> Result<Vec<AuthorId>, CoreError> {
        let mut authors = Vec::new();
        let mut entries = match fs::read_dir(self.timeline_dir(partition)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(authors),
            Err(e) => return Err(CoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.ends_with(".tmp") && entry.file_type().await?.is_file() {
                authors.push(AuthorId::new(name));
            }
        }
        authors.sort();
        Ok(authors)
    }

    /// Partition indices that have an author file under `users/`, ascending.
    pub async fn author_partitions(&self) -> Result<Vec<usize>, CoreError> {
        let mut partitions = Vec::new();
        let mut entries = match fs::read_dir(self.root.join("users")).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(partitions),
            Err(e) => return Err(CoreError::Io(e)),
        };
        while let Some(entry) = entries.next_entry().await? {
            let index = entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix("users_"))
                .and_then(|suffix| suffix.parse().ok());
            if let Some(index) = index {
                partitions.push(index);
            }
        }
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// One timeline per author across all partitions, sorted by author id.
    /// An author stored in several partitions gets the union of those posts
    /// (deduplicated by post id, newest first). Unreadable files are logged
    /// and skipped.
    pub async fn load_author_timelines(&self) -> Result<Vec<Vec<Post>>, CoreError> {
        let mut merged: BTreeMap<AuthorId, BTreeMap<String, Post>> = BTreeMap::new();
        for partition in self.partitions().await? {
            for author in self.timeline_authors(partition).await? {
                match self.load_timeline(partition, &author).await {
                    Ok(posts) => {
                        let slot = merged.entry(author).or_default();
                        for post in posts {
                            slot.entry(post.id.clone()).or_insert(post);
                        }
                    }
                    Err(e) => {
                        e.log_warn();
                        warn!("Skipping timeline of {} in partition {}", author, partition);
                    }
                }
            }
        }

        Ok(merged
            .into_values()
            .map(|posts| {
                let mut posts: Vec<Post> = posts.into_values().collect();
                posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
                posts
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use sentiscan_core::PostRef;

    fn sample_posts(author: &str) -> Vec<Post> {
        vec![
            Post {
                id: "11".to_string(),
                author_id: AuthorId::new(author),
                created_at: Utc.with_ymd_and_hms(2020, 5, 17, 14, 3, 12).unwrap(),
                text: "Guten Morgen\nzweite Zeile".to_string(),
                in_reply_to_id: Some("3".to_string()),
                retweeted_from: None,
                hashtags: ["montag".to_string()].into_iter().collect(),
            },
            Post {
                id: "10".to_string(),
                author_id: AuthorId::new(author),
                created_at: Utc.with_ymd_and_hms(2020, 5, 16, 8, 0, 0).unwrap(),
                text: "RT schön".to_string(),
                in_reply_to_id: None,
                retweeted_from: Some(PostRef {
                    id: "9".to_string(),
                    author_id: AuthorId::new("77"),
                }),
                hashtags: Default::default(),
            },
        ]
    }

    #[tokio::test]
    async fn test_timeline_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        let author = AuthorId::new("42");
        let posts = sample_posts("42");

        let outcome = storage.write_timeline(0, &author, &posts).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Written);
        assert!(storage.timeline_exists(0, &author).await.unwrap());
        assert!(!storage.timeline_exists(1, &author).await.unwrap());

        let loaded = storage.load_timeline(0, &author).await.unwrap();
        assert_eq!(loaded, posts);
    }

    #[tokio::test]
    async fn test_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        let author = AuthorId::new("42");

        storage
            .write_timeline(0, &author, &sample_posts("42"))
            .await
            .unwrap();
        let second = storage.write_timeline(0, &author, &[]).await.unwrap();

        assert_eq!(second, PersistOutcome::AlreadyExists);
        assert_eq!(storage.load_timeline(0, &author).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_author_ids_append() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());

        assert!(storage.load_author_ids(2).await.unwrap().is_empty());

        storage
            .append_author_ids(2, &[AuthorId::new("a"), AuthorId::new("b")])
            .await
            .unwrap();
        storage
            .append_author_ids(2, &[AuthorId::new("c")])
            .await
            .unwrap();

        let ids = storage.load_author_ids(2).await.unwrap();
        assert_eq!(ids, vec![AuthorId::new("a"), AuthorId::new("b"), AuthorId::new("c")]);
        assert!(dir.path().join("users").join("users_2").exists());
    }

    #[tokio::test]
    async fn test_corrupt_line_reports_position() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        let author = AuthorId::new("42");
        let path = storage.timeline_path(0, &author).unwrap();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let good = serde_json::to_string(&sample_posts("42")[0]).unwrap();
        std::fs::write(&path, format!("{}\nnot json\n", good)).unwrap();

        match storage.load_timeline(0, &author).await {
            Err(CoreError::Storage(StorageError::CorruptRecord { line, .. })) => assert_eq!(line, 2),
            other => panic!("expected corrupt record, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_path_like_author_ids() {
        let storage = ScanStorage::new("unused");
        assert!(storage.timeline_path(0, &AuthorId::new("../x")).is_err());
        assert!(storage.timeline_path(0, &AuthorId::new("")).is_err());
    }

    #[tokio::test]
    async fn test_lists_partitions_and_authors() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());

        assert!(storage.partitions().await.unwrap().is_empty());
        for (partition, author) in [(1, "b"), (0, "a"), (1, "c")] {
            storage
                .write_timeline(partition, &AuthorId::new(author), &[])
                .await
                .unwrap();
        }

        assert_eq!(storage.partitions().await.unwrap(), vec![0, 1]);
        assert_eq!(
            storage.timeline_authors(1).await.unwrap(),
            vec![AuthorId::new("b"), AuthorId::new("c")]
        );
    }

    #[tokio::test]
    async fn test_author_partitions_lists_user_files() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        assert!(storage.author_partitions().await.unwrap().is_empty());

        for partition in [4, 0] {
            storage
                .append_author_ids(partition, &[AuthorId::new("a")])
                .await
                .unwrap();
        }
        std::fs::write(dir.path().join("users").join("notes.txt"), "x").unwrap();

        assert_eq!(storage.author_partitions().await.unwrap(), vec![0, 4]);
    }

    #[tokio::test]
    async fn test_author_in_two_partitions_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ScanStorage::new(dir.path());
        let posts = sample_posts("1");

        storage
            .write_timeline(0, &AuthorId::new("1"), &posts[..1])
            .await
            .unwrap();
        storage
            .write_timeline(1, &AuthorId::new("1"), &posts)
            .await
            .unwrap();
        storage
            .write_timeline(1, &AuthorId::new("2"), &sample_posts("2"))
            .await
            .unwrap();
        std::fs::write(storage.timeline_dir(1).join("3"), "not json\n").unwrap();

        let timelines = storage.load_author_timelines().await.unwrap();

        assert_eq!(timelines.len(), 2);
        assert_eq!(timelines[0][0].author_id, AuthorId::new("1"));
        let ids: Vec<&str> = timelines[0].iter().map(|post| post.id.as_str()).collect();
        assert_eq!(ids, vec!["11", "10"]);
        assert_eq!(timelines[1][0].author_id, AuthorId::new("2"));
    }
}
