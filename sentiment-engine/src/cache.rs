use crate::aggregate::{author_bucket_stats, AuthorBuckets};
use crate::bucket::TimeBucketer;
use crate::classifier::{Classifier, ExtremeBoundaries};
use sentiscan_core::{AuthorId, ClassifierError, CoreError, ErrorExt, Post, SentimentLabel};
use timeline_store::{ClassificationOverview, SentimentStore};
use tracing::{debug, info, warn};

/// Per-author extreme labels, persisted per classifier so each timeline is
/// classified at most once per model.
#[derive(Debug)]
pub struct ClassificationCache {
    store: SentimentStore,
    overview: ClassificationOverview,
    flush_every: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub dropped: usize,
    pub failed: usize,
}

impl ClassificationCache {
    pub async fn open(store: SentimentStore, flush_every: usize) -> Result<Self, CoreError> {
        let overview = store.load_overview().await?;
        Ok(Self {
            store,
            overview,
            flush_every: flush_every.max(1),
        })
    }

    pub fn overview(&self) -> &ClassificationOverview {
        &self.overview
    }

    pub async fn flush(&self) -> Result<(), CoreError> {
        self.store.save_overview(&self.overview).await
    }

    async fn cached_labels(
        &self,
        author: &AuthorId,
        classifier_name: &str,
        expected: usize,
    ) -> Result<Option<Vec<SentimentLabel>>, CoreError> {
        if !self.overview.contains(classifier_name, author) {
            return Ok(None);
        }
        let mut stored = self.store.load_labels(author).await?;
        match stored.remove(classifier_name) {
            Some(labels) if labels.len() == expected => Ok(Some(labels)),
            Some(labels) => {
                warn!(
                    "Cached labels for {} hold {} entries, timeline has {}; reclassifying",
                    author,
                    labels.len(),
                    expected
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Labels for `timeline`, from disk when this classifier already scored
    /// the author, otherwise computed and stored. Returns whether it was a hit.
    pub async fn labels_for<C: Classifier>(
        &mut self,
        author: &AuthorId,
        timeline: &[Post],
        classifier: &C,
        boundaries: ExtremeBoundaries,
    ) -> Result<(Vec<SentimentLabel>, bool), CoreError> {
        let name = classifier.name().to_string();
        if let Some(labels) = self.cached_labels(author, &name, timeline.len()).await? {
            debug!("Cache hit for {} under {}", author, name);
            return Ok((labels, true));
        }

        let texts: Vec<String> = timeline.iter().map(|post| post.text.clone()).collect();
        let labels = classifier.extreme_labels(&texts, boundaries).await?;
        if labels.len() != texts.len() {
            return Err(ClassifierError::BatchLengthMismatch {
                expected: texts.len(),
                actual: labels.len(),
            }
            .into());
        }

        self.store.merge_labels(author, &name, labels.clone()).await?;
        self.overview.insert(&name, author.clone());
        Ok((labels, false))
    }

    /// `None` for an empty timeline, which carries no author to attribute.
    pub async fn classify_author<C: Classifier>(
        &mut self,
        timeline: &[Post],
        classifier: &C,
        boundaries: ExtremeBoundaries,
        bucketer: &TimeBucketer,
    ) -> Result<Option<(AuthorBuckets, bool)>, CoreError> {
        let Some(first) = timeline.first() else {
            warn!("Dropping author with an empty timeline");
            return Ok(None);
        };
        let author = first.author_id.clone();

        let (labels, hit) = self
            .labels_for(&author, timeline, classifier, boundaries)
            .await?;
        let buckets = author_bucket_stats(timeline.iter().zip(labels), bucketer);
        Ok(Some((buckets, hit)))
    }

    /// Classifies a batch of timelines. A failing author is logged and left
    /// out; the ledger is flushed every `flush_every` authors and at the end.
    pub async fn classify_authors<C: Classifier>(
        &mut self,
        timelines: impl IntoIterator<Item = Vec<Post>>,
        classifier: &C,
        boundaries: ExtremeBoundaries,
        bucketer: &TimeBucketer,
    ) -> Result<(Vec<AuthorBuckets>, CacheStats), CoreError> {
        let mut results = Vec::new();
        let mut stats = CacheStats::default();

        for (index, timeline) in timelines.into_iter().enumerate() {
            match self
                .classify_author(&timeline, classifier, boundaries, bucketer)
                .await
            {
                Ok(Some((buckets, hit))) => {
                    if hit {
                        stats.hits += 1;
                    } else {
                        stats.misses += 1;
                    }
                    results.push(buckets);
                }
                Ok(None) => stats.dropped += 1,
                Err(e) => {
                    e.log_warn();
                    stats.failed += 1;
                }
            }

            if (index + 1) % self.flush_every == 0 {
                self.flush().await?;
            }
        }
        self.flush().await?;

        info!(
            "Classified {} authors with {} ({} cached, {} new, {} dropped, {} failed)",
            results.len(),
            classifier.name(),
            stats.hits,
            stats.misses,
            stats.dropped,
            stats.failed
        );
        Ok((results, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores "+" as 1.0 and "-" as -1.0; counts batch calls.
    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl Classifier for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn get_polarity(&self, text: &str) -> Result<Option<f64>, CoreError> {
            Ok(match text {
                "+" => Some(1.0),
                "-" => Some(-1.0),
                _ => None,
            })
        }

        async fn extreme_labels(
            &self,
            texts: &[String],
            boundaries: ExtremeBoundaries,
        ) -> Result<Vec<SentimentLabel>, CoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut labels = Vec::new();
            for text in texts {
                labels.push(boundaries.label(self.get_polarity(text).await?));
            }
            Ok(labels)
        }
    }

    fn timeline(author: &str, texts: &[&str]) -> Vec<Post> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| Post {
                id: format!("{}-{}", author, i),
                author_id: AuthorId::new(author),
                created_at: Utc.with_ymd_and_hms(2020, 5, 1 + i as u32, 12, 0, 0).unwrap(),
                text: text.to_string(),
                in_reply_to_id: None,
                retweeted_from: None,
                hashtags: Default::default(),
            })
            .collect()
    }

    fn bucketer() -> TimeBucketer {
        let d = |day| NaiveDate::from_ymd_opt(2020, 5, day).unwrap();
        TimeBucketer::day_groups(d(1), d(4), 2).unwrap()
    }

    fn boundaries() -> ExtremeBoundaries {
        ExtremeBoundaries::new(0.8, 0.7)
    }

    #[tokio::test]
    async fn test_second_classification_hits_cache() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Counting::default();
        let posts = timeline("a", &["+", "-", "x", "+"]);

        let mut cache = ClassificationCache::open(SentimentStore::new(dir.path()), 100)
            .await
            .unwrap();
        let (first, first_hit) = cache
            .classify_author(&posts, &classifier, boundaries(), &bucketer())
            .await
            .unwrap()
            .unwrap();
        cache.flush().await.unwrap();
        assert!(!first_hit);

        // A fresh cache over the same directory reads the persisted ledger.
        let mut reopened = ClassificationCache::open(SentimentStore::new(dir.path()), 100)
            .await
            .unwrap();
        let (second, second_hit) = reopened
            .classify_author(&posts, &classifier, boundaries(), &bucketer())
            .await
            .unwrap()
            .unwrap();

        assert!(second_hit);
        assert_eq!(first, second);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_length_mismatch_reclassifies() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Counting::default();
        let mut cache = ClassificationCache::open(SentimentStore::new(dir.path()), 100)
            .await
            .unwrap();

        let author = AuthorId::new("a");
        cache
            .labels_for(&author, &timeline("a", &["+"]), &classifier, boundaries())
            .await
            .unwrap();
        let (labels, hit) = cache
            .labels_for(&author, &timeline("a", &["+", "-"]), &classifier, boundaries())
            .await
            .unwrap();

        assert!(!hit);
        assert_eq!(labels, vec![SentimentLabel::Pos, SentimentLabel::Neg]);
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_drops_empty_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = Counting::default();
        let store = SentimentStore::new(dir.path());
        let mut cache = ClassificationCache::open(store.clone(), 2).await.unwrap();

        let timelines = vec![
            timeline("a", &["+", "+"]),
            Vec::new(),
            timeline("b", &["-", "x"]),
        ];
        let (results, stats) = cache
            .classify_authors(timelines, &classifier, boundaries(), &bucketer())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.misses, 2);

        let ledger = store.load_overview().await.unwrap();
        assert!(ledger.contains("counting", &AuthorId::new("a")));
        assert!(ledger.contains("counting", &AuthorId::new("b")));

        // Day-groups of two over May 1-4: posts of "a" sit on May 1 and 2.
        let first_bucket = NaiveDate::from_ymd_opt(2020, 5, 1).unwrap();
        assert_eq!(results[0][&first_bucket].as_pair(), (100.0, 0.0));
        assert!(results[0][&NaiveDate::from_ymd_opt(2020, 5, 3).unwrap()].is_empty());
    }

    /// Reads the persisted ledger whenever it is asked to classify a "c" timeline.
    struct LedgerReader {
        inner: Counting,
        store: SentimentStore,
        seen_on_disk: tokio::sync::Mutex<Option<ClassificationOverview>>,
    }

    impl Classifier for LedgerReader {
        fn name(&self) -> &str {
            self.inner.name()
        }

        async fn get_polarity(&self, text: &str) -> Result<Option<f64>, CoreError> {
            self.inner.get_polarity(text).await
        }

        async fn extreme_labels(
            &self,
            texts: &[String],
            boundaries: ExtremeBoundaries,
        ) -> Result<Vec<SentimentLabel>, CoreError> {
            if texts.iter().any(|text| text == "c") {
                *self.seen_on_disk.lock().await = Some(self.store.load_overview().await?);
            }
            self.inner.extreme_labels(texts, boundaries).await
        }
    }

    #[tokio::test]
    async fn test_ledger_flushed_mid_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = SentimentStore::new(dir.path());
        let classifier = LedgerReader {
            inner: Counting::default(),
            store: store.clone(),
            seen_on_disk: tokio::sync::Mutex::new(None),
        };
        let mut cache = ClassificationCache::open(store.clone(), 2).await.unwrap();

        let timelines = vec![
            timeline("a", &["+"]),
            timeline("b", &["-"]),
            timeline("c", &["c", "+"]),
        ];
        let (_, stats) = cache
            .classify_authors(timelines, &classifier, boundaries(), &bucketer())
            .await
            .unwrap();
        assert_eq!(stats.misses, 3);

        let mid_batch = classifier.seen_on_disk.lock().await.take().unwrap();
        assert!(mid_batch.contains("counting", &AuthorId::new("a")));
        assert!(mid_batch.contains("counting", &AuthorId::new("b")));
        assert!(!mid_batch.contains("counting", &AuthorId::new("c")));

        let final_ledger = store.load_overview().await.unwrap();
        assert!(final_ledger.contains("counting", &AuthorId::new("c")));
    }
}
