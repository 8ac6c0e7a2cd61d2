use chrono::{NaiveDate, TimeZone, Utc};
use sentiment_engine::{
    summarize, BucketStat, ClassificationCache, Classifier, ExtremeBoundaries, LexiconClassifier,
    TimeBucketer,
};
use sentiscan_core::{AuthorId, CoreError, Post, SentimentLabel};
use std::sync::atomic::{AtomicUsize, Ordering};
use timeline_store::{ScanStorage, SentimentStore};

fn post(author: &str, id: &str, day: u32, text: &str) -> Post {
    Post {
        id: id.to_string(),
        author_id: AuthorId::new(author),
        created_at: Utc.with_ymd_and_hms(2020, 4, day, 9, 30, 0).unwrap(),
        text: text.to_string(),
        in_reply_to_id: None,
        retweeted_from: None,
        hashtags: Default::default(),
    }
}

#[tokio::test]
async fn test_stored_timelines_to_population_summary() {
    let dir = tempfile::tempdir().unwrap();
    let scans = ScanStorage::new(dir.path().join("full_scan"));

    scans
        .write_timeline(
            0,
            &AuthorId::new("1"),
            &[
                post("1", "a3", 3, "Das ist super"),
                post("1", "a2", 2, "schrecklich, ich hasse das"),
                post("1", "a1", 1, "Heute ist Montag"),
            ],
        )
        .await
        .unwrap();
    scans
        .write_timeline(0, &AuthorId::new("2"), &[post("2", "b1", 1, "großartig")])
        .await
        .unwrap();

    let mut timelines = Vec::new();
    for author in scans.timeline_authors(0).await.unwrap() {
        timelines.push(scans.load_timeline(0, &author).await.unwrap());
    }

    let start = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 4, 4).unwrap();
    let bucketer = TimeBucketer::day_groups(start, end, 2).unwrap();
    let classifier = LexiconClassifier::builtin();
    let boundaries = ExtremeBoundaries::new(0.8, 0.7);

    let mut cache = ClassificationCache::open(SentimentStore::new(dir.path().join("users")), 100)
        .await
        .unwrap();
    let (per_author, stats) = cache
        .classify_authors(timelines, &classifier, boundaries, &bucketer)
        .await
        .unwrap();
    assert_eq!(stats.misses, 2);

    let summary = summarize(&per_author);
    let first = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    let second = NaiveDate::from_ymd_opt(2020, 4, 3).unwrap();

    // Author 1, Apr 1-2: one neutral, one extreme negative. Author 2: one positive.
    assert_eq!(
        summary[&first],
        BucketStat::Measured {
            extremely_pos_percentage: 50.0,
            extremely_neg_percentage: 25.0,
        }
    );
    // Only author 1 posted on Apr 3-4.
    assert_eq!(summary[&second].as_pair(), (100.0, 0.0));
}

/// Builtin lexicon that counts batch classifications.
struct CountingLexicon {
    inner: LexiconClassifier,
    batches: AtomicUsize,
}

impl Classifier for CountingLexicon {
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
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.inner.extreme_labels(texts, boundaries).await
    }
}

#[tokio::test]
async fn test_author_in_several_partitions_counts_once() {
    let dir = tempfile::tempdir().unwrap();
    let scans = ScanStorage::new(dir.path().join("full_scan"));
    let shared = [post("1", "a2", 2, "großartig"), post("1", "a1", 1, "Heute ist Montag")];

    scans.write_timeline(0, &AuthorId::new("1"), &shared[1..]).await.unwrap();
    scans.write_timeline(1, &AuthorId::new("1"), &shared).await.unwrap();
    scans
        .write_timeline(1, &AuthorId::new("2"), &[post("2", "b1", 1, "schrecklich")])
        .await
        .unwrap();

    let start = NaiveDate::from_ymd_opt(2020, 4, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2020, 4, 4).unwrap();
    let bucketer = TimeBucketer::day_groups(start, end, 2).unwrap();
    let boundaries = ExtremeBoundaries::new(0.8, 0.7);
    let classifier = CountingLexicon {
        inner: LexiconClassifier::builtin(),
        batches: AtomicUsize::new(0),
    };

    let timelines = scans.load_author_timelines().await.unwrap();
    assert_eq!(timelines.len(), 2);
    assert_eq!(timelines[0].len(), 2);

    let users = dir.path().join("users");
    let mut cache = ClassificationCache::open(SentimentStore::new(&users), 100)
        .await
        .unwrap();
    let (per_author, stats) = cache
        .classify_authors(timelines, &classifier, boundaries, &bucketer)
        .await
        .unwrap();
    assert_eq!(per_author.len(), 2);
    assert_eq!(stats.misses, 2);
    // Author 1 has one positive of two posts on Apr 1-2, author 2 none of one.
    assert_eq!(summarize(&per_author)[&start].as_pair(), (25.0, 50.0));

    let mut reopened = ClassificationCache::open(SentimentStore::new(&users), 100)
        .await
        .unwrap();
    let (_, rerun) = reopened
        .classify_authors(
            scans.load_author_timelines().await.unwrap(),
            &classifier,
            boundaries,
            &bucketer,
        )
        .await
        .unwrap();
    assert_eq!(rerun.hits, 2);
    assert_eq!(rerun.misses, 0);
    assert_eq!(classifier.batches.load(Ordering::SeqCst), 2);
}
