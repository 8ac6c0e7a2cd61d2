use chrono::{DateTime, Duration, TimeZone, Utc};
use scan_service::{ScanOrchestrator, ScanPlan};
use search_client::InMemoryProvider;
use sentiscan_core::{AuthorId, GetUserConfig, Post, TimelineMode};
use timeline_store::ScanStorage;

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 6, 1, 12, 0, 0).unwrap()
}

fn post(id: &str, author: &str, days_ago: i64) -> Post {
    Post {
        id: id.to_string(),
        author_id: AuthorId::new(author),
        created_at: now() - Duration::days(days_ago),
        text: format!("Beitrag {}", id),
        in_reply_to_id: None,
        retweeted_from: None,
        hashtags: Default::default(),
    }
}

fn plan() -> ScanPlan {
    ScanPlan {
        query: "corona".to_string(),
        geocodes: vec![Some("49.8728,8.6511,100km".to_string())],
        max_searches: 100,
        get_user: GetUserConfig {
            good_user: false,
            num_users: 10,
            ..GetUserConfig::default()
        },
        until: None,
        timeline_mode: TimelineMode::Bounded,
        max_timeline_searches: 100,
        backfill_pending: true,
        now: now(),
    }
}

fn provider() -> InMemoryProvider {
    InMemoryProvider::new()
        .with_search_results(
            Some("49.8728,8.6511,100km"),
            vec![post("s1", "anna", 0), post("s2", "ben", 0), post("s3", "anna", 0)],
        )
        .with_timeline(
            AuthorId::new("anna"),
            vec![post("a1", "anna", 1), post("a2", "anna", 3), post("a3", "anna", 30)],
        )
        .with_timeline(AuthorId::new("ben"), vec![post("b1", "ben", 2)])
}

#[tokio::test]
async fn rerun_makes_no_timeline_pulls() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ScanStorage::new(dir.path());
    let provider = provider();

    let mut first = ScanOrchestrator::resume(storage.clone(), provider.clone(), plan())
        .await
        .unwrap();
    let report = first.run().await.unwrap();
    assert_eq!(report.discovered_per_partition, vec![2]);
    assert_eq!(report.persisted, 2);

    let anna = storage.load_timeline(0, &AuthorId::new("anna")).await.unwrap();
    assert_eq!(anna.len(), 3);
    assert_eq!(anna[0].author_id, AuthorId::new("anna"));
    assert_eq!(anna[0].created_at, now() - Duration::days(1));
    assert_eq!(anna[0].text, "Beitrag a1");

    let pulls_after_first = provider.timeline_pulls();
    let mut second = ScanOrchestrator::resume(storage.clone(), provider.clone(), plan())
        .await
        .unwrap();
    assert_eq!(second.state().len(), 2);
    let rerun = second.run().await.unwrap();

    assert_eq!(rerun.discovered_per_partition, vec![0]);
    assert_eq!(rerun.persisted, 0);
    assert_eq!(provider.timeline_pulls(), pulls_after_first);
    assert_eq!(storage.load_author_ids(0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn existing_timeline_is_not_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ScanStorage::new(dir.path());
    storage
        .write_timeline(0, &AuthorId::new("anna"), &[post("old", "anna", 5)])
        .await
        .unwrap();
    let provider = provider();

    let mut orchestrator = ScanOrchestrator::resume(storage.clone(), provider.clone(), plan())
        .await
        .unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.skipped_existing, 1);
    assert_eq!(report.persisted, 1);
    let anna = storage.load_timeline(0, &AuthorId::new("anna")).await.unwrap();
    assert_eq!(anna.len(), 1);
    assert_eq!(anna[0].id, "old");
}

#[tokio::test]
async fn failing_author_is_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ScanStorage::new(dir.path());
    let provider = provider().with_failing_timeline(AuthorId::new("anna"));

    let mut orchestrator = ScanOrchestrator::resume(storage.clone(), provider, plan())
        .await
        .unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.persisted, 1);
    assert!(!storage.timeline_exists(0, &AuthorId::new("anna")).await.unwrap());
    assert!(storage.timeline_exists(0, &AuthorId::new("ben")).await.unwrap());
    // The id is recorded so the next run picks it up as pending.
    assert!(storage
        .load_author_ids(0)
        .await
        .unwrap()
        .contains(&AuthorId::new("anna")));
}

#[tokio::test]
async fn complete_until_discards_short_timelines() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ScanStorage::new(dir.path());
    let mut plan = plan();
    plan.timeline_mode = TimelineMode::CompleteUntil;
    plan.until = Some(now() - Duration::days(10));

    let mut orchestrator = ScanOrchestrator::resume(storage.clone(), provider(), plan.clone())
        .await
        .unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.persisted, 1);
    assert_eq!(report.incomplete, 1);
    // Walk stopped at the 30-day-old post, which is left out.
    let anna = storage.load_timeline(0, &AuthorId::new("anna")).await.unwrap();
    assert_eq!(anna.len(), 2);
    assert!(!storage.timeline_exists(0, &AuthorId::new("ben")).await.unwrap());

    // Ben is known now, so only the pending pass retries him.
    let mut rerun = ScanOrchestrator::resume(storage, provider(), plan).await.unwrap();
    let second = rerun.run().await.unwrap();
    assert_eq!(second.discovered_per_partition, vec![0]);
    assert_eq!(second.incomplete, 1);
}

#[tokio::test]
async fn pending_ids_are_backfilled() {
    let dir = tempfile::tempdir().unwrap();
    let storage = ScanStorage::new(dir.path());
    storage
        .append_author_ids(0, &[AuthorId::new("carla")])
        .await
        .unwrap();
    let provider = InMemoryProvider::new()
        .with_timeline(AuthorId::new("carla"), vec![post("c1", "carla", 1)]);

    let mut orchestrator = ScanOrchestrator::resume(storage.clone(), provider, plan())
        .await
        .unwrap();
    let report = orchestrator.run().await.unwrap();

    assert_eq!(report.discovered(), 0);
    assert_eq!(report.backfilled, 1);
    assert_eq!(report.persisted, 1);
    assert!(storage.timeline_exists(0, &AuthorId::new("carla")).await.unwrap());

    let mut without_backfill = plan();
    without_backfill.backfill_pending = false;
    storage
        .append_author_ids(0, &[AuthorId::new("dora")])
        .await
        .unwrap();
    let mut skipping = ScanOrchestrator::resume(storage.clone(), InMemoryProvider::new(), without_backfill)
        .await
        .unwrap();
    let quiet = skipping.run().await.unwrap();
    assert_eq!(quiet.backfilled, 0);
    assert!(!storage.timeline_exists(0, &AuthorId::new("dora")).await.unwrap());
}
