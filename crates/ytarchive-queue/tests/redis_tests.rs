//! Redis-backed integration tests for the work queue and job tracker.
//!
//! Run with `REDIS_URL` pointing at a disposable instance:
//! `cargo test -p ytarchive-queue -- --ignored`

use std::collections::HashSet;
use std::time::Duration;

use ytarchive_models::{JobState, JobStatusRecord};
use ytarchive_queue::{JobTracker, KeySpace, QueueConfig, QueueError, RedisStore, WorkQueue};

/// Fresh namespace per test so parallel runs never share keys.
fn test_config() -> QueueConfig {
    dotenvy::dotenv().ok();
    QueueConfig::from_env().with_namespace(format!("ytarchive-test:{}:", uuid::Uuid::new_v4()))
}

fn clients(config: &QueueConfig) -> (WorkQueue, JobTracker) {
    let store = RedisStore::from_config(config).expect("Failed to create store");
    let keys = KeySpace::new(config.namespace.clone());
    let queue = WorkQueue::new(store.clone(), keys.clone());
    let tracker = JobTracker::new(store, keys)
        .with_job_ttl(config.job_ttl)
        .with_stale_grace(config.stale_grace);
    (queue, tracker)
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_fifo_across_enqueue_calls() {
    let (queue, _) = clients(&test_config());

    queue.enqueue("c1", &["v1", "v2"]).await.expect("enqueue");
    queue.enqueue("c1", &["v3"]).await.expect("enqueue");
    queue.enqueue("c1", &["v4", "v5", "v6"]).await.expect("enqueue");

    let claimed = queue.claim("c1", 100).await.expect("claim");
    assert_eq!(claimed, vec!["v1", "v2", "v3", "v4", "v5", "v6"]);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_single_claims_are_exclusive() {
    let (queue, _) = clients(&test_config());
    let items = ["v1", "v2", "v3", "v4", "v5"];
    queue.enqueue("c1", &items).await.expect("enqueue");

    let claims = (0..5).map(|_| {
        let queue = queue.clone();
        async move { queue.claim("c1", 1).await.expect("claim") }
    });
    let results = futures::future::join_all(claims).await;

    let mut seen = Vec::new();
    for batch in results {
        assert_eq!(batch.len(), 1);
        seen.extend(batch);
    }
    seen.sort();
    assert_eq!(seen, items);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_batch_claims_drain_without_duplicates() {
    let (queue, _) = clients(&test_config());
    let items: Vec<String> = (0..500).map(|i| format!("vid-{i:04}")).collect();
    queue.enqueue("c1", &items).await.expect("enqueue");

    let mut workers = Vec::new();
    for batch_size in [1, 3, 7, 16, 25, 50] {
        let queue = queue.clone();
        workers.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = queue.claim("c1", batch_size).await.expect("claim");
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch);
            }
            mine
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await.expect("worker panicked"));
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), items.len(), "items claimed more than once or lost");
    assert_eq!(unique.len(), items.len());
    assert_eq!(queue.len("c1").await.expect("len"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_partial_claim_then_empty() {
    let (queue, _) = clients(&test_config());
    queue.enqueue("c1", &["a", "b", "c"]).await.expect("enqueue");

    let claimed = queue.claim("c1", 10).await.expect("claim");
    assert_eq!(claimed, vec!["a", "b", "c"]);
    assert_eq!(queue.len("c1").await.expect("len"), 0);

    let again = queue.claim("c1", 10).await.expect("claim");
    assert!(again.is_empty());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_peek_len_requeue_and_listing() {
    let (queue, _) = clients(&test_config());
    queue.enqueue("c1", &["a", "b", "c", "d"]).await.expect("enqueue");
    queue.enqueue("c2", &["x"]).await.expect("enqueue");

    assert_eq!(queue.peek("c1", 2).await.expect("peek"), vec!["a", "b"]);
    assert_eq!(queue.len("c1").await.expect("len"), 4);

    let claimed = queue.claim("c1", 3).await.expect("claim");
    queue.requeue_front("c1", &claimed[1..]).await.expect("requeue");
    assert_eq!(queue.peek("c1", 10).await.expect("peek"), vec!["b", "c", "d"]);

    assert_eq!(queue.list_queue_keys().await.expect("list"), vec!["c1", "c2"]);

    queue.clear("c2").await.expect("clear");
    assert_eq!(queue.len("c2").await.expect("len"), 0);
    assert_eq!(queue.list_queue_keys().await.expect("list"), vec!["c1"]);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_status_round_trip() {
    let (_, tracker) = clients(&test_config());

    let mut record = JobStatusRecord::new("c1", "v1", "worker-a");
    record.start_downloading();
    record.set_progress(0.5);
    tracker.update_progress(&mut record).await.expect("update");

    let stored = tracker
        .get_status("c1", "v1")
        .await
        .expect("get")
        .expect("record should exist");
    assert_eq!(stored.progress, 0.5);
    assert_eq!(stored.status, JobState::Downloading);
    assert_eq!(stored.worker_id, "worker-a");

    assert!(tracker.get_status("c1", "missing").await.expect("get").is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_index_consistency_on_remove() {
    let (_, tracker) = clients(&test_config());

    let mut record = JobStatusRecord::new("c1", "v1", "worker-a");
    record.start_downloading();
    tracker.update_progress(&mut record).await.expect("update");

    let active = tracker.get_active_jobs("c1").await.expect("active");
    assert!(active.iter().any(|r| r.video_id == "v1"));
    assert_eq!(tracker.get_active_job_count("c1").await.expect("count"), 1);
    assert_eq!(tracker.get_total_active_job_count().await.expect("count"), 1);

    tracker.remove_job("c1", "v1").await.expect("remove");

    assert!(tracker.get_active_jobs("c1").await.expect("active").is_empty());
    assert!(tracker.get_status("c1", "v1").await.expect("get").is_none());
    assert_eq!(tracker.get_total_active_job_count().await.expect("count"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_clear_channel_jobs_leaves_other_channels() {
    let (_, tracker) = clients(&test_config());

    for (channel, video) in [("c1", "v1"), ("c1", "v2"), ("c2", "v9")] {
        let mut record = JobStatusRecord::new(channel, video, "worker-a");
        record.start_downloading();
        tracker.update_progress(&mut record).await.expect("update");
    }

    assert_eq!(tracker.clear_channel_jobs("c1").await.expect("clear"), 2);
    assert_eq!(tracker.clear_channel_jobs("c1").await.expect("clear"), 0);

    assert!(tracker.get_status("c1", "v1").await.expect("get").is_none());
    assert_eq!(tracker.get_active_job_count("c1").await.expect("count"), 0);

    let all = tracker.get_all_active_jobs().await.expect("all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].video_id, "v9");
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_expired_records_are_reaped_from_indexes() {
    let config = test_config();
    let (_, tracker) = clients(&config);
    let tracker = tracker.with_job_ttl(Duration::from_secs(1));

    let mut record = JobStatusRecord::new("c1", "short-lived", "worker-a");
    record.start_downloading();
    tracker.update_progress(&mut record).await.expect("update");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Count still includes the dangling index entry until a read walks it.
    assert_eq!(tracker.get_active_job_count("c1").await.expect("count"), 1);
    assert!(tracker.get_active_jobs("c1").await.expect("active").is_empty());

    // Cleanup runs in the background; give it a moment.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tracker.get_active_job_count("c1").await.expect("count"), 0);
    assert_eq!(tracker.get_total_active_job_count().await.expect("count"), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stale_terminal_records_hidden_from_listing() {
    let config = test_config();
    let (_, tracker) = clients(&config);
    let tracker = tracker.with_stale_grace(Duration::from_secs(1));

    let mut record = JobStatusRecord::new("c1", "done", "worker-a");
    record.complete();
    tracker.update_progress(&mut record).await.expect("update");

    assert_eq!(tracker.get_all_active_jobs().await.expect("all").len(), 1);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(tracker.get_all_active_jobs().await.expect("all").is_empty());
    // The record itself is still readable until its TTL runs out.
    assert!(tracker.get_status("c1", "done").await.expect("get").is_some());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_corrupt_record_is_distinct_from_missing() {
    let config = test_config();
    let (_, tracker) = clients(&config);
    let keys = KeySpace::new(config.namespace.clone());

    let mut good = JobStatusRecord::new("c1", "good", "worker-a");
    good.start_downloading();
    tracker.update_progress(&mut good).await.expect("update");

    // Plant an unreadable record with both index entries, as a buggy writer would.
    let junk_key = keys.job_key("c1", "junk");
    let client = redis::Client::open(config.redis_url.as_str()).expect("client");
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("connect");
    let _: () = redis::pipe()
        .set(&junk_key, "{not json")
        .ignore()
        .sadd(keys.active_jobs_key(), &junk_key)
        .ignore()
        .sadd(keys.channel_jobs_key("c1"), &junk_key)
        .ignore()
        .query_async(&mut conn)
        .await
        .expect("plant junk");

    let err = tracker.get_status("c1", "junk").await.unwrap_err();
    assert!(
        matches!(err, QueueError::Serialization { ref key, .. } if *key == junk_key),
        "unexpected error: {err}"
    );
    assert!(tracker.get_status("c1", "missing").await.expect("get").is_none());

    let active = tracker.get_active_jobs("c1").await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].video_id, "good");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(tracker.get_active_job_count("c1").await.expect("count"), 1);
    assert_eq!(tracker.get_total_active_job_count().await.expect("count"), 1);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_huge_claim_and_peek_counts() {
    let (queue, _) = clients(&test_config());
    queue.enqueue("c1", &["v1", "v2"]).await.expect("enqueue");

    assert_eq!(queue.peek("c1", usize::MAX).await.expect("peek"), vec!["v1", "v2"]);
    assert_eq!(queue.claim("c1", usize::MAX).await.expect("claim"), vec!["v1", "v2"]);
    assert_eq!(queue.len("c1").await.expect("len"), 0);
}
