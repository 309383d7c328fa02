//! TTL, size and metadata sweeps, and the janitor that schedules them.

mod common;

use common::{Fault, TestCache, png_bytes, test_policy};
use picvault_cache::{CacheError, Janitor, SweepKind};
use picvault_core::config::{CachePolicy, JanitorConfig};
use picvault_core::{DeleteScope, ImageId, UploadStatus};
use time::Duration;
use tokio_util::sync::CancellationToken;

async fn put(cache: &TestCache, id: &str, len: usize) {
    cache
        .controller
        .put(id, png_bytes(len, id.len() as u8), "image/png")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_ttl_sweep_keeps_unarchived_copies() {
    let cache = TestCache::new(test_policy()).await;
    put(&cache, "archived", 100).await;
    cache.archive("archived").await;

    put(&cache, "parked", 100).await;
    cache.remote().fail_puts(Fault::Fatal, 1);
    cache
        .controller
        .archive_now(&ImageId::parse("parked").unwrap())
        .await
        .unwrap();
    assert_eq!(
        cache.record("parked").await.unwrap().upload_status,
        UploadStatus::Failed
    );

    put(&cache, "pending", 100).await;

    cache.clock.advance(Duration::hours(2));
    let report = cache.controller.run_sweep(SweepKind::Ttl).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.bytes_reclaimed, 100);
    assert_eq!(report.skipped_unarchived, 2);
    assert_eq!(report.usage_bytes, 200);

    let archived = cache.record("archived").await.unwrap();
    assert!(!archived.local_present);
    assert!(archived.remote_present);
    assert!(!cache.file_exists(&archived).await);
    for id in ["parked", "pending"] {
        let record = cache.record(id).await.unwrap();
        assert!(record.local_present, "{id} must stay local");
        assert!(cache.file_exists(&record).await);
    }

    // With the override, unarchived copies go too.
    cache
        .controller
        .update_policy(CachePolicy {
            allow_unarchived_eviction: true,
            ..test_policy()
        })
        .await
        .unwrap();
    let report = cache.controller.run_sweep(SweepKind::Ttl).await.unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.policy_version, 2);
    assert_eq!(cache.controller.usage_bytes(), 0);
    assert!(cache.record("parked").await.unwrap().is_tierless());
}

#[tokio::test]
async fn test_ttl_sweep_ignores_young_copies() {
    let cache = TestCache::new(test_policy()).await;
    put(&cache, "young", 100).await;
    cache.archive("young").await;

    cache.clock.advance(Duration::minutes(59));
    let report = cache.controller.run_sweep(SweepKind::Ttl).await.unwrap();
    assert_eq!(report.removed, 0);
    assert!(cache.record("young").await.unwrap().local_present);

    // Reads do not extend the TTL.
    cache.controller.get("young").await.unwrap();
    cache.clock.advance(Duration::minutes(2));
    let report = cache.controller.run_sweep(SweepKind::Ttl).await.unwrap();
    assert_eq!(report.removed, 1);
}

#[tokio::test]
async fn test_size_sweep_evicts_oldest_first() {
    let cache = TestCache::new(test_policy()).await;
    for id in ["img-a", "img-b", "img-c", "img-d"] {
        put(&cache, id, 1000).await;
        cache.archive(id).await;
        cache.clock.advance(Duration::minutes(1));
    }

    // No cap: nothing to do.
    let report = cache.controller.run_sweep(SweepKind::Size).await.unwrap();
    assert_eq!(report.removed, 0);
    assert!(report.target_reached);

    cache
        .controller
        .update_policy(CachePolicy {
            max_local_bytes: 2500,
            ..test_policy()
        })
        .await
        .unwrap();
    let report = cache.controller.run_sweep(SweepKind::Size).await.unwrap();
    assert_eq!(report.removed, 2);
    assert_eq!(report.bytes_reclaimed, 2000);
    assert!(report.target_reached);
    assert_eq!(report.limit_bytes, Some(2500));
    assert_eq!(report.usage_bytes, 2000);

    for (id, local) in [
        ("img-a", false),
        ("img-b", false),
        ("img-c", true),
        ("img-d", true),
    ] {
        let record = cache.record(id).await.unwrap();
        assert_eq!(record.local_present, local, "{id}");
        assert!(record.remote_present, "{id}");
    }
}

#[tokio::test]
async fn test_size_sweep_reports_unreachable_target() {
    let cache = TestCache::new(test_policy()).await;
    put(&cache, "archived", 1000).await;
    cache.archive("archived").await;
    put(&cache, "unarchived-1", 1000).await;
    put(&cache, "unarchived-2", 1000).await;

    cache
        .controller
        .update_policy(CachePolicy {
            max_local_bytes: 1500,
            ..test_policy()
        })
        .await
        .unwrap();
    let report = cache.controller.run_sweep(SweepKind::Size).await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(!report.target_reached);
    assert_eq!(report.skipped_unarchived, 2);
    assert_eq!(cache.controller.usage_bytes(), 2000);
    assert!(cache.record("unarchived-1").await.unwrap().local_present);
    assert!(cache.record("unarchived-2").await.unwrap().local_present);
}

#[tokio::test]
async fn test_metadata_sweep_purges_tierless_records() {
    let cache = TestCache::new(test_policy()).await;

    put(&cache, "tierless", 100).await;
    cache
        .controller
        .delete("tierless", DeleteScope::Local)
        .await
        .unwrap();

    put(&cache, "remote-only", 100).await;
    cache.archive("remote-only").await;
    cache
        .controller
        .delete("remote-only", DeleteScope::Local)
        .await
        .unwrap();
    let key = cache.record("remote-only").await.unwrap().object_key();

    put(&cache, "local", 100).await;

    cache.clock.advance(Duration::days(2));

    put(&cache, "young", 100).await;
    cache
        .controller
        .delete("young", DeleteScope::Local)
        .await
        .unwrap();

    let report = cache
        .controller
        .run_sweep(SweepKind::Metadata)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert!(cache.record("tierless").await.is_none());
    assert!(cache.record("remote-only").await.is_some());
    assert!(cache.record("local").await.is_some());
    assert!(cache.record("young").await.is_some());
    assert!(cache.remote().contains(&key));

    cache
        .controller
        .update_policy(CachePolicy {
            delete_remote_on_metadata_expiry: true,
            ..test_policy()
        })
        .await
        .unwrap();
    let report = cache
        .controller
        .run_sweep(SweepKind::Metadata)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.bytes_reclaimed, 100);
    assert!(cache.record("remote-only").await.is_none());
    assert!(!cache.remote().contains(&key));
    assert!(cache.record("local").await.is_some());
    assert!(cache.record("young").await.is_some());

    // Purged ids stay retired.
    for id in ["tierless", "remote-only"] {
        let err = cache
            .controller
            .put(id, png_bytes(100, 9), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::AlreadyExists(_)), "reusing {id}");
    }
}

#[tokio::test]
async fn test_metadata_sweep_keeps_record_when_remote_delete_fails() {
    let policy = CachePolicy {
        delete_remote_on_metadata_expiry: true,
        ..test_policy()
    };
    let cache = TestCache::new(policy).await;
    put(&cache, "remote-only", 100).await;
    cache.archive("remote-only").await;
    cache
        .controller
        .delete("remote-only", DeleteScope::Local)
        .await
        .unwrap();

    cache.clock.advance(Duration::days(2));
    cache.remote().fail_deletes(Fault::Transient, 1);

    let report = cache
        .controller
        .run_sweep(SweepKind::Metadata)
        .await
        .unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.errors, 1);
    assert!(cache.record("remote-only").await.unwrap().remote_present);

    let report = cache
        .controller
        .run_sweep(SweepKind::Metadata)
        .await
        .unwrap();
    assert_eq!(report.removed, 1);
}

#[tokio::test]
async fn test_janitor_runs_sweeps_on_schedule() {
    let cache = TestCache::new(test_policy()).await;
    put(&cache, "photo", 100).await;
    cache.archive("photo").await;
    cache.clock.advance(Duration::hours(2));

    let shutdown = CancellationToken::new();
    let janitor = Janitor::new(
        cache.controller.clone(),
        JanitorConfig {
            ttl_sweep_interval_secs: 1,
            size_sweep_interval_secs: 1,
            metadata_sweep_enabled: false,
            ..JanitorConfig::default()
        },
    )
    .spawn(shutdown.clone());

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    while cache.record("photo").await.unwrap().local_present {
        assert!(
            tokio::time::Instant::now() < deadline,
            "TTL sweep did not run"
        );
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert_eq!(cache.controller.usage_bytes(), 0);

    shutdown.cancel();
    janitor.await.unwrap();
}
