//! Read, write and delete paths of the cache controller.

mod common;

use bytes::Bytes;
use common::{TestCache, png_bytes, test_policy};
use picvault_cache::{CacheError, Tier};
use picvault_core::config::{CachePolicy, EvictionOrder};
use picvault_core::{DeleteScope, UploadStatus};
use time::Duration;

#[tokio::test]
async fn test_put_then_get_returns_identical_bytes() {
    let cache = TestCache::new(test_policy()).await;
    let bytes = png_bytes(4096, 1);

    let record = cache
        .controller
        .put("photo-1", bytes.clone(), "image/png")
        .await
        .unwrap();
    assert!(record.local_present);
    assert!(!record.remote_present);
    assert_eq!(record.upload_status, UploadStatus::Pending);
    assert_eq!(record.size_bytes, 4096);
    assert!(cache.file_exists(&record).await);
    assert_eq!(cache.controller.usage_bytes(), 4096);

    let image = cache.controller.get("photo-1").await.unwrap();
    assert_eq!(image.bytes, bytes);
    assert_eq!(image.content_type, "image/png");
    assert_eq!(image.tier, Tier::Local);
}

#[tokio::test]
async fn test_get_records_access_time() {
    let cache = TestCache::new(test_policy()).await;
    cache
        .controller
        .put("photo-1", png_bytes(64, 1), "image/png")
        .await
        .unwrap();
    let before = cache.record("photo-1").await.unwrap();

    cache.clock.advance(Duration::minutes(5));
    cache.controller.get("photo-1").await.unwrap();

    let after = cache.record("photo-1").await.unwrap();
    assert_eq!(after.last_accessed_at, before.last_accessed_at + Duration::minutes(5));
    assert_eq!(after.created_at, before.created_at);
}

#[tokio::test]
async fn test_delete_local_then_all() {
    let cache = TestCache::new(test_policy()).await;
    let bytes = png_bytes(1024, 7);

    cache
        .controller
        .put("a1", bytes.clone(), "image/png")
        .await
        .unwrap();
    let image = cache.controller.get("a1").await.unwrap();
    assert_eq!(image.bytes.len(), 1024);
    assert_eq!(image.bytes, bytes);

    let report = cache
        .controller
        .delete("a1", DeleteScope::Local)
        .await
        .unwrap();
    assert!(report.existed);
    assert!(report.local_removed);
    assert!(!report.remote_removed);
    assert!(!report.record_removed);

    let record = cache.record("a1").await.unwrap();
    assert!(!record.local_present);
    assert!(!record.remote_present);
    assert!(!cache.file_exists(&record).await);
    assert_eq!(cache.controller.usage_bytes(), 0);
    assert!(matches!(
        cache.controller.get("a1").await,
        Err(CacheError::NotFound(_))
    ));

    let report = cache
        .controller
        .delete("a1", DeleteScope::All)
        .await
        .unwrap();
    assert!(report.record_removed);
    assert!(cache.record("a1").await.is_none());
    assert!(matches!(
        cache.controller.get("a1").await,
        Err(CacheError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_size_cap_evicts_oldest_archived_copy() {
    let policy = CachePolicy {
        max_local_bytes: 2048,
        ..test_policy()
    };
    let cache = TestCache::new(policy).await;

    for (i, id) in ["first", "second", "third"].into_iter().enumerate() {
        cache
            .controller
            .put(id, png_bytes(1024, i as u8), "image/png")
            .await
            .unwrap();
        cache.archive(id).await;
        cache.clock.advance(Duration::minutes(1));
    }

    let first = cache.record("first").await.unwrap();
    assert!(!first.local_present);
    assert!(first.remote_present);
    assert!(!cache.file_exists(&first).await);

    for id in ["second", "third"] {
        let record = cache.record(id).await.unwrap();
        assert!(record.local_present, "{id} should still be local");
        assert!(record.remote_present);
    }
    assert_eq!(cache.controller.usage_bytes(), 2048);

    // No room to repopulate: served from the archive, local stays empty.
    let image = cache.controller.get("first").await.unwrap();
    assert_eq!(image.tier, Tier::Remote);
    assert!(!cache.record("first").await.unwrap().local_present);
    assert_eq!(cache.controller.usage_bytes(), 2048);
}

#[tokio::test]
async fn test_size_cap_follows_last_accessed_order() {
    let policy = CachePolicy {
        max_local_bytes: 2048,
        eviction_order: EvictionOrder::LastAccessed,
        ..test_policy()
    };
    let cache = TestCache::new(policy).await;

    for (i, id) in ["old", "new"].into_iter().enumerate() {
        cache
            .controller
            .put(id, png_bytes(1024, i as u8), "image/png")
            .await
            .unwrap();
        cache.archive(id).await;
        cache.clock.advance(Duration::minutes(1));
    }
    // Reading "old" makes "new" the least recently used.
    cache.controller.get("old").await.unwrap();
    cache.clock.advance(Duration::minutes(1));

    cache
        .controller
        .put("newest", png_bytes(1024, 9), "image/png")
        .await
        .unwrap();

    assert!(cache.record("old").await.unwrap().local_present);
    assert!(!cache.record("new").await.unwrap().local_present);
    assert!(cache.record("newest").await.unwrap().local_present);
}

#[tokio::test]
async fn test_full_cache_of_unarchived_images_rejects_put() {
    let policy = CachePolicy {
        max_local_bytes: 2048,
        ..test_policy()
    };
    let cache = TestCache::new(policy).await;
    for (i, id) in ["one", "two"].into_iter().enumerate() {
        cache
            .controller
            .put(id, png_bytes(1024, i as u8), "image/png")
            .await
            .unwrap();
    }

    let err = cache
        .controller
        .put("three", png_bytes(1024, 3), "image/png")
        .await
        .unwrap_err();
    match err {
        CacheError::StorageFull {
            needed,
            limit,
            used,
        } => {
            assert_eq!(needed, 1024);
            assert_eq!(limit, 2048);
            assert_eq!(used, 2048);
        }
        other => panic!("expected StorageFull, got {other:?}"),
    }

    assert!(cache.record("three").await.is_none());
    assert!(cache.record("one").await.unwrap().local_present);
    assert!(cache.record("two").await.unwrap().local_present);
    assert_eq!(cache.controller.usage_bytes(), 2048);
}

#[tokio::test]
async fn test_image_larger_than_cap_is_rejected() {
    let policy = CachePolicy {
        max_local_bytes: 1000,
        ..test_policy()
    };
    let cache = TestCache::new(policy).await;

    let err = cache
        .controller
        .put("huge", png_bytes(1001, 0), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::StorageFull { .. }));
    assert_eq!(cache.controller.usage_bytes(), 0);
}

#[tokio::test]
async fn test_evicted_archived_image_is_repopulated() {
    let cache = TestCache::new(test_policy()).await;
    let bytes = png_bytes(2000, 3);
    cache
        .controller
        .put("photo", bytes.clone(), "image/jpeg")
        .await
        .unwrap();
    cache.archive("photo").await;

    cache
        .controller
        .delete("photo", DeleteScope::Local)
        .await
        .unwrap();
    assert_eq!(cache.controller.usage_bytes(), 0);

    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.tier, Tier::Remote);
    assert_eq!(image.bytes, bytes);
    assert_eq!(image.content_type, "image/jpeg");

    let record = cache.record("photo").await.unwrap();
    assert!(record.local_present);
    assert!(cache.file_exists(&record).await);
    assert_eq!(cache.controller.usage_bytes(), 2000);

    let gets_before = cache.remote().get_count();
    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.tier, Tier::Local);
    assert_eq!(image.bytes, bytes);
    assert_eq!(cache.remote().get_count(), gets_before);
}

#[tokio::test]
async fn test_corrupt_remote_copy_is_a_miss() {
    let cache = TestCache::new(test_policy()).await;
    let record = cache
        .controller
        .put("photo", png_bytes(512, 3), "image/png")
        .await
        .unwrap();
    cache.archive("photo").await;
    cache
        .controller
        .delete("photo", DeleteScope::Local)
        .await
        .unwrap();

    cache.remote().corrupt(&record.object_key());

    assert!(matches!(
        cache.controller.get("photo").await,
        Err(CacheError::NotFound(_))
    ));
    let record = cache.record("photo").await.unwrap();
    assert!(!record.local_present);
    assert!(!cache.file_exists(&record).await);
}

#[tokio::test]
async fn test_remote_failure_reports_not_found() {
    let cache = TestCache::new(test_policy()).await;
    cache
        .controller
        .put("photo", png_bytes(512, 3), "image/png")
        .await
        .unwrap();
    cache.archive("photo").await;
    cache
        .controller
        .delete("photo", DeleteScope::Local)
        .await
        .unwrap();

    cache.remote().fail_gets(common::Fault::Transient, 1);
    assert!(matches!(
        cache.controller.get("photo").await,
        Err(CacheError::NotFound(_))
    ));

    // The next read goes through.
    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.tier, Tier::Remote);
}

#[tokio::test]
async fn test_vanished_local_file_clears_flag() {
    let cache = TestCache::local_only(test_policy()).await;
    let record = cache
        .controller
        .put("photo", png_bytes(300, 3), "image/png")
        .await
        .unwrap();

    cache.local.delete(&record.object_key()).await.unwrap();

    assert!(matches!(
        cache.controller.get("photo").await,
        Err(CacheError::NotFound(_))
    ));
    let record = cache.record("photo").await.unwrap();
    assert!(!record.local_present);
    assert_eq!(cache.controller.usage_bytes(), 0);
}

#[tokio::test]
async fn test_vanished_local_file_falls_back_to_remote() {
    let cache = TestCache::new(test_policy()).await;
    let bytes = png_bytes(300, 3);
    let record = cache
        .controller
        .put("photo", bytes.clone(), "image/png")
        .await
        .unwrap();
    cache.archive("photo").await;

    cache.local.delete(&record.object_key()).await.unwrap();

    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.tier, Tier::Remote);
    assert_eq!(image.bytes, bytes);
    // Repopulated.
    assert!(cache.record("photo").await.unwrap().local_present);
    assert!(cache.file_exists(&record).await);
    assert_eq!(cache.controller.usage_bytes(), 300);
}

#[tokio::test]
async fn test_duplicate_put_is_rejected() {
    let cache = TestCache::new(test_policy()).await;
    let original = png_bytes(100, 1);
    cache
        .controller
        .put("photo", original.clone(), "image/png")
        .await
        .unwrap();

    let err = cache
        .controller
        .put("photo", png_bytes(200, 2), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::AlreadyExists(_)));

    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.bytes, original);
    assert_eq!(cache.controller.usage_bytes(), 100);
}

#[tokio::test]
async fn test_deleted_id_cannot_be_reused() {
    let cache = TestCache::new(test_policy()).await;
    cache
        .controller
        .put("a1", png_bytes(1024, 1), "image/png")
        .await
        .unwrap();
    cache
        .controller
        .delete("a1", DeleteScope::All)
        .await
        .unwrap();
    assert!(cache.record("a1").await.is_none());

    let err = cache
        .controller
        .put("a1", png_bytes(2048, 2), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::AlreadyExists(_)));

    assert!(cache.record("a1").await.is_none());
    assert!(matches!(
        cache.controller.get("a1").await,
        Err(CacheError::NotFound(_))
    ));
    assert_eq!(cache.controller.usage_bytes(), 0);
    assert_eq!(cache.remote().object_count(), 0);
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let cache = TestCache::new(test_policy()).await;

    for id in ["", "../etc/passwd", "has space", &"x".repeat(129)] {
        let err = cache
            .controller
            .put(id, png_bytes(10, 0), "image/png")
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidInput(_)), "id {id:?}");
    }

    let err = cache
        .controller
        .put("doc", png_bytes(10, 0), "text/plain")
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidInput(_)));

    let err = cache
        .controller
        .put("empty", Bytes::new(), "image/png")
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidInput(_)));

    assert!(matches!(
        cache.controller.get("../x").await,
        Err(CacheError::InvalidInput(_))
    ));
    assert_eq!(cache.controller.stats().await.unwrap().images.total, 0);
}

#[tokio::test]
async fn test_put_base64_data_url() {
    use base64::Engine;

    let cache = TestCache::new(test_policy()).await;
    let bytes = png_bytes(256, 4);
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let payload = format!("data:image/gif;base64,{encoded}");

    let record = cache
        .controller
        .put_base64(&payload, Some("image/png"))
        .await
        .unwrap();
    assert_eq!(record.content_type, "image/gif");
    assert_eq!(record.id.as_str().len(), 36);

    let image = cache.controller.get(record.id.as_str()).await.unwrap();
    assert_eq!(image.bytes, bytes);
    assert_eq!(image.content_type, "image/gif");

    let err = cache
        .controller
        .put_base64("not base64!", None)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_remote_parks_archived_record() {
    let cache = TestCache::new(test_policy()).await;
    let record = cache
        .controller
        .put("photo", png_bytes(100, 1), "image/png")
        .await
        .unwrap();
    cache.archive("photo").await;
    assert!(cache.remote().contains(&record.object_key()));

    let report = cache
        .controller
        .delete("photo", DeleteScope::Remote)
        .await
        .unwrap();
    assert!(report.remote_removed);
    assert!(!report.local_removed);
    assert!(!cache.remote().contains(&record.object_key()));

    let record = cache.record("photo").await.unwrap();
    assert!(record.local_present);
    assert!(!record.remote_present);
    assert!(record.is_parked());

    // Still served locally.
    let image = cache.controller.get("photo").await.unwrap();
    assert_eq!(image.tier, Tier::Local);
}

#[tokio::test]
async fn test_delete_remote_failure_changes_nothing() {
    let cache = TestCache::new(test_policy()).await;
    let record = cache
        .controller
        .put("photo", png_bytes(100, 1), "image/png")
        .await
        .unwrap();
    cache.archive("photo").await;

    cache.remote().fail_deletes(common::Fault::Transient, 1);
    let err = cache
        .controller
        .delete("photo", DeleteScope::All)
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::RemoteTransient(_)));

    let after = cache.record("photo").await.unwrap();
    assert!(after.local_present);
    assert!(after.remote_present);
    assert!(cache.remote().contains(&record.object_key()));
    assert!(cache.file_exists(&record).await);
}

#[tokio::test]
async fn test_delete_of_absent_tiers_is_a_noop() {
    let cache = TestCache::new(test_policy()).await;
    cache
        .controller
        .put("photo", png_bytes(100, 1), "image/png")
        .await
        .unwrap();

    let report = cache
        .controller
        .delete("photo", DeleteScope::Remote)
        .await
        .unwrap();
    assert!(report.existed);
    assert!(!report.remote_removed);
    assert!(cache.record("photo").await.unwrap().local_present);

    let report = cache
        .controller
        .delete("missing", DeleteScope::All)
        .await
        .unwrap();
    assert!(!report.existed);
    assert!(!report.record_removed);
}

#[tokio::test]
async fn test_reconcile_removes_orphans_and_clears_missing_files() {
    let cache = TestCache::local_only(test_policy()).await;
    cache
        .controller
        .put("kept", png_bytes(100, 1), "image/png")
        .await
        .unwrap();
    let lost = cache
        .controller
        .put("lost", png_bytes(200, 2), "image/png")
        .await
        .unwrap();

    cache
        .local
        .put("orphan.png", png_bytes(50, 3))
        .await
        .unwrap();
    cache.local.delete(&lost.object_key()).await.unwrap();

    let report = cache.controller.reconcile().await.unwrap();
    assert_eq!(report.files_scanned, 2);
    assert_eq!(report.orphan_files_removed, 1);
    assert_eq!(report.missing_files_cleared, 1);
    assert_eq!(report.usage_before, 300);
    assert_eq!(report.usage_after, 100);
    assert_eq!(report.errors, 0);

    assert!(!cache.local.exists("orphan.png").await.unwrap());
    assert!(!cache.record("lost").await.unwrap().local_present);
    assert_eq!(cache.controller.usage_bytes(), 100);
}

#[tokio::test]
async fn test_stats_and_policy_updates() {
    let cache = TestCache::new(test_policy()).await;
    cache
        .controller
        .put("a", png_bytes(100, 1), "image/png")
        .await
        .unwrap();
    cache
        .controller
        .put("b", png_bytes(50, 2), "image/png")
        .await
        .unwrap();
    cache.archive("a").await;

    let stats = cache.controller.stats().await.unwrap();
    assert_eq!(stats.images.total, 2);
    assert_eq!(stats.images.local_bytes, 150);
    assert_eq!(stats.images.done, 1);
    assert_eq!(stats.images.pending, 1);
    assert_eq!(stats.usage_bytes, 150);
    assert!(stats.remote_enabled);
    assert_eq!(stats.policy_version, 1);
    assert_eq!(stats.max_local_bytes, None);

    let mut invalid = test_policy();
    invalid.local_ttl_hours = 0;
    assert!(matches!(
        cache.controller.update_policy(invalid).await,
        Err(CacheError::InvalidInput(_))
    ));
    assert_eq!(cache.controller.policy().version, 1);

    let updated = cache
        .controller
        .update_policy(CachePolicy {
            max_local_bytes: 10_000,
            ..test_policy()
        })
        .await
        .unwrap();
    assert_eq!(updated.version, 2);
    let stats = cache.controller.stats().await.unwrap();
    assert_eq!(stats.policy_version, 2);
    assert_eq!(stats.max_local_bytes, Some(10_000));
}
