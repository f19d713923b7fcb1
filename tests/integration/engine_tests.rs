//! End-to-end fetch behavior.
//!
//! Tests verify:
//! - Memory, disk and decode resolution order
//! - Concurrent requests for one thumbnail share a single load
//! - Failed loads are not cached and can be retried
//! - Orientation is applied to generated thumbnails
//! - Shutdown stops new loads but keeps serving memory hits

use std::time::Duration;

use tempfile::TempDir;

use thumbnail_engine::{FsImageSource, HitSource, ImageId, ThumbnailEngine};

use super::test_utils::{
    create_engine, create_test_jpeg, image_ids, is_valid_jpeg, test_config, MockImageSource,
};

// =============================================================================
// Resolution Order
// =============================================================================

#[tokio::test]
async fn test_cold_fetch_decodes_and_populates_both_tiers() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new().with_image("42", create_test_jpeg(800, 600, 0, None));
    let (engine, source) = create_engine(test_config(&dir), source).await;
    let id = ImageId::new("42");

    let thumb = engine.fetch_with_hit(&id, Some(256)).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert_eq!(thumb.image.width().max(thumb.image.height()), 256);

    assert!(engine.has_in_memory(&id, Some(256)).await);
    assert!(engine.has_on_disk(&id, Some(256)).await);

    let key = engine.cache_key(&id, Some(256));
    let stored = std::fs::read(dir.path().join("thumbs").join(key.file_name())).unwrap();
    assert!(is_valid_jpeg(&stored));

    let again = engine.fetch_with_hit(&id, Some(256)).await.unwrap();
    assert_eq!(again.source, HitSource::Memory);
    assert_eq!(source.read_count(), 1);
}

#[tokio::test]
async fn test_clear_memory_then_fetch_hits_disk() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 640, 480)).await;
    let id = &image_ids(1)[0];

    let decoded = engine.fetch_with_hit(id, None).await.unwrap();
    engine.clear_memory().await;
    assert!(!engine.has_in_memory(id, None).await);

    let from_disk = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(from_disk.source, HitSource::Disk);
    assert_eq!(
        (from_disk.image.width(), from_disk.image.height()),
        (decoded.image.width(), decoded.image.height())
    );

    // Memory repopulated from disk
    assert!(engine.has_in_memory(id, None).await);
    let again = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(again.source, HitSource::Memory);
    assert_eq!(source.read_count(), 1);
}

#[tokio::test]
async fn test_clear_disk_then_fetch_decodes_again() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 640, 480)).await;
    let id = &image_ids(1)[0];

    engine.fetch(id, None).await.unwrap();
    engine.clear_disk().await;
    engine.clear_memory().await;
    assert!(!engine.has_on_disk(id, None).await);

    let thumb = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert_eq!(source.read_count(), 2);
    assert!(engine.has_on_disk(id, None).await);
}

#[tokio::test]
async fn test_sizes_are_cached_independently() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 640, 480)).await;
    let id = &image_ids(1)[0];

    let small = engine.fetch_with_hit(id, Some(64)).await.unwrap();
    let large = engine.fetch_with_hit(id, Some(200)).await.unwrap();

    assert_eq!(small.source, HitSource::Decode);
    assert_eq!(large.source, HitSource::Decode);
    assert_eq!(small.image.width(), 64);
    assert_eq!(large.image.width(), 200);
    assert_ne!(engine.cache_key(id, Some(64)), engine.cache_key(id, Some(200)));
    assert_eq!(source.read_count(), 2);
}

#[tokio::test]
async fn test_small_original_is_not_upscaled() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new().with_image("tiny", create_test_jpeg(40, 20, 0, None));
    let (engine, _) = create_engine(test_config(&dir), source).await;

    let thumb = engine.fetch(&ImageId::new("tiny"), Some(256)).await.unwrap();
    assert_eq!((thumb.width(), thumb.height()), (40, 20));
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_concurrent_fetches_decode_once() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new()
        .with_image("42", create_test_jpeg(1024, 768, 0, None))
        .with_delay(Duration::from_millis(50));
    let (engine, source) = create_engine(test_config(&dir), source).await;
    let id = ImageId::new("42");

    let (a, b) = tokio::join!(
        engine.fetch_with_hit(&id, Some(256)),
        engine.fetch_with_hit(&id, Some(256))
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(source.reads_of("42"), 1);
    assert_eq!(a.source, HitSource::Decode);
    assert_eq!(b.source, HitSource::Decode);
    assert_eq!(a.image.as_bytes(), b.image.as_bytes());

    // Each caller counts its resolution; the pipeline ran once
    let stats = engine.stats();
    assert_eq!(stats.decode_resolutions, 2);
    assert_eq!(stats.pipeline_runs, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_fetches_share_one_load() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new()
        .with_images(1, 640, 480)
        .with_delay(Duration::from_millis(100));
    let (engine, source) = create_engine(test_config(&dir), source).await;
    let id = image_ids(1).remove(0);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let engine = engine.clone();
        let id = id.clone();
        handles.push(tokio::spawn(async move { engine.fetch_with_hit(&id, None).await }));
    }

    let mut images = Vec::new();
    for handle in handles {
        let thumb = handle.await.unwrap().expect("fetch should succeed");
        images.push(thumb.image);
    }

    assert_eq!(source.read_count(), 1);
    assert!(images.iter().all(|img| img.as_bytes() == images[0].as_bytes()));
    assert_eq!(engine.loads_in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_keys_load_in_parallel() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new()
        .with_images(4, 320, 240)
        .with_delay(Duration::from_millis(100));
    let (engine, source) = create_engine(test_config(&dir), source).await;
    let ids = image_ids(4);

    let mut handles = Vec::new();
    for id in ids {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.fetch(&id, None).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }

    assert_eq!(source.read_count(), 4);
    assert!(source.max_concurrent_reads() > 1);
}

#[tokio::test]
async fn test_caller_cancellation_does_not_abort_shared_load() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new()
        .with_images(1, 320, 240)
        .with_delay(Duration::from_millis(100));
    let (engine, source) = create_engine(test_config(&dir), source).await;
    let id = image_ids(1).remove(0);

    // First caller gives up before the load finishes
    let abandoned = tokio::time::timeout(Duration::from_millis(10), engine.fetch(&id, None)).await;
    assert!(abandoned.is_err());

    let thumb = engine.fetch_with_hit(&id, None).await.unwrap();
    assert_ne!(thumb.source, HitSource::Memory);
    assert_eq!(source.read_count(), 1);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_failed_load_is_not_cached_and_can_retry() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 320, 240)).await;
    let id = &image_ids(1)[0];

    source.set_failing(true);
    assert!(engine.fetch_with_hit(id, None).await.is_none());
    assert!(!engine.is_loading(id, None));
    assert!(!engine.has_in_memory(id, None).await);
    assert!(!engine.has_on_disk(id, None).await);

    source.set_failing(false);
    let thumb = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert_eq!(source.read_count(), 2);

    let stats = engine.stats();
    assert_eq!(stats.failures, 1);
    assert_eq!(stats.decode_resolutions, 1);
    assert_eq!(stats.pipeline_runs, 2);
}

#[tokio::test]
async fn test_undecodable_original_is_absent() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new().with_image("junk", b"definitely not an image".to_vec());
    let (engine, _) = create_engine(test_config(&dir), source).await;

    assert!(engine.fetch(&ImageId::new("junk"), None).await.is_none());
    assert!(engine.fetch(&ImageId::new("missing"), None).await.is_none());
    assert_eq!(engine.disk_usage().await.files, 0);
}

#[tokio::test]
async fn test_truncated_original_is_absent_and_not_cached() {
    let dir = TempDir::new().unwrap();
    let full = create_test_jpeg(512, 512, 40, None);
    let half = full[..full.len() / 2].to_vec();
    let source = MockImageSource::new().with_image("half.jpg", half);
    let (engine, _) = create_engine(test_config(&dir), source).await;
    let id = ImageId::new("half.jpg");

    assert!(engine.fetch(&id, None).await.is_none());
    assert!(!engine.has_in_memory(&id, None).await);
    assert_eq!(engine.disk_usage().await.files, 0);
    assert_eq!(engine.stats().failures, 1);
}

#[tokio::test]
async fn test_corrupt_disk_entry_falls_back_to_decode() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 320, 240)).await;
    let id = &image_ids(1)[0];

    engine.fetch(id, None).await.unwrap();
    engine.clear_memory().await;

    let path = dir.path().join("thumbs").join(engine.cache_key(id, None).file_name());
    std::fs::write(&path, b"garbage").unwrap();

    let thumb = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert_eq!(source.read_count(), 2);
    assert!(is_valid_jpeg(&std::fs::read(&path).unwrap()));
}

#[tokio::test]
async fn test_disk_write_failure_still_returns_image() {
    let dir = TempDir::new().unwrap();
    let (engine, _) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(1, 320, 240)).await;
    let id = &image_ids(1)[0];

    // Replace the cache directory with a plain file so writes fail
    let cache_dir = dir.path().join("thumbs");
    std::fs::remove_dir_all(&cache_dir).unwrap();
    std::fs::write(&cache_dir, b"in the way").unwrap();

    let thumb = engine.fetch_with_hit(id, None).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert!(engine.has_in_memory(id, None).await);
    assert!(!engine.has_on_disk(id, None).await);
}

// =============================================================================
// Orientation
// =============================================================================

#[tokio::test]
async fn test_orientation_applied_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut source = MockImageSource::new();
    for code in 1..=8u16 {
        let jpeg = create_test_jpeg(200, 100, 0, Some(code));
        source = source.with_image(&format!("o{}", code), jpeg);
    }
    let (engine, _) = create_engine(test_config(&dir), source).await;

    for code in 1..=8u16 {
        let thumb = engine.fetch(&ImageId::new(format!("o{}", code)), Some(100)).await.unwrap();
        let dims = (thumb.width(), thumb.height());
        if code >= 5 {
            assert_eq!(dims, (50, 100), "orientation {}", code);
        } else {
            assert_eq!(dims, (100, 50), "orientation {}", code);
        }
    }
}

#[tokio::test]
async fn test_filesystem_source() {
    let dir = TempDir::new().unwrap();
    let photos = dir.path().join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    std::fs::write(photos.join("portrait.jpg"), create_test_jpeg(300, 200, 0, Some(6))).unwrap();

    let engine = ThumbnailEngine::new(test_config(&dir), FsImageSource::with_root(&photos))
        .await
        .unwrap();

    let thumb = engine.fetch_with_hit(&ImageId::new("portrait.jpg"), Some(150)).await.unwrap();
    assert_eq!(thumb.source, HitSource::Decode);
    assert_eq!((thumb.image.width(), thumb.image.height()), (100, 150));

    let uri = format!("file://{}", photos.join("portrait.jpg").display());
    let by_uri = engine.fetch(&ImageId::new(uri), Some(150)).await.unwrap();
    assert_eq!((by_uri.width(), by_uri.height()), (100, 150));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_cancels_outstanding_load() {
    let dir = TempDir::new().unwrap();
    let source = MockImageSource::new()
        .with_images(1, 320, 240)
        .with_delay(Duration::from_secs(30));
    let (engine, _) = create_engine(test_config(&dir), source).await;
    let id = image_ids(1).remove(0);

    let pending = {
        let engine = engine.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.fetch(&id, None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(engine.is_loading(&id, None));

    tokio::time::timeout(Duration::from_secs(5), engine.shutdown())
        .await
        .expect("shutdown should not wait for the slow source");

    assert!(pending.await.unwrap().is_none());
    assert_eq!(engine.loads_in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_keeps_memory_hits() {
    let dir = TempDir::new().unwrap();
    let (engine, source) =
        create_engine(test_config(&dir), MockImageSource::new().with_images(2, 320, 240)).await;
    let ids = image_ids(2);

    engine.fetch(&ids[0], None).await.unwrap();
    engine.shutdown().await;

    let cached = engine.fetch_with_hit(&ids[0], None).await.unwrap();
    assert_eq!(cached.source, HitSource::Memory);
    assert!(engine.fetch(&ids[1], None).await.is_none());
    assert_eq!(source.read_count(), 1);
}
