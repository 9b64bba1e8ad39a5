use std::time::Duration;

use bytes::Bytes;

use backdrop_cache::{AssetError, AssetId};
use backdrop_cache_test::{corrupt_png_fixture, jpeg_fixture};

use crate::utils::{MockFetcher, provider, provider_in};

#[tokio::test]
async fn test_fetch_unknown_is_placeholder() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("unknown.jpg");

    let asset = test.provider.fetch(&id);

    assert!(asset.is_placeholder());
    assert_eq!(asset.id(), &id);
    assert_eq!((asset.width(), asset.height()), (0, 0));
    assert_eq!(test.fetcher.downloads(), 0);
    assert_eq!(test.provider.in_flight(), 0);
}

#[tokio::test]
async fn test_prepare_promotes_asset() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("/kqjL17yufvn9OVLyXYpvtyrFfak.jpg");

    assert!(test.provider.fetch(&id).is_placeholder());

    let asset = test.provider.prepare(&id).wait().await.unwrap();
    assert!(!asset.is_placeholder());
    assert_eq!((asset.width(), asset.height()), (800, 450));

    // served from memory
    assert!(test.provider.memory().get(&id).is_some());
    let fetched = test.provider.fetch(&id);
    assert!(!fetched.is_placeholder());
    assert_eq!(fetched.image(), asset.image());

    // and from disk once memory is gone
    test.provider.memory().clear();
    assert!(test.provider.disk().contains(&id));
    let fetched = test.provider.fetch(&id);
    assert!(!fetched.is_placeholder());
    assert_eq!((fetched.width(), fetched.height()), (800, 450));

    assert_eq!(test.fetcher.downloads(), 1);
}

#[tokio::test]
async fn test_prepare_is_single_flight() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let handles: Vec<_> = (0..10).map(|_| test.provider.prepare(&id)).collect();
    assert!(handles.iter().all(|h| h.same_computation(&handles[0])));
    assert!(handles.iter().all(|h| !h.is_settled()));
    assert_eq!(test.provider.in_flight(), 1);

    test.fetcher.open_gate();
    let results = futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;

    let first = results[0].as_ref().unwrap();
    for result in &results {
        assert_eq!(result.as_ref().unwrap().image(), first.image());
    }
    assert_eq!(test.fetcher.downloads(), 1);
    assert_eq!(test.codec.encodes(), 1);
    assert_eq!(test.provider.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_prepare_from_concurrent_tasks() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let provider = test.provider.clone();
            let id = id.clone();
            tokio::spawn(async move { provider.prepare(&id).wait().await })
        })
        .collect();

    for task in tasks {
        let asset = task.await.unwrap().unwrap();
        assert_eq!((asset.width(), asset.height()), (800, 450));
    }

    // late callers may start a second computation, which is answered from disk
    assert_eq!(test.fetcher.downloads(), 1);
    assert_eq!(test.codec.encodes(), 1);
    assert_eq!(test.provider.in_flight(), 0);
}

#[tokio::test]
async fn test_settled_handle_is_not_reused() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");

    let first = test.provider.prepare(&id);
    first.clone().wait().await.unwrap();
    assert!(first.is_settled());

    let second = test.provider.prepare(&id);
    assert!(!second.same_computation(&first));
    second.wait().await.unwrap();

    // the second computation found the disk entry
    assert_eq!(test.fetcher.downloads(), 1);
}

#[tokio::test]
async fn test_failure_is_not_cached() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    test.fetcher
        .respond(Err(AssetError::Transport("connection reset".into())));

    let err = test.provider.prepare(&id).wait().await.unwrap_err();
    assert_eq!(err, AssetError::Transport("connection reset".into()));
    assert!(test.provider.fetch(&id).is_placeholder());
    assert_eq!(test.provider.in_flight(), 0);

    let asset = test.provider.prepare(&id).wait().await.unwrap();
    assert!(!asset.is_placeholder());
    assert_eq!(test.fetcher.downloads(), 2);
}

#[tokio::test]
async fn test_error_status_is_delivered() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    test.fetcher.respond(Err(AssetError::InvalidResponse(404)));

    let handle = test.provider.prepare(&id);
    let observer = handle.observe();

    assert_eq!(handle.wait().await, Err(AssetError::InvalidResponse(404)));
    assert_eq!(observer.wait().await, Err(AssetError::InvalidResponse(404)));
    assert!(!test.provider.disk().contains(&id));
}

#[tokio::test]
async fn test_invalid_image_is_rejected() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    test.fetcher
        .respond(Ok(Bytes::from_static(b"<html>not found</html>")));

    let err = test.provider.prepare(&id).wait().await.unwrap_err();

    assert!(matches!(err, AssetError::InvalidImage(_)), "{err:?}");
    assert!(!test.provider.disk().contains(&id));
    assert_eq!(test.provider.memory().entry_count(), 0);
    assert!(test.provider.fetch(&id).is_placeholder());
    assert_eq!(test.codec.encodes(), 0);
}

#[tokio::test]
async fn test_truncated_jpeg_is_rejected() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    let mut data = jpeg_fixture(1600, 900);
    data.truncate(data.len() / 3);
    test.fetcher.respond(Ok(Bytes::from(data)));

    let err = test.provider.prepare(&id).wait().await.unwrap_err();

    assert!(matches!(err, AssetError::InvalidImage(_)), "{err:?}");
    assert!(!test.provider.disk().contains(&id));
    assert_eq!(test.provider.memory().entry_count(), 0);
    assert_eq!(test.codec.encodes(), 0);
}

#[tokio::test]
async fn test_corrupt_png_is_rejected() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.png");
    test.fetcher
        .respond(Ok(Bytes::from(corrupt_png_fixture(1200, 600))));

    let err = test.provider.prepare(&id).wait().await.unwrap_err();

    assert!(matches!(err, AssetError::InvalidImage(_)), "{err:?}");
    assert!(!test.provider.disk().contains(&id));
    assert_eq!(test.provider.memory().entry_count(), 0);
    assert_eq!(test.codec.encodes(), 0);
}

#[tokio::test]
async fn test_invalid_asset_id() {
    let (test, _cache_dir) = provider(MockFetcher::new());

    let err = test.provider.prepare(&"  ".into()).wait().await.unwrap_err();

    assert_eq!(err, AssetError::InvalidAssetId("  ".into()));
    assert_eq!(test.fetcher.downloads(), 0);
}

#[tokio::test]
async fn test_clear() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let a = AssetId::from("a.jpg");
    let b = AssetId::from("b.jpg");

    test.provider.prepare(&a).wait().await.unwrap();
    test.provider.prepare(&b).wait().await.unwrap();
    assert_eq!(test.provider.memory().entry_count(), 2);

    test.provider.clear().await.unwrap();

    assert_eq!(test.provider.memory().entry_count(), 0);
    assert!(!test.provider.disk().contains(&a));
    assert!(test.provider.fetch(&a).is_placeholder());
    assert!(test.provider.fetch(&b).is_placeholder());

    // clearing twice is fine
    test.provider.clear().await.unwrap();

    test.provider.prepare(&a).wait().await.unwrap();
    assert!(!test.provider.fetch(&a).is_placeholder());
    assert_eq!(test.fetcher.downloads(), 3);
}

#[tokio::test]
async fn test_pending_computation_settles_after_clear() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let handle = test.provider.prepare(&id);
    test.provider.clear().await.unwrap();
    assert_eq!(test.provider.in_flight(), 1);

    test.fetcher.open_gate();
    let asset = handle.wait().await.unwrap();

    // the result lands in the freshly cleared caches
    assert_eq!((asset.width(), asset.height()), (800, 450));
    assert!(test.provider.disk().contains(&id));
    assert!(test.provider.memory().get(&id).is_some());
    assert!(!test.provider.fetch(&id).is_placeholder());
    assert_eq!(test.fetcher.downloads(), 1);
    assert_eq!(test.provider.in_flight(), 0);
}

#[tokio::test]
async fn test_observers_cancel_independently() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let handle = test.provider.prepare(&id);
    let withdrawn = handle.observe();
    let waiting = handle.observe();

    let token = withdrawn.cancellation_token();
    token.cancel();
    assert!(withdrawn.is_cancelled());
    assert!(!waiting.is_cancelled());
    assert_eq!(withdrawn.wait().await, Err(AssetError::Cancelled));

    test.fetcher.open_gate();
    let asset = waiting.wait().await.unwrap();
    assert_eq!((asset.width(), asset.height()), (800, 450));
    assert_eq!(test.fetcher.downloads(), 1);
}

#[tokio::test]
async fn test_cancelled_observer_resolves_immediately() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let observer = test.provider.prepare(&id).observe();
    observer.cancel();

    // the download never completes, so this would hang without the cancellation
    let result = tokio::time::timeout(Duration::from_secs(5), observer.wait()).await;
    assert_eq!(result.unwrap(), Err(AssetError::Cancelled));
    assert_eq!(test.provider.in_flight(), 1);

    test.fetcher.open_gate();
}

#[tokio::test]
async fn test_computation_outlives_its_observers() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let observer = test.provider.prepare(&id).observe();
    observer.cancel();
    drop(observer);

    test.fetcher.open_gate();

    // either joins the pending computation or answers from disk after it finished
    let asset = test.provider.prepare(&id).wait().await.unwrap();
    assert!(!asset.is_placeholder());
    assert!(test.provider.memory().get(&id).is_some());
    assert_eq!(test.fetcher.downloads(), 1);
    assert_eq!(test.codec.encodes(), 1);
}

#[tokio::test]
async fn test_disk_hit_skips_download() {
    let (first, cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    first.provider.prepare(&id).wait().await.unwrap();

    let second = provider_in(cache_dir.path(), MockFetcher::new());

    let fetched = second.provider.fetch(&id);
    assert!(!fetched.is_placeholder());
    // lookups do not populate memory
    assert!(second.provider.memory().get(&id).is_none());

    let asset = second.provider.prepare(&id).wait().await.unwrap();
    assert_eq!((asset.width(), asset.height()), (800, 450));
    assert!(second.provider.memory().get(&id).is_some());
    assert_eq!(second.fetcher.downloads(), 0);
    assert_eq!(second.codec.encodes(), 0);
}

#[tokio::test]
async fn test_release_handle() {
    let (test, _cache_dir) = provider(MockFetcher::gated());
    let id = AssetId::from("backdrop.jpg");

    let handle = test.provider.prepare(&id);

    // pending computations are never released
    assert!(!test.provider.release_handle(&id));
    assert_eq!(test.provider.in_flight(), 1);
    assert!(test.provider.prepare(&id).same_computation(&handle));

    test.fetcher.open_gate();
    handle.clone().wait().await.unwrap();

    // settled computations remove themselves
    assert!(!test.provider.release_handle(&id));
    assert!(!test.provider.release_handle(&"other.jpg".into()));
    assert!(!test.provider.prepare(&id).same_computation(&handle));
}

#[tokio::test]
async fn test_cleanup_keeps_recent_entries() {
    let (test, _cache_dir) = provider(MockFetcher::new());
    let id = AssetId::from("backdrop.jpg");
    test.provider.prepare(&id).wait().await.unwrap();

    let stats = test.provider.cleanup(false).await.unwrap();

    assert_eq!(stats.removed_files, 0);
    assert_eq!(stats.retained_files, 1);
    assert!(test.provider.disk().contains(&id));
}
