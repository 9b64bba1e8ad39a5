use std::time::Duration;

use tokio::runtime::Handle;
use url::Url;

use backdrop_cache::config::Config;
use backdrop_cache::{AssetError, AssetId, AssetProvider};
use backdrop_cache_test::{self as test, ImageServer, TempDir};

fn setup_provider(base_url: Url, f: impl FnOnce(&mut Config)) -> (AssetProvider, TempDir) {
    test::setup();
    let cache_dir = test::tempdir();

    let mut config = Config {
        cache_dir: cache_dir.path().to_path_buf(),
        ..Default::default()
    };
    config.source.base_url = base_url;
    f(&mut config);

    let provider = AssetProvider::from_config(&config, Handle::current()).unwrap();
    (provider, cache_dir)
}

#[tokio::test]
async fn test_download_and_downsample() {
    let server = ImageServer::new();
    let (provider, _cache_dir) = setup_provider(server.url("/t/p/original/"), |_| {});
    let id = AssetId::from("/4000x2000.jpg");

    assert!(provider.fetch(&id).is_placeholder());
    assert_eq!(server.accesses(), 0);

    let asset = provider.prepare(&id).wait().await.unwrap();
    assert_eq!((asset.width(), asset.height()), (800, 400));
    assert_eq!(
        server.all_hits(),
        vec![("/t/p/original/4000x2000.jpg".to_owned(), 1)]
    );

    // the second computation is answered from disk
    provider.memory().clear();
    let asset = provider.prepare(&id).wait().await.unwrap();
    assert_eq!((asset.width(), asset.height()), (800, 400));
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_png_source_is_stored_as_jpeg() {
    let server = ImageServer::new();
    let (provider, _cache_dir) = setup_provider(server.url("/t/p/original/"), |config| {
        config.downsample.max_dimension = 300;
    });
    let id = AssetId::from("600x1200.png");

    let asset = provider.prepare(&id).wait().await.unwrap();

    assert_eq!((asset.width(), asset.height()), (150, 300));
    let path = provider.disk().path_for(&id);
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("jpeg"));
}

#[tokio::test]
async fn test_missing_source() {
    let server = ImageServer::new();
    let (provider, _cache_dir) = setup_provider(server.url("/t/p/original/"), |_| {});
    let id = AssetId::from("no-such-backdrop.jpg");

    let result = provider.prepare(&id).wait().await;

    assert_eq!(result, Err(AssetError::InvalidResponse(404)));
    assert_eq!(server.accesses(), 1);
    assert!(provider.fetch(&id).is_placeholder());
}

#[tokio::test]
async fn test_garbage_source() {
    let server = ImageServer::new();
    let (provider, _cache_dir) = setup_provider(server.url("/garbage_data/"), |_| {});
    let id = AssetId::from("definitely-not-a-jpeg");

    let err = provider.prepare(&id).wait().await.unwrap_err();

    assert!(matches!(err, AssetError::InvalidImage(_)), "{err:?}");
    assert!(!provider.disk().contains(&id));
}

#[tokio::test]
async fn test_download_timeout() {
    let server = ImageServer::new();
    let (provider, _cache_dir) = setup_provider(server.url("/delay/5s/t/p/original/"), |config| {
        config.source.max_download_timeout = Duration::from_millis(200);
    });
    let id = AssetId::from("64x32.jpg");

    let err = provider.prepare(&id).wait().await.unwrap_err();

    assert!(matches!(err, AssetError::Transport(_)), "{err:?}");
    assert_eq!(provider.in_flight(), 0);
}

#[tokio::test]
async fn test_from_config_clears_tmp() {
    let cache_dir = test::tempdir();
    let leftover = cache_dir.path().join("tmp").join("tmp-crashed-writer");
    std::fs::create_dir_all(leftover.parent().unwrap()).unwrap();
    std::fs::write(&leftover, b"half an image").unwrap();

    let config = Config {
        cache_dir: cache_dir.path().to_path_buf(),
        ..Default::default()
    };
    let _provider = AssetProvider::from_config(&config, Handle::current()).unwrap();

    assert!(!leftover.exists());
}
