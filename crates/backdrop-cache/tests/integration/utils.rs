use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use image::{DynamicImage, ImageFormat, RgbaImage};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use url::Url;

use backdrop_cache::caching::{ASSETS_DIR, DiskCache, MemoryCache, TMP_DIR};
use backdrop_cache::downsample::{Codec, DEFAULT_QUALITY, Downsampler, JpegCodec};
use backdrop_cache::fetch::Fetcher;
use backdrop_cache::{AssetError, AssetId, AssetProvider};
use backdrop_cache_test::{self as test, TempDir};

/// Size of the image served when no response is queued.
pub const FALLBACK_SIZE: (u32, u32) = (1600, 900);

/// A [`Fetcher`] serving canned responses and counting downloads.
#[derive(Debug)]
pub struct MockFetcher {
    base_url: Url,
    downloads: AtomicUsize,
    responses: Mutex<VecDeque<Result<Bytes, AssetError>>>,
    fallback: Bytes,
    gate: Option<Arc<Semaphore>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        let (width, height) = FALLBACK_SIZE;
        Self {
            base_url: "https://images.invalid/t/p/original/".parse().unwrap(),
            downloads: AtomicUsize::new(0),
            responses: Mutex::new(VecDeque::new()),
            fallback: test::jpeg_fixture(width, height).into(),
            gate: None,
        }
    }

    /// Makes downloads wait until [`open_gate`](Self::open_gate) is called.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Queues the result of the next download.
    pub fn respond(&self, response: Result<Bytes, AssetError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// The number of downloads that were started.
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl Fetcher for MockFetcher {
    fn resolve_url(&self, id: &AssetId) -> Result<Url, AssetError> {
        let path = id.as_str().trim().trim_start_matches('/');
        if path.is_empty() {
            return Err(AssetError::InvalidAssetId(id.to_string()));
        }
        self.base_url
            .join(path)
            .map_err(|_| AssetError::InvalidAssetId(id.to_string()))
    }

    fn download<'a>(&'a self, _url: &'a Url) -> BoxFuture<'a, Result<Bytes, AssetError>> {
        Box::pin(async move {
            self.downloads.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }

            let queued = self.responses.lock().unwrap().pop_front();
            queued.unwrap_or_else(|| Ok(self.fallback.clone()))
        })
    }
}

/// A JPEG codec counting how often it encodes.
#[derive(Debug, Default)]
pub struct CountingCodec {
    encodes: AtomicUsize,
}

impl CountingCodec {
    pub fn encodes(&self) -> usize {
        self.encodes.load(Ordering::SeqCst)
    }
}

impl Codec for CountingCodec {
    fn format(&self) -> ImageFormat {
        JpegCodec.format()
    }

    fn extension(&self) -> &'static str {
        JpegCodec.extension()
    }

    fn encode(&self, image: &DynamicImage, quality: u8) -> Result<Vec<u8>, AssetError> {
        self.encodes.fetch_add(1, Ordering::SeqCst);
        JpegCodec.encode(image, quality)
    }

    fn decode(&self, data: &[u8]) -> Result<RgbaImage, AssetError> {
        JpegCodec.decode(data)
    }
}

/// A provider backed by a [`MockFetcher`], with everything needed to inspect it.
pub struct TestProvider {
    pub provider: AssetProvider,
    pub fetcher: Arc<MockFetcher>,
    pub codec: Arc<CountingCodec>,
}

/// Creates a provider in a fresh temporary cache directory.
///
/// Hold on to the returned [`TempDir`] for the duration of the test.
pub fn provider(fetcher: MockFetcher) -> (TestProvider, TempDir) {
    let cache_dir = test::tempdir();
    let provider = provider_in(cache_dir.path(), fetcher);
    (provider, cache_dir)
}

/// Creates a provider on top of an existing cache directory.
pub fn provider_in(cache_dir: &Path, fetcher: MockFetcher) -> TestProvider {
    test::setup();

    let fetcher = Arc::new(fetcher);
    let codec = Arc::new(CountingCodec::default());

    let downsampler = Downsampler::new(codec.clone(), 800, DEFAULT_QUALITY);
    let disk = DiskCache::new(
        cache_dir.join(ASSETS_DIR),
        cache_dir.join(TMP_DIR),
        downsampler,
        None,
    )
    .unwrap();
    let memory = MemoryCache::new(64 * 1024 * 1024);

    let provider = AssetProvider::new(memory, disk, fetcher.clone(), Handle::current());

    TestProvider {
        provider,
        fetcher,
        codec,
    }
}
