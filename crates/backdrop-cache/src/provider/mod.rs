//! The [`AssetProvider`], coordinating the caches, the downsampler and the fetcher.
//!
//! # Lookups
//!
//! [`AssetProvider::fetch`] never waits on the network. It answers from the in-memory cache, then
//! from the disk cache, and otherwise hands out a placeholder. Disk hits are not promoted into
//! memory by `fetch`; only a completed preparation populates the in-memory cache.
//!
//! # Preparation
//!
//! [`AssetProvider::prepare`] returns an [`InFlightHandle`] for a computation that makes the asset
//! available locally. There is at most one such computation per asset id at any time: concurrent
//! callers receive clones of the same handle. The computation:
//!
//!  1. returns the disk cache entry if there is one, without touching the network,
//!  2. otherwise resolves the URL and downloads the source image,
//!  3. checks that the bytes are an image,
//!  4. downsamples and persists it into the disk cache,
//!  5. reads the persisted entry back.
//!
//! On success, the asset is put into the in-memory cache. Either way, the computation is removed
//! from the registry before its result is delivered, so a later `prepare` starts from scratch.
//!
//! The computation is spawned onto the `cpu_pool` runtime right away and runs to completion even if
//! nobody waits for it. Decoding and disk I/O run as blocking tasks on that runtime.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::asset::{Asset, AssetId};
use crate::caching::{AssetEntry, AssetError, CleanupStats, DiskCache, MemoryCache};
use crate::config::Config;
use crate::downsample::SourceImage;
use crate::fetch::{Fetcher, HttpFetcher};
use crate::utils::futures::CallOnDrop;

mod handle;

pub use handle::{AssetObserver, InFlightHandle};

/// Registry of pending computations, keyed by asset id.
type RequestMap = Arc<Mutex<BTreeMap<AssetId, InFlightHandle>>>;

/// Serves movie assets from the caches and prepares missing ones.
///
/// This is cheap to clone; all clones share the same caches and registry.
#[derive(Clone, Debug)]
pub struct AssetProvider {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    memory: MemoryCache,
    disk: DiskCache,
    fetcher: Arc<dyn Fetcher>,
    cpu_pool: Handle,
    /// Guards the registry and all writes into `memory`.
    requests: RequestMap,
}

impl AssetProvider {
    pub fn new(
        memory: MemoryCache,
        disk: DiskCache,
        fetcher: Arc<dyn Fetcher>,
        cpu_pool: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                memory,
                disk,
                fetcher,
                cpu_pool,
                requests: Arc::new(Mutex::new(BTreeMap::new())),
            }),
        }
    }

    /// Creates a provider downloading over HTTP, as configured.
    ///
    /// This removes temporary files left behind by a previous process.
    pub fn from_config(config: &Config, cpu_pool: Handle) -> anyhow::Result<Self> {
        let disk = DiskCache::from_config(config).context("failed to create disk cache")?;
        disk.clear_tmp().context("failed to clear temporary files")?;
        let fetcher = HttpFetcher::from_config(config).context("failed to create HTTP client")?;
        let memory = MemoryCache::new(config.caches.in_memory.capacity);

        Ok(Self::new(memory, disk, Arc::new(fetcher), cpu_pool))
    }

    pub fn memory(&self) -> &MemoryCache {
        &self.inner.memory
    }

    pub fn disk(&self) -> &DiskCache {
        &self.inner.disk
    }

    /// Looks up an asset without waiting on the network.
    ///
    /// Returns the in-memory entry, else the disk entry, else a placeholder. This reads and decodes
    /// the disk entry on the calling thread.
    pub fn fetch(&self, id: &AssetId) -> Asset {
        metric!(counter("caches.access") += 1, "op" => "fetch");

        if let Some(asset) = self.inner.memory.get(id) {
            metric!(counter("caches.memory.hit") += 1);
            return asset;
        }

        if let Some(asset) = self.inner.disk.fetch(id) {
            metric!(counter("caches.file.hit") += 1, "op" => "fetch");
            return asset;
        }

        metric!(counter("caches.file.miss") += 1, "op" => "fetch");
        Asset::placeholder(id.clone())
    }

    /// Returns the pending computation for `id`, starting one if there is none.
    pub fn prepare(&self, id: &AssetId) -> InFlightHandle {
        let mut requests = self.inner.requests.lock();

        if let Some(handle) = requests.get(id) {
            tracing::trace!(%id, "Joining pending computation");
            return handle.clone();
        }

        let handle = self.spawn_computation(id.clone());
        requests.insert(id.clone(), handle.clone());
        metric!(gauge("assets.in_flight") = requests.len() as u64);

        handle
    }

    /// Spawns the computation for `id` and returns a handle to its result.
    ///
    /// Must be called with the registry locked, and the handle inserted before the lock is
    /// released.
    fn spawn_computation(&self, id: AssetId) -> InFlightHandle {
        let (sender, receiver) = oneshot::channel();
        let settled = Arc::new(AtomicBool::new(false));

        // Removes the registry entry once the computation is done, or when the task panics.
        let remove_token = {
            let requests = Arc::clone(&self.inner.requests);
            let settled = Arc::clone(&settled);
            let id = id.clone();
            CallOnDrop::new(move || {
                let mut requests = requests.lock();
                let is_ours = requests
                    .get(&id)
                    .is_some_and(|handle| Arc::ptr_eq(handle.settled_flag(), &settled));
                if is_ours {
                    requests.remove(&id);
                }
                metric!(gauge("assets.in_flight") = requests.len() as u64);
            })
        };

        let inner = Arc::clone(&self.inner);
        let task_settled = Arc::clone(&settled);
        let task_id = id.clone();
        let computation = async move {
            let entry = inner.compute(&task_id).await;

            {
                let _requests = inner.requests.lock();
                if let Ok(asset) = &entry {
                    inner.memory.insert(asset.clone());
                }
                task_settled.store(true, Ordering::Release);
            }

            // Takes the registry lock, so the guard above must be gone.
            drop(remove_token);

            // Nobody might be waiting anymore.
            sender.send(entry).ok();
        };
        self.inner.cpu_pool.spawn(computation);

        let result = receiver
            .map(|result| result.unwrap_or(Err(AssetError::InternalError)))
            .boxed()
            .shared();

        InFlightHandle::new(id, settled, result)
    }

    /// Removes the settled registry entry for `id`, returning whether there was one.
    ///
    /// Entries are removed automatically as soon as their computation settles, so this is usually a
    /// no-op. A pending computation is never removed.
    pub fn release_handle(&self, id: &AssetId) -> bool {
        let mut requests = self.inner.requests.lock();
        match requests.get(id) {
            Some(handle) if handle.is_settled() => {
                requests.remove(id);
                true
            }
            _ => false,
        }
    }

    /// The number of computations that have not settled yet.
    pub fn in_flight(&self) -> usize {
        let requests = self.inner.requests.lock();
        requests.values().filter(|handle| !handle.is_settled()).count()
    }

    /// Removes every asset from the disk cache and the in-memory cache.
    ///
    /// Pending computations are not cancelled. Those that finish afterwards publish their fresh
    /// result as usual.
    pub async fn clear(&self) -> Result<(), AssetError> {
        let disk = self.inner.disk.clone();
        self.inner.spawn_blocking(move || disk.clear()).await??;

        let _requests = self.inner.requests.lock();
        self.inner.memory.clear();
        tracing::info!("Cleared all cached assets");

        Ok(())
    }

    /// Expires disk cache entries that have not been used for `max_unused_for`.
    ///
    /// If `dry_run` is `true`, no files will actually be deleted.
    pub async fn cleanup(&self, dry_run: bool) -> Result<CleanupStats, AssetError> {
        let disk = self.inner.disk.clone();
        let stats = self
            .inner
            .spawn_blocking(move || disk.cleanup(dry_run))
            .await??;
        Ok(stats)
    }
}

impl Inner {
    async fn compute(&self, id: &AssetId) -> AssetEntry {
        let start = Instant::now();
        let entry = self.compute_uncached(id).await;

        match &entry {
            Ok(asset) => tracing::debug!(
                %id,
                "Prepared {}x{} asset in {:?}",
                asset.width(),
                asset.height(),
                start.elapsed()
            ),
            Err(err) => {
                tracing::debug!(%id, error = %err, "Failed to prepare asset");
                metric!(counter("assets.prepare.failed") += 1, "error" => err.kind());
            }
        }
        metric!(timer("assets.prepare.duration") = start.elapsed());

        entry
    }

    async fn compute_uncached(&self, id: &AssetId) -> AssetEntry {
        metric!(counter("caches.access") += 1, "op" => "prepare");

        let disk = self.disk.clone();
        let lookup_id = id.clone();
        if let Some(asset) = self.spawn_blocking(move || disk.fetch(&lookup_id)).await? {
            metric!(counter("caches.file.hit") += 1, "op" => "prepare");
            return Ok(asset);
        }
        metric!(counter("caches.file.miss") += 1, "op" => "prepare");
        metric!(counter("caches.computation") += 1);

        let url = self.fetcher.resolve_url(id)?;
        let bytes = self.fetcher.download(&url).await?;

        let disk = self.disk.clone();
        let save_id = id.clone();
        self.spawn_blocking(move || {
            let source = SourceImage::probe(&bytes)?;
            disk.save(&source, &save_id)
        })
        .await??;

        let disk = self.disk.clone();
        let read_id = id.clone();
        self.spawn_blocking(move || disk.fetch(&read_id))
            .await?
            .ok_or(AssetError::MissingAfterWrite)
    }

    /// Runs blocking work on the `cpu_pool`.
    async fn spawn_blocking<F, R>(&self, f: F) -> Result<R, AssetError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.cpu_pool
            .spawn_blocking(f)
            .await
            .map_err(AssetError::from_std_error)
    }
}
