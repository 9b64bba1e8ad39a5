use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::asset::{Asset, AssetId};
use crate::config::Config;
use crate::downsample::{Downsampler, JpegCodec, SourceImage};

use super::{AssetError, CacheKey};

/// Name of the directory below the configured `cache_dir` holding the persisted assets.
pub const ASSETS_DIR: &str = "movie-assets";

/// Name of the directory below the configured `cache_dir` holding files that are being written.
pub const TMP_DIR: &str = "tmp";

/// The interval in which cache hits are touched.
///
/// Entries use a "time to idle" instead of "time to live" mode. We thus need to regularly "touch"
/// the files to signal that they are still in use. This is being debounced to once every hour to
/// not have to touch them on every single use.
pub(super) const TOUCH_EVERY: Duration = Duration::from_secs(3600);

/// How often filesystem operations are retried when the directory was removed underneath us.
const MAX_RETRIES: usize = 2;

/// The persistent, content-addressed asset store.
///
/// See the [module documentation](super) for the layout on disk.
#[derive(Debug, Clone)]
pub struct DiskCache {
    /// Directory holding one file per asset. Created if it does not exist.
    cache_dir: PathBuf,

    /// Directory to use for temporary files.
    ///
    /// New entries are written to a temporary file in this sibling directory, and only moved to
    /// their final location within [`cache_dir`](Self::cache_dir) once fully written.
    tmp_dir: PathBuf,

    /// Turns downloaded source images into the bytes that are persisted.
    downsampler: Downsampler,

    /// Entries not used for longer than this are a miss and removed by cleanup.
    max_unused_for: Option<Duration>,
}

impl DiskCache {
    pub fn new(
        cache_dir: PathBuf,
        tmp_dir: PathBuf,
        downsampler: Downsampler,
        max_unused_for: Option<Duration>,
    ) -> io::Result<Self> {
        let cache = Self {
            cache_dir,
            tmp_dir,
            downsampler,
            max_unused_for,
        };
        cache.ensure_directory()?;
        Ok(cache)
    }

    pub fn from_config(config: &Config) -> io::Result<Self> {
        let downsampler = Downsampler::new(
            Arc::new(JpegCodec),
            config.downsample.max_dimension,
            config.downsample.quality,
        );

        Self::new(
            config.cache_dir(ASSETS_DIR),
            config.cache_dir(TMP_DIR),
            downsampler,
            config.caches.disk.max_unused_for,
        )
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    pub fn downsampler(&self) -> &Downsampler {
        &self.downsampler
    }

    pub(super) fn max_unused_for(&self) -> Option<Duration> {
        self.max_unused_for
    }

    /// The file an asset is stored in.
    ///
    /// The mapping only depends on the id and the codec's file extension.
    pub fn path_for(&self, id: &AssetId) -> PathBuf {
        let file_name = CacheKey::for_asset(id).file_name(self.downsampler.codec().extension());
        self.cache_dir.join(file_name)
    }

    /// Creates the cache directory if it is missing.
    pub fn ensure_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.cache_dir)
    }

    /// Whether a file for `id` exists, without reading or validating it.
    pub fn contains(&self, id: &AssetId) -> bool {
        self.path_for(id).is_file()
    }

    /// Reads and decodes the persisted asset for `id`.
    ///
    /// Missing, expired and undecodable files are all a miss. This never fails.
    pub fn fetch(&self, id: &AssetId) -> Option<Asset> {
        let path = self.path_for(id);

        let bytes = match self.open_cachefile(&path) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                tracing::trace!("No cache file at `{}`", path.display());
                return None;
            }
            Err(e) => {
                let dynerr: &dyn std::error::Error = &e;
                tracing::error!(error = dynerr, "Failed to read cache file `{}`", path.display());
                return None;
            }
        };

        match self.downsampler.codec().decode(&bytes) {
            Ok(image) => Some(Asset::resolved(id.clone(), image)),
            Err(e) => {
                tracing::warn!(%id, "Ignoring undecodable cache file `{}`: {}", path.display(), e);
                None
            }
        }
    }

    /// Downsamples `source` and persists the result as the entry for `id`.
    ///
    /// The new file only becomes visible once it is complete and decodes. On error, nothing is
    /// left behind under `id`; a previously persisted entry stays untouched.
    pub fn save(&self, source: &SourceImage<'_>, id: &AssetId) -> Result<(), AssetError> {
        let encoded = self.downsampler.downsample(source)?;
        SourceImage::probe(&encoded)
            .map_err(|e| AssetError::DownsampleFailed(format!("unreadable output: {e}")))?;

        let mut temp_file = self.tempfile()?;
        temp_file.write_all(&encoded)?;
        temp_file.flush()?;

        let path = self.path_for(id);
        persist_tempfile(temp_file, &path)?;

        tracing::debug!(%id, "Saved {} bytes to `{}`", encoded.len(), path.display());
        metric!(counter("caches.file.write") += 1);
        metric!(distribution("caches.file.size") = encoded.len() as u64);

        Ok(())
    }

    /// Removes every persisted asset, leaving an empty cache directory.
    ///
    /// A concurrent [`save`](Self::save) recreates the directory when it publishes its file, and
    /// a concurrent [`fetch`](Self::fetch) observes a miss.
    pub fn clear(&self) -> io::Result<()> {
        tracing::info!("Clearing cache directory `{}`", self.cache_dir.display());
        catch_not_found(|| fs::remove_dir_all(&self.cache_dir))?;
        self.ensure_directory()
    }

    /// Clear the temporary files.
    ///
    /// This needs to happen on startup to avoid leaving temporary files which survived a hard
    /// crash.
    pub fn clear_tmp(&self) -> io::Result<()> {
        if self.tmp_dir.exists() {
            fs::remove_dir_all(&self.tmp_dir)?;
        }
        fs::create_dir_all(&self.tmp_dir)
    }

    /// Create a new temporary file to write a cache entry to.
    pub fn tempfile(&self) -> io::Result<NamedTempFile> {
        let path = &self.tmp_dir;

        // `clear` and `cleanup` could potentially remove the directory we are operating in, so
        // retry the fs operations.
        let mut retries = 0;
        loop {
            retries += 1;

            if let Err(e) = fs::create_dir_all(path) {
                tracing::error!("Failed to create tmp directory `{}`: {:?}", path.display(), e);
                if retries > MAX_RETRIES {
                    return Err(e);
                }
                continue;
            }

            match tempfile::Builder::new().prefix("tmp").tempfile_in(path) {
                Ok(temp_file) => return Ok(temp_file),
                Err(e) => {
                    tracing::error!("Failed to create tmp file in `{}`: {:?}", path.display(), e);
                    if retries > MAX_RETRIES {
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Checks the file at `path` against `max_unused_for` and reads it.
    ///
    /// Takes care of bumping the `mtime` of hits.
    fn open_cachefile(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        // `NotFound` can be returned from multiple places here. All of them indicate a miss, as
        // `clear` or `cleanup` can run in between.
        catch_not_found(|| {
            let mtime_elapsed = self.check_expiry(path)?;
            let bytes = fs::read(path)?;

            if mtime_elapsed >= TOUCH_EVERY {
                filetime::set_file_mtime(path, FileTime::now())?;
            }

            Ok(bytes)
        })
    }

    /// Returns the time since `path` was last used.
    ///
    /// Expired files return `Err(io::ErrorKind::NotFound)`.
    pub(super) fn check_expiry(&self, path: &Path) -> io::Result<Duration> {
        let metadata = path.metadata()?;
        tracing::trace!("File `{}` length: {}", path.display(), metadata.len());

        let mtime_elapsed = elapsed_since(metadata.modified()?);
        let max_unused_for = self.max_unused_for.unwrap_or(Duration::MAX);
        if mtime_elapsed > max_unused_for {
            return Err(io::ErrorKind::NotFound.into());
        }

        Ok(mtime_elapsed)
    }
}

pub(super) fn elapsed_since(time: SystemTime) -> Duration {
    time.elapsed().unwrap_or_default()
}

/// Moves a fully written temporary file to `cache_path`.
///
/// The rename is atomic, so readers either see the previous state or the complete new file.
fn persist_tempfile(mut temp_file: NamedTempFile, cache_path: &Path) -> io::Result<File> {
    let parent = cache_path
        .parent()
        .ok_or_else(|| io::Error::other("no parent directory to persist item"))?;

    // `clear` could remove the parent directory we are operating in, so retry the fs operations.
    let mut retries = 0;
    loop {
        retries += 1;

        if let Err(e) = fs::create_dir_all(parent) {
            tracing::error!("Failed to create cache directory `{}`: {:?}", parent.display(), e);
            if retries > MAX_RETRIES {
                return Err(e);
            }
            continue;
        }

        match temp_file.persist(cache_path) {
            Ok(file) => return Ok(file),
            Err(e) => {
                temp_file = e.file;
                let err = e.error;
                tracing::error!("Failed to persist `{}`: {:?}", cache_path.display(), err);
                if retries > MAX_RETRIES {
                    return Err(err);
                }
            }
        }
    }
}

/// Converts a `NotFound` error into `Ok(None)`.
pub(super) fn catch_not_found<F, R>(f: F) -> io::Result<Option<R>>
where
    F: FnOnce() -> io::Result<R>,
{
    match f() {
        Ok(x) => Ok(Some(x)),
        Err(e) => match e.kind() {
            io::ErrorKind::NotFound => Ok(None),
            _ => Err(e),
        },
    }
}
