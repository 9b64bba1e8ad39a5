use std::fs::{read_dir, remove_file};
use std::io;
use std::path::Path;
use std::time::Duration;

use super::DiskCache;
use super::fs::{TOUCH_EVERY, catch_not_found, elapsed_since};

/// What a [`DiskCache::cleanup`] run removed and kept.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupStats {
    pub removed_files: usize,
    pub removed_bytes: u64,

    pub retained_files: usize,
    pub retained_bytes: u64,
}

impl DiskCache {
    /// Removes entries that have not been used for longer than `max_unused_for`, as well as
    /// temporary files that were abandoned by a crashed writer.
    ///
    /// If `dry_run` is `true`, no files will actually be deleted.
    pub fn cleanup(&self, dry_run: bool) -> io::Result<CleanupStats> {
        tracing::info!("Cleaning up `{}`", self.cache_dir().display());

        let mut stats = CleanupStats::default();
        self.cleanup_directory(self.cache_dir(), self.max_unused_for(), &mut stats, dry_run)?;

        // Writers hold their temp file for the duration of one save. Anything much older than
        // that belongs to nobody.
        let mut tmp_stats = CleanupStats::default();
        self.cleanup_directory(self.tmp_dir(), Some(TOUCH_EVERY), &mut tmp_stats, dry_run)?;
        stats.removed_files += tmp_stats.removed_files;
        stats.removed_bytes += tmp_stats.removed_bytes;

        tracing::info!(
            "Retained {} files, totaling {} bytes",
            stats.retained_files,
            stats.retained_bytes,
        );
        tracing::info!(
            "Removed {} files, totaling {} bytes",
            stats.removed_files,
            stats.removed_bytes
        );

        metric!(gauge("caches.size.files") = stats.retained_files as u64);
        metric!(gauge("caches.size.bytes") = stats.retained_bytes);
        metric!(counter("caches.size.files_removed") += stats.removed_files as i64);
        metric!(counter("caches.size.bytes_removed") += stats.removed_bytes as i64);

        Ok(stats)
    }

    fn cleanup_directory(
        &self,
        directory: &Path,
        max_unused_for: Option<Duration>,
        stats: &mut CleanupStats,
        dry_run: bool,
    ) -> io::Result<()> {
        let entries = match catch_not_found(|| read_dir(directory))? {
            Some(x) => x,
            None => {
                tracing::warn!("Directory not found: `{}`", directory.display());
                return Ok(());
            }
        };
        tracing::debug!("Cleaning directory `{}`", directory.display());

        for entry in entries {
            let path = entry?.path();
            if let Err(e) = try_cleanup_path(&path, max_unused_for, stats, dry_run) {
                tracing::error!("Failed to clean cache file `{}`: {:?}", path.display(), e);
            }
        }

        Ok(())
    }
}

/// Tries to clean up the file at `path`, returning `true` if it was removed.
///
/// If `dry_run` is `true`, the file will not actually be deleted.
fn try_cleanup_path(
    path: &Path,
    max_unused_for: Option<Duration>,
    stats: &mut CleanupStats,
    dry_run: bool,
) -> io::Result<bool> {
    tracing::trace!("Checking file `{}`", path.display());
    let Some(metadata) = catch_not_found(|| path.metadata())? else {
        return Ok(true);
    };
    if !metadata.is_file() {
        return Err(io::Error::other("not a file"));
    }
    let size = metadata.len();

    let unused_for = elapsed_since(metadata.modified()?);
    if max_unused_for.is_some_and(|max| unused_for > max) {
        tracing::debug!("Removing file `{}`", path.display());
        if !dry_run {
            catch_not_found(|| remove_file(path))?;
        }

        stats.removed_bytes += size;
        stats.removed_files += 1;

        return Ok(true);
    }
    stats.retained_bytes += size;
    stats.retained_files += 1;

    Ok(false)
}
