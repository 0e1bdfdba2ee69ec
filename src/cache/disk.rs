//! Disk-backed cache tier.
//!
//! Layout: `{root}/{hex(layer_id)}/{hex(key)}`, one file per entry. Writes go
//! to a temporary file in the same directory and are renamed into place, so
//! readers never observe a partially written entry.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::CacheError;

use super::CacheStore;

/// Sub-directory of the temp dir used when a placeholder cannot be resolved.
pub const FALLBACK_CACHE_SUBDIR: &str = "rasterizing-cache";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Resolve a configured cache directory.
///
/// A leading `${NAME}` is replaced by the value of the environment variable
/// `NAME`. If the variable is unset the system temp directory joined with
/// [`FALLBACK_CACHE_SUBDIR`] is used instead. The rest of the string is kept.
///
/// ```
/// use rasterizing_cache::cache::resolve_cache_dir;
///
/// let dir = resolve_cache_dir("${SURELY_UNSET_VARIABLE_42}/rebuild");
/// assert!(dir.ends_with("rasterizing-cache/rebuild"));
/// ```
pub fn resolve_cache_dir(configured: &str) -> PathBuf {
    let Some(rest) = configured.strip_prefix("${") else {
        return PathBuf::from(configured);
    };
    let Some(end) = rest.find('}') else {
        return PathBuf::from(configured);
    };

    let name = &rest[..end];
    let remainder = rest[end + 1..].trim_start_matches(['/', '\\']);

    let base = match std::env::var(name) {
        Ok(value) if !value.is_empty() => PathBuf::from(value),
        _ => {
            debug!(property = name, "Cache directory property not set, using temp dir");
            std::env::temp_dir().join(FALLBACK_CACHE_SUBDIR)
        }
    };

    if remainder.is_empty() {
        base
    } else {
        base.join(remainder)
    }
}

/// Create the directory (and parents) if it is missing.
pub fn ensure_dir(path: &Path) -> Result<(), CacheError> {
    std::fs::create_dir_all(path).map_err(|e| CacheError::DirectoryCreation {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Settings for a [`DiskCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiskCacheConfig {
    /// Root directory, may start with a `${NAME}` placeholder
    pub dir: String,

    /// Entries whose file is older than this are treated as absent
    pub max_age: Option<Duration>,
}

/// File-per-entry store under a root directory.
pub struct DiskCache {
    root: PathBuf,
    max_age: Option<Duration>,
}

impl DiskCache {
    /// Open (and create if needed) a disk cache.
    ///
    /// Failing to create the directory is not fatal: a warning is logged and
    /// later operations report [`CacheError::Unavailable`] if the directory
    /// is still unusable.
    pub fn new(config: &DiskCacheConfig) -> Self {
        let root = resolve_cache_dir(&config.dir);
        if let Err(e) = ensure_dir(&root) {
            warn!(error = %e, "Disk cache degraded to best effort");
        }
        Self {
            root,
            max_age: config.max_age,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn layer_dir(&self, layer_id: &str) -> PathBuf {
        self.root.join(hex::encode(layer_id))
    }

    fn entry_path(&self, layer_id: &str, key: &str) -> PathBuf {
        self.layer_dir(layer_id).join(hex::encode(key))
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        match self.max_age {
            Some(max_age) => SystemTime::now()
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    fn name(&self) -> &'static str {
        "disk"
    }

    async fn get(&self, layer_id: &str, key: &str) -> Result<Option<Bytes>, CacheError> {
        let path = self.entry_path(layer_id, key);

        if self.max_age.is_some() {
            match fs::metadata(&path).await {
                Ok(meta) => {
                    if self.is_expired(meta.modified()?) {
                        debug!(layer_id, key, "Disk cache entry expired");
                        let _ = fs::remove_file(&path).await;
                        return Ok(None);
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        match fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, layer_id: &str, key: &str, value: Bytes) -> Result<(), CacheError> {
        let dir = self.layer_dir(layer_id);
        fs::create_dir_all(&dir).await?;

        let path = dir.join(hex::encode(key));
        let temp = dir.join(format!(
            ".tmp-{}-{}",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp, &value).await?;
        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, layer_id: &str, key: &str) -> Result<bool, CacheError> {
        match fs::remove_file(self.entry_path(layer_id, key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize, CacheError> {
        let mut layers = match fs::read_dir(&self.root).await {
            Ok(layers) => layers,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        while let Some(layer) = layers.next_entry().await? {
            if !layer.file_type().await?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(layer.path()).await?;
            while let Some(file) = files.next_entry().await? {
                if !file.file_name().to_string_lossy().starts_with(".tmp-") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
