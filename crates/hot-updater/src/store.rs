use crate::entry::{BaseUrls, StorageTier};
use crate::error::{Result, UpdaterError};
use crate::fetcher::AssetFetcher;
use crate::manifest::Manifest;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Location of a tier's manifest relative to its root.
pub const MANIFEST_FILE: &str = "media/file.list";

/// Durable storage used for the persistent tier.
pub trait Storage: Send + Sync {
    /// Read a whole file.
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Replace a file with `data`.
    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Create a directory and its parents if missing.
    fn ensure_dir(&self, path: &Path) -> io::Result<()>;

    /// Length of a regular file, `None` when it does not exist.
    fn file_len(&self, path: &Path) -> Option<u64>;
}

/// [`Storage`] on the local filesystem with atomic replacement.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsStorage;

impl Storage for FsStorage {
    fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let parent = path.parent().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory")
        })?;
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }

        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(data)?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|err| err.error)?;
        Ok(())
    }

    fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn file_len(&self, path: &Path) -> Option<u64> {
        fs::metadata(path)
            .ok()
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
    }
}

/// Effective local manifest and its persistent copy.
pub struct LocalManifestStore<S> {
    storage: S,
    bases: BaseUrls,
    persistent_root: PathBuf,
    manifest: Manifest,
}

impl<S> LocalManifestStore<S>
where
    S: Storage,
{
    /// Create a store with an empty manifest.
    pub fn new(storage: S, bases: BaseUrls, persistent_root: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            bases,
            persistent_root: persistent_root.into(),
            manifest: Manifest::new(),
        }
    }

    /// The effective local manifest.
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Mutable access for the single writer.
    pub fn manifest_mut(&mut self) -> &mut Manifest {
        &mut self.manifest
    }

    /// Backing storage.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Root directory of the persistent tier.
    pub fn persistent_root(&self) -> &Path {
        &self.persistent_root
    }

    /// Base URLs of both tiers.
    pub fn bases(&self) -> &BaseUrls {
        &self.bases
    }

    /// Path of the persisted manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.persistent_root.join(MANIFEST_FILE)
    }

    /// Fetch the bundled and persisted manifests and merge them.
    ///
    /// Each channel fails independently; a channel that cannot be fetched or
    /// decoded contributes an empty manifest at version 0.
    pub async fn load_local<F>(&mut self, fetcher: &F) -> &Manifest
    where
        F: AssetFetcher + ?Sized,
    {
        let bundled = load_channel(fetcher, &self.bases.streaming, StorageTier::Streaming).await;
        let persisted =
            load_channel(fetcher, &self.bases.persistent, StorageTier::Persistent).await;

        self.manifest = merge(bundled, persisted);
        tracing::info!(
            version = self.manifest.version(),
            entries = self.manifest.len(),
            "local manifest loaded"
        );
        &self.manifest
    }

    /// Write the manifest to durable storage.
    pub fn try_persist(&self) -> Result<()> {
        let path = self.manifest_path();
        let persist_err = |source| UpdaterError::Persist {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent() {
            self.storage.ensure_dir(dir).map_err(persist_err)?;
        }
        self.storage
            .write_file(&path, &self.manifest.to_bytes())
            .map_err(persist_err)?;
        tracing::debug!(path = %path.display(), version = self.manifest.version(), "manifest persisted");
        Ok(())
    }

    /// Write the manifest to durable storage, logging failures.
    ///
    /// The in-memory manifest stays authoritative when this fails.
    pub fn persist(&self) -> bool {
        match self.try_persist() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(error = %err, "failed to persist local manifest");
                false
            }
        }
    }
}

async fn load_channel<F>(fetcher: &F, base: &str, tier: StorageTier) -> Manifest
where
    F: AssetFetcher + ?Sized,
{
    let url = format!("{base}{MANIFEST_FILE}");
    let bytes = match fetcher.fetch(&url).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::debug!(url = %url, error = %err, "manifest channel unavailable");
            return Manifest::new();
        }
    };

    Manifest::from_bytes(&bytes, tier).unwrap_or_else(|err| {
        tracing::warn!(url = %url, error = %err, "discarding unreadable manifest");
        Manifest::new()
    })
}

/// Compose the effective local manifest from the bundled and persisted ones.
///
/// A missing or older persisted manifest yields the bundle unchanged.
/// Otherwise the bundle takes the persisted version and every persisted entry
/// that is new or differs replaces the bundled one.
pub fn merge(bundled: Manifest, persisted: Manifest) -> Manifest {
    if persisted.version() == 0 || bundled.version() > persisted.version() {
        return bundled;
    }

    let mut merged = bundled;
    merged.set_version(persisted.version());
    for entry in persisted.entries() {
        let replace = merged
            .entry(entry.hash)
            .map_or(true, |existing| existing.differs_from(entry));
        if replace {
            merged.upsert(entry.clone());
        }
    }
    merged
}
