use crate::entry::ManifestEntry;
use crate::error::{Result, UpdaterError};
use crate::manifest::Manifest;
use crate::store::Storage;
use crate::version::VersionCodec;
use std::path::Path;

/// Ordered list of entries to download.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadPlan {
    entries: Vec<ManifestEntry>,
    total_bytes: u64,
}

impl DownloadPlan {
    /// Append an entry.
    pub fn push(&mut self, entry: ManifestEntry) {
        self.total_bytes += u64::from(entry.size);
        self.entries.push(entry);
    }

    /// Planned entries in download order.
    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Sum of the planned payload sizes.
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of planned entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing needs downloading.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of comparing the local manifest with a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diff {
    /// The local content is newer than the target.
    AlreadyCurrent,
    /// Entries that must be fetched.
    Plan(DownloadPlan),
}

/// Compare `local` against `target`.
///
/// An entry is planned when it is unknown locally, differs from the local
/// entry, or the local file on disk does not match the local entry. Plans are
/// ordered by hash so repeated runs download in the same order.
pub fn compute_diff<S>(
    local: &Manifest,
    target: &Manifest,
    storage: &S,
    persistent_root: &Path,
    codec: &dyn VersionCodec,
) -> Result<Diff>
where
    S: Storage + ?Sized,
{
    if local.version() > target.version() {
        return Ok(Diff::AlreadyCurrent);
    }
    if !codec.is_compatible(local.version(), target.version()) {
        return Err(UpdaterError::IncompatibleVersion {
            local: local.version(),
            target: target.version(),
        });
    }

    let mut candidates: Vec<&ManifestEntry> = target.entries().collect();
    candidates.sort_unstable_by_key(|entry| entry.hash);

    let mut plan = DownloadPlan::default();
    for wanted in candidates {
        let stale = match local.entry(wanted.hash) {
            None => true,
            Some(have) => {
                let on_disk = wanted
                    .write_path(persistent_root)
                    .and_then(|path| storage.file_len(&path));
                have.differs_from(wanted) || have.differs_from_on_disk(on_disk)
            }
        };
        if stale {
            plan.push(wanted.clone());
        }
    }

    tracing::debug!(
        entries = plan.len(),
        bytes = plan.total_bytes(),
        "download plan computed"
    );
    Ok(Diff::Plan(plan))
}
