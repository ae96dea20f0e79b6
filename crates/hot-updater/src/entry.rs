use crate::error::{Result, UpdaterError};
use std::convert::TryFrom;
use std::path::{Component, Path, PathBuf};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Compute the 64-bit content identifier of a canonical asset path.
///
/// Paths are case-folded and use `/` separators before hashing so the same
/// logical asset maps to the same key on every platform.
pub fn asset_hash(path: &str) -> u64 {
    path.chars()
        .map(|c| if c == '\\' { '/' } else { c })
        .flat_map(char::to_lowercase)
        .fold(FNV_OFFSET_BASIS, |hash, c| {
            let mut buf = [0u8; 4];
            c.encode_utf8(&mut buf)
                .bytes()
                .fold(hash, |h, b| (h ^ u64::from(b)).wrapping_mul(FNV_PRIME))
        })
}

/// Whether `name` is a relative path made only of plain components, so that
/// joining it onto a root can never leave that root.
pub(crate) fn is_contained_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('\\')
        && Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
}

/// How an asset was packaged, which decides its on-disk name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetMode {
    /// Not shipped.
    Ignore,
    /// Copied under a hash-derived name.
    RenameAndCopy,
    /// Compressed and stored under a hash-derived name.
    CompressAndRename,
    /// Stored under its original file name.
    OriginalName,
    /// Packed together with the rest of its directory.
    DirectoryPack,
}

impl AssetMode {
    /// Wire representation.
    pub fn code(self) -> i16 {
        match self {
            AssetMode::Ignore => -1,
            AssetMode::RenameAndCopy => 0,
            AssetMode::CompressAndRename => 1,
            AssetMode::OriginalName => 2,
            AssetMode::DirectoryPack => 3,
        }
    }
}

impl TryFrom<i16> for AssetMode {
    type Error = UpdaterError;

    fn try_from(code: i16) -> Result<Self> {
        match code {
            -1 => Ok(AssetMode::Ignore),
            0 => Ok(AssetMode::RenameAndCopy),
            1 => Ok(AssetMode::CompressAndRename),
            2 => Ok(AssetMode::OriginalName),
            3 => Ok(AssetMode::DirectoryPack),
            other => Err(UpdaterError::ManifestCorrupt(format!(
                "unknown asset mode {other}"
            ))),
        }
    }
}

/// Where an asset lives on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageTier {
    /// Read-only content bundled with the install.
    Streaming,
    /// Writable content downloaded by previous updates.
    Persistent,
}

/// Base URLs of the two storage tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUrls {
    /// Base URL of the bundled data directory.
    pub streaming: String,
    /// Base URL of the writable data directory.
    pub persistent: String,
}

impl BaseUrls {
    /// Base URL serving the given tier.
    pub fn for_tier(&self, tier: StorageTier) -> &str {
        match tier {
            StorageTier::Streaming => &self.streaming,
            StorageTier::Persistent => &self.persistent,
        }
    }
}

/// One tracked asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Hash of the canonical asset path; unique within a manifest.
    pub hash: u64,
    /// Packaging mode.
    pub mode: AssetMode,
    /// Tier the entry was loaded from.
    pub storage: StorageTier,
    /// CRC32 of the payload.
    pub checksum: u32,
    /// Payload length in bytes.
    pub size: u32,
    /// Literal file name, only meaningful for [`AssetMode::OriginalName`].
    pub origin: Option<String>,
}

impl ManifestEntry {
    /// Name of the stored file, relative to a tier root.
    ///
    /// An `OriginalName` entry without a name falls back to the hash-derived
    /// name, as does every other mode.
    pub fn filename(&self) -> String {
        match (&self.mode, self.origin.as_deref()) {
            (AssetMode::OriginalName, Some(origin)) if !origin.is_empty() => origin.to_string(),
            _ => format!("media/file-{:016x}", self.hash),
        }
    }

    /// Location the payload is written to.
    ///
    /// `None` for read-only tiers and for names that would leave
    /// `persistent_root`.
    pub fn write_path(&self, persistent_root: &Path) -> Option<PathBuf> {
        match self.storage {
            StorageTier::Persistent => {
                let name = self.filename();
                is_contained_name(&name).then(|| persistent_root.join(name))
            }
            StorageTier::Streaming => None,
        }
    }

    /// URL the payload can be read from.
    pub fn fetch_url(&self, bases: &BaseUrls) -> String {
        format!("{}{}", bases.for_tier(self.storage), self.filename())
    }

    /// Whether the two entries describe different content. `origin` is not compared.
    pub fn differs_from(&self, other: &ManifestEntry) -> bool {
        self.hash != other.hash
            || self.mode != other.mode
            || self.checksum != other.checksum
            || self.size != other.size
    }

    /// Whether the file on disk disagrees with this entry.
    ///
    /// Bundled files are immutable and never differ. For persistent entries
    /// `on_disk_len` is the length of the file found at the write path, `None`
    /// when absent.
    pub fn differs_from_on_disk(&self, on_disk_len: Option<u64>) -> bool {
        match self.storage {
            StorageTier::Streaming => false,
            StorageTier::Persistent => on_disk_len != Some(u64::from(self.size)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: u64, mode: AssetMode, storage: StorageTier) -> ManifestEntry {
        ManifestEntry {
            hash,
            mode,
            storage,
            checksum: 7,
            size: 10,
            origin: None,
        }
    }

    #[test]
    fn filename_is_hash_derived_unless_original_name() {
        let e = entry(0xab, AssetMode::RenameAndCopy, StorageTier::Persistent);
        assert_eq!(e.filename(), "media/file-00000000000000ab");

        let mut named = entry(1, AssetMode::OriginalName, StorageTier::Persistent);
        named.origin = Some("media/update.json".into());
        assert_eq!(named.filename(), "media/update.json");
    }

    #[test]
    fn original_name_without_name_uses_hash_name() {
        let mut e = entry(7, AssetMode::OriginalName, StorageTier::Persistent);
        assert_eq!(e.filename(), "media/file-0000000000000007");
        e.origin = Some(String::new());
        assert_eq!(e.filename(), "media/file-0000000000000007");
    }

    #[test]
    fn names_outside_the_root_have_no_write_path() {
        let root = Path::new("/data/persistent");
        let mut e = entry(1, AssetMode::OriginalName, StorageTier::Persistent);
        let escaping = [
            "/etc/evil.cfg",
            "../../outside.bin",
            "media/../../x",
            "./media/a",
            "media\\..\\x",
        ];
        for origin in escaping {
            e.origin = Some(origin.into());
            assert_eq!(e.write_path(root), None, "{origin}");
        }

        e.origin = Some("media/ui/atlas.png".into());
        let path = e.write_path(root).unwrap();
        assert!(path.starts_with(root));
        assert_eq!(path, root.join("media/ui/atlas.png"));
    }

    #[test]
    fn write_path_only_for_persistent() {
        let root = Path::new("/data");
        let e = entry(1, AssetMode::RenameAndCopy, StorageTier::Streaming);
        assert!(e.write_path(root).is_none());

        let e = entry(1, AssetMode::RenameAndCopy, StorageTier::Persistent);
        assert_eq!(
            e.write_path(root).unwrap(),
            root.join("media/file-0000000000000001")
        );
    }

    #[test]
    fn fetch_url_uses_tier_base() {
        let bases = BaseUrls {
            streaming: "file:///app/data/".into(),
            persistent: "file:///home/u/data/".into(),
        };
        let e = entry(2, AssetMode::CompressAndRename, StorageTier::Streaming);
        assert_eq!(
            e.fetch_url(&bases),
            "file:///app/data/media/file-0000000000000002"
        );
    }

    #[test]
    fn differs_ignores_origin_and_storage() {
        let a = entry(1, AssetMode::RenameAndCopy, StorageTier::Streaming);
        let mut b = entry(1, AssetMode::RenameAndCopy, StorageTier::Persistent);
        b.origin = Some("x".into());
        assert!(!a.differs_from(&b));

        b.size = 11;
        assert!(a.differs_from(&b));
    }

    #[test]
    fn on_disk_check() {
        let bundled = entry(1, AssetMode::RenameAndCopy, StorageTier::Streaming);
        assert!(!bundled.differs_from_on_disk(None));

        let local = entry(1, AssetMode::RenameAndCopy, StorageTier::Persistent);
        assert!(local.differs_from_on_disk(None));
        assert!(local.differs_from_on_disk(Some(9)));
        assert!(!local.differs_from_on_disk(Some(10)));
    }

    #[test]
    fn hash_normalises_case_and_separators() {
        assert_eq!(asset_hash("Media\\UI\\Atlas.png"), asset_hash("media/ui/atlas.png"));
        assert_ne!(asset_hash("a"), asset_hash("b"));
        assert_eq!(asset_hash(""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn mode_codes_round_trip() {
        for code in -1..=3i16 {
            assert_eq!(AssetMode::try_from(code).unwrap().code(), code);
        }
        assert!(AssetMode::try_from(4).is_err());
    }
}
