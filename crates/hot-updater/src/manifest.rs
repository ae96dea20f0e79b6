//! Binary asset manifest.
//!
//! Layout (little-endian, `varint` = 7-bit groups, low group first):
//!
//! ```text
//! version:i32 count:varint
//! { hash:u64 mode:i16 checksum:u32 size:varint [name_len:varint name:utf8] }*
//! ```
//!
//! The name is only present for [`AssetMode::OriginalName`] entries. It must be
//! a relative path of plain components; an empty name means "no name".

use crate::entry::{asset_hash, is_contained_name, AssetMode, ManifestEntry, StorageTier};
use crate::error::{Result, UpdaterError};
use bytes::{Buf, BufMut};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::io::Write;

/// Versioned set of manifest entries keyed by content hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    version: i32,
    entries: HashMap<u64, ManifestEntry>,
}

impl Manifest {
    /// Create an empty manifest at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a manifest, tagging every entry with `tier`.
    pub fn from_bytes(bytes: &[u8], tier: StorageTier) -> Result<Self> {
        let mut manifest = Self::new();
        manifest.load(bytes, tier)?;
        Ok(manifest)
    }

    /// Release identifier; 0 means nothing has been loaded.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Overwrite the release identifier.
    pub fn set_version(&mut self, version: i32) {
        self.version = version;
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reset to version 0 with no entries.
    pub fn clear(&mut self) {
        self.version = 0;
        self.entries.clear();
    }

    /// Look an entry up by content hash.
    pub fn entry(&self, hash: u64) -> Option<&ManifestEntry> {
        self.entries.get(&hash)
    }

    /// Look an entry up by canonical asset path.
    pub fn entry_by_name(&self, path: &str) -> Option<&ManifestEntry> {
        self.entry(asset_hash(path))
    }

    /// Insert an entry, replacing any entry with the same hash.
    pub fn upsert(&mut self, entry: ManifestEntry) {
        self.entries.insert(entry.hash, entry);
    }

    /// Iterate over all entries in unspecified order.
    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> + '_ {
        self.entries.values()
    }

    /// Replace the version and upsert every entry decoded from `bytes`.
    ///
    /// On any decoding failure the manifest is left cleared.
    pub fn load(&mut self, bytes: &[u8], tier: StorageTier) -> Result<()> {
        match decode(bytes, tier) {
            Ok((version, decoded)) => {
                self.version = version;
                for entry in decoded {
                    self.upsert(entry);
                }
                Ok(())
            }
            Err(err) => {
                self.clear();
                Err(err)
            }
        }
    }

    /// Encode the manifest. Entries are written in ascending hash order.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + self.entries.len() * 24);
        out.put_i32_le(self.version);
        put_varint(&mut out, self.entries.len() as u32);

        let mut sorted: Vec<&ManifestEntry> = self.entries.values().collect();
        sorted.sort_unstable_by_key(|entry| entry.hash);
        for entry in sorted {
            out.put_u64_le(entry.hash);
            out.put_i16_le(entry.mode.code());
            out.put_u32_le(entry.checksum);
            put_varint(&mut out, entry.size);
            if entry.mode == AssetMode::OriginalName {
                let name = entry.origin.as_deref().unwrap_or_default();
                put_varint(&mut out, name.len() as u32);
                out.put_slice(name.as_bytes());
            }
        }
        out
    }

    /// Encode the manifest into `writer`.
    pub fn save<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())?;
        writer.flush()
    }
}

fn decode(mut buf: &[u8], tier: StorageTier) -> Result<(i32, Vec<ManifestEntry>)> {
    need(&buf, 4, "version")?;
    let version = buf.get_i32_le();
    let count = get_varint(&mut buf)? as usize;

    // Each record is at least 15 bytes, so a count larger than that is bogus.
    if count > buf.remaining() / 15 {
        return Err(UpdaterError::ManifestCorrupt(format!(
            "entry count {count} exceeds payload of {} bytes",
            buf.remaining()
        )));
    }

    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        need(&buf, 14, "entry header")?;
        let hash = buf.get_u64_le();
        let mode = AssetMode::try_from(buf.get_i16_le())?;
        let checksum = buf.get_u32_le();
        let size = get_varint(&mut buf)?;

        let origin = if mode == AssetMode::OriginalName {
            let len = get_varint(&mut buf)? as usize;
            need(&buf, len, "file name")?;
            let name = String::from_utf8(buf[..len].to_vec()).map_err(|err| {
                UpdaterError::ManifestCorrupt(format!("file name is not utf-8: {err}"))
            })?;
            buf.advance(len);
            if name.is_empty() {
                None
            } else if is_contained_name(&name) {
                Some(name)
            } else {
                return Err(UpdaterError::ManifestCorrupt(format!(
                    "file name {name:?} escapes the data directory"
                )));
            }
        } else {
            None
        };

        entries.push(ManifestEntry {
            hash,
            mode,
            storage: tier,
            checksum,
            size,
            origin,
        });
    }

    Ok((version, entries))
}

fn need(buf: &[u8], len: usize, what: &str) -> Result<()> {
    if buf.remaining() < len {
        return Err(UpdaterError::ManifestCorrupt(format!(
            "truncated {what}: need {len} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

fn get_varint(buf: &mut &[u8]) -> Result<u32> {
    let mut value: u32 = 0;
    for shift in (0..35).step_by(7) {
        need(buf, 1, "varint")?;
        let byte = buf.get_u8();
        if shift == 28 && byte & 0xf0 != 0 {
            return Err(UpdaterError::ManifestCorrupt(
                "varint overflows 32 bits".into(),
            ));
        }
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(UpdaterError::ManifestCorrupt(
        "varint longer than 5 bytes".into(),
    ))
}

fn put_varint<B: BufMut>(buf: &mut B, mut value: u32) {
    while value >= 0x80 {
        buf.put_u8((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}
