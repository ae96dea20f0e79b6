//! Remote update settings: the localized update configuration and the
//! version eligibility table.

use crate::error::{Result, UpdaterError};
use crate::version::VersionCodec;
use serde::{Deserialize, Serialize};

/// Update configuration shipped as `media/update.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    /// Client language tag.
    pub lang: Option<String>,
    /// URL of the eligibility table.
    pub url: Option<String>,
    /// Localized message table indexed by [`TextId`].
    pub text: Vec<String>,
}

/// Indices into [`UpdateConfig::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TextId {
    Exit = 0,
    Retry = 1,
    Update = 2,
    Checking = 3,
    PackageError = 4,
    NotCompatible = 5,
    NetworkError = 6,
    NewVersion = 7,
    Progress = 8,
    Complete = 9,
}

impl UpdateConfig {
    /// Decode the JSON document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Localized text with `{0}`, `{1}`, ... replaced by `args`.
    ///
    /// Unknown ids yield an empty string.
    pub fn text(&self, id: TextId, args: &[&str]) -> String {
        let Some(template) = self.text.get(id as usize) else {
            return String::new();
        };
        args.iter()
            .enumerate()
            .fold(template.clone(), |text, (i, arg)| {
                text.replace(&format!("{{{i}}}"), arg)
            })
    }

    /// Remote-setting URL, if configured.
    pub fn setting_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Release policy class of a `(version, platform)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EligibilityStatus(pub i32);

impl EligibilityStatus {
    /// No policy for this build.
    pub const UNKNOWN: Self = Self(0);
    /// Test build.
    pub const BETA: Self = Self(1);
    /// Store review build.
    pub const REVIEW: Self = Self(2);
    /// Public release.
    pub const ONLINE: Self = Self(3);
    /// Channel review build.
    pub const CHANNEL_REVIEW: Self = Self(998);
    /// Government review build.
    pub const GOV_REVIEW: Self = Self(999);

    /// Whether the build is under any store or regulator review.
    pub fn is_review(self) -> bool {
        self == Self::REVIEW || self == Self::GOV_REVIEW
    }

    /// Raw status code.
    pub fn code(self) -> i32 {
        self.0
    }
}

/// One row of the eligibility table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Encoded release version.
    pub version: i32,
    /// Platform tag, e.g. `android`.
    pub platform: String,
    /// Policy applied to that release.
    pub status: EligibilityStatus,
}

/// Parsed eligibility table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionTable {
    /// Base URL of released content.
    pub resource_url: String,
    /// Base URL of the server list service.
    pub server_list_url: String,
    /// First auxiliary service URL.
    pub gift_url: String,
    /// Second auxiliary service URL.
    pub event_url: String,
    /// Known releases.
    pub records: Vec<VersionRecord>,
}

impl VersionTable {
    /// Parse the newline-delimited table.
    ///
    /// The four leading URL lines are mandatory. Malformed records are skipped.
    pub fn parse(text: &str, codec: &dyn VersionCodec) -> Result<Self> {
        let mut lines = text
            .split(['\r', '\n'])
            .filter(|line| !line.is_empty());

        let mut header = || {
            lines
                .next()
                .map(str::to_string)
                .ok_or_else(|| UpdaterError::VersionTable("missing url header".into()))
        };
        let resource_url = header()?;
        let server_list_url = header()?;
        let gift_url = header()?;
        let event_url = header()?;

        let records = lines
            .filter_map(|line| {
                let record = parse_record(line, codec);
                if record.is_none() {
                    tracing::debug!(line, "skipping version record");
                }
                record
            })
            .collect();

        Ok(Self {
            resource_url,
            server_list_url,
            gift_url,
            event_url,
            records,
        })
    }

    /// Status of `version` on `platform`.
    ///
    /// `force_beta` (a local marker) overrides the table.
    pub fn status(&self, version: i32, platform: &str, force_beta: bool) -> EligibilityStatus {
        if force_beta {
            return EligibilityStatus::BETA;
        }
        if version < 0 {
            return EligibilityStatus::UNKNOWN;
        }
        self.records
            .iter()
            .find(|r| r.version == version && r.platform == platform)
            .map(|r| r.status)
            .unwrap_or(EligibilityStatus::UNKNOWN)
    }

    /// Newest version sharing `status` on `platform`, or 0 when there is none.
    ///
    /// Beta builds with no beta release fall back to the newest public release.
    pub fn target_version(&self, status: EligibilityStatus, platform: &str) -> i32 {
        if status == EligibilityStatus::UNKNOWN {
            return 0;
        }
        let newest = self.newest(status, platform);
        if newest == 0 && status == EligibilityStatus::BETA {
            return self.newest(EligibilityStatus::ONLINE, platform);
        }
        newest
    }

    fn newest(&self, status: EligibilityStatus, platform: &str) -> i32 {
        self.records
            .iter()
            .filter(|r| r.status == status && r.platform == platform)
            .map(|r| r.version)
            .max()
            .unwrap_or(0)
    }

    /// Server list URL advertised for a status and platform.
    pub fn server_list_for(&self, status: EligibilityStatus, platform: &str) -> String {
        format!("{}?s={}&p={}", self.server_list_url, status.code(), platform)
    }
}

fn parse_record(line: &str, codec: &dyn VersionCodec) -> Option<VersionRecord> {
    let mut cols = line.split(',');
    let version = codec.to_code(cols.next()?);
    if version == 0 {
        return None;
    }
    let platform = cols.next()?.trim().to_string();
    let status = cols.next()?.trim().parse::<i32>().ok()?;
    Some(VersionRecord {
        version,
        platform,
        status: EligibilityStatus(status),
    })
}
