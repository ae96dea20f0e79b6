//! Manifest-driven incremental asset updater.
//!
//! The client keeps a binary manifest describing every asset it owns. On
//! startup the bundled and persisted manifests are merged into the effective
//! local manifest, a remote eligibility table selects the target version, and
//! the target manifest is diffed against the local one. Changed assets are
//! downloaded one by one with bounded retries; the local manifest is
//! checkpointed every few hundred KiB so an interrupted update resumes where
//! it stopped on the next run.
//!
//! ```ignore
//! use hot_updater::{FsStorage, HttpFetcher, UpdateOrchestrator, UpdateOutcome, UpdaterConfig};
//!
//! # async fn demo(host: impl hot_updater::UpdateHost) -> hot_updater::Result<()> {
//! let config = UpdaterConfig::from_json_file("updater.json".as_ref())?;
//! let fetcher = HttpFetcher::builder().build()?;
//! let mut orchestrator = UpdateOrchestrator::new(fetcher, FsStorage, host, config);
//!
//! match orchestrator.drive().await? {
//!     UpdateOutcome::Complete => println!("content is up to date"),
//!     other => println!("update stopped: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod entry;
mod error;
mod fetcher;
mod host;
mod manifest;
mod plan;
mod setting;
mod store;
mod updater;
mod version;

pub use config::{UpdaterConfig, UPDATE_CONFIG_FILE};
pub use entry::{asset_hash, AssetMode, BaseUrls, ManifestEntry, StorageTier};
pub use error::{Result, UpdaterError};
pub use fetcher::{
    cache_busted, fetch_with_retry, AssetFetcher, HttpFetcher, HttpFetcherBuilder, RetryPolicy,
};
pub use host::{
    format_progress, format_size, Notice, NoticeAction, NoticeChoice, SessionInfo, UpdateHost,
};
pub use manifest::Manifest;
pub use plan::{compute_diff, Diff, DownloadPlan};
pub use setting::{EligibilityStatus, TextId, UpdateConfig, VersionRecord, VersionTable};
pub use store::{merge, FsStorage, LocalManifestStore, Storage, MANIFEST_FILE};
pub use updater::{DownloadProgress, Phase, UpdateOrchestrator, UpdateOutcome};
pub use version::{DottedVersionCodec, VersionCodec};
