use crate::{
    config::{UpdaterConfig, UPDATE_CONFIG_FILE},
    entry::{ManifestEntry, StorageTier},
    error::{Result, UpdaterError},
    fetcher::{cache_busted, fetch_with_retry, AssetFetcher},
    host::{format_progress, format_size, Notice, NoticeAction, NoticeChoice, SessionInfo, UpdateHost},
    manifest::Manifest,
    plan::{compute_diff, Diff, DownloadPlan},
    setting::{EligibilityStatus, TextId, UpdateConfig, VersionTable},
    store::{LocalManifestStore, Storage, MANIFEST_FILE},
    version::{DottedVersionCodec, VersionCodec},
};
use bytes::Bytes;
use std::sync::Arc;

/// Settled result of an update pass, as shown to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Local content is at the target version, or no update applies.
    Complete,
    /// The target needs a reinstall.
    BlockedIncompatible,
    /// A fetch failed after all retries; retrying may succeed.
    BlockedNetworkError,
    /// The user chose to leave.
    Exited,
}

/// Coarse state of the orchestrator.
///
/// A host-requested retry goes straight back to `Working`; see
/// [`UpdateOrchestrator::restarts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Running, or waiting on the host after a blocked pass.
    Working,
    /// The sequence finished.
    Complete,
}

/// Byte accounting of the download loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Bytes planned.
    pub total_bytes: u64,
    /// Bytes written so far.
    pub downloaded_bytes: u64,
    /// Entries written so far.
    pub downloaded_entries: usize,
    /// Bytes written since the manifest was last persisted.
    pub unsaved_bytes: u64,
    /// Manifest checkpoints taken during the loop.
    pub checkpoints: usize,
}

impl DownloadProgress {
    /// Completed fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f32 {
        if self.total_bytes == 0 {
            0.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64) as f32
        }
    }
}

/// Drives the local asset store to the version the eligibility table selects.
pub struct UpdateOrchestrator<F, S, H> {
    fetcher: F,
    store: LocalManifestStore<S>,
    host: H,
    config: UpdaterConfig,
    codec: Arc<dyn VersionCodec>,

    phase: Phase,
    restarts: u32,
    update_config: Option<UpdateConfig>,
    table: Option<VersionTable>,
    session: Option<SessionInfo>,
    target_version: i32,
    plan: Option<DownloadPlan>,
    progress: DownloadProgress,
}

impl<F, S, H> UpdateOrchestrator<F, S, H>
where
    F: AssetFetcher,
    S: Storage,
    H: UpdateHost,
{
    /// Create an orchestrator owning its local manifest store.
    pub fn new(fetcher: F, storage: S, host: H, config: UpdaterConfig) -> Self {
        let store = LocalManifestStore::new(
            storage,
            config.base_urls(),
            config.persistent_path.clone(),
        );
        Self {
            fetcher,
            store,
            host,
            config,
            codec: Arc::new(DottedVersionCodec),
            phase: Phase::Working,
            restarts: 0,
            update_config: None,
            table: None,
            session: None,
            target_version: 0,
            plan: None,
            progress: DownloadProgress::default(),
        }
    }

    /// Replace the version string policy.
    pub fn with_version_codec(mut self, codec: Arc<dyn VersionCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Number of host-requested restarts taken by [`drive`](Self::drive).
    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    /// The local manifest store.
    pub fn store(&self) -> &LocalManifestStore<S> {
        &self.store
    }

    /// The host callbacks.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Session published during the last pass.
    pub fn session(&self) -> Option<&SessionInfo> {
        self.session.as_ref()
    }

    /// Download plan of the last pass, if one was computed.
    pub fn plan(&self) -> Option<&DownloadPlan> {
        self.plan.as_ref()
    }

    /// Byte accounting of the last download loop.
    pub fn progress(&self) -> DownloadProgress {
        self.progress
    }

    /// Target version chosen in the last pass, 0 if none.
    pub fn target_version(&self) -> i32 {
        self.target_version
    }

    /// Installed content version as a string.
    pub fn local_version_string(&self) -> String {
        self.codec.render(self.store.manifest().version())
    }

    fn reset(&mut self) {
        self.phase = Phase::Working;
        self.update_config = None;
        self.table = None;
        self.session = None;
        self.target_version = 0;
        self.plan = None;
        self.progress = DownloadProgress::default();
    }

    /// Run passes until the outcome needs no further user decision.
    ///
    /// Network failures offer a retry which restarts the whole sequence;
    /// already downloaded entries are kept through the persisted manifest.
    pub async fn drive(&mut self) -> Result<UpdateOutcome> {
        loop {
            let outcome = self.run().await?;
            match outcome {
                UpdateOutcome::BlockedNetworkError => {
                    let notice =
                        self.notice(TextId::NetworkError, &[], Some((NoticeAction::Retry, TextId::Retry)));
                    match self.host.notice(notice).await {
                        NoticeChoice::Action => {
                            self.restarts += 1;
                            tracing::info!(restarts = self.restarts, "restarting update on request");
                        }
                        NoticeChoice::Exit => return Ok(UpdateOutcome::Exited),
                    }
                }
                UpdateOutcome::BlockedIncompatible => {
                    let notice = self.notice(
                        TextId::NotCompatible,
                        &[],
                        Some((NoticeAction::OpenStore, TextId::Update)),
                    );
                    return Ok(match self.host.notice(notice).await {
                        NoticeChoice::Action => UpdateOutcome::BlockedIncompatible,
                        NoticeChoice::Exit => UpdateOutcome::Exited,
                    });
                }
                settled => return Ok(settled),
            }
        }
    }

    /// Run the update sequence once from the start.
    ///
    /// Only a missing update configuration is an error; the host is expected
    /// to terminate in that case. Every other failure is reported as an
    /// [`UpdateOutcome`].
    pub async fn run(&mut self) -> Result<UpdateOutcome> {
        self.reset();
        let outcome = self.run_steps().await?;
        if outcome == UpdateOutcome::Complete {
            self.phase = Phase::Complete;
        }
        Ok(outcome)
    }

    async fn run_steps(&mut self) -> Result<UpdateOutcome> {
        let update_config = self.load_update_config().await?;
        self.update_config = Some(update_config);
        self.host.progress(0.0, &self.text(TextId::Checking, &[]));

        self.store.load_local(&self.fetcher).await;
        let local_version = self.store.manifest().version();
        let local_string = self.local_version_string();

        if self.config.skip_update {
            tracing::info!(version = %local_string, "update skipped by configuration");
            return Ok(UpdateOutcome::Complete);
        }

        let table = match self.fetch_version_table(&local_string).await {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "version table unavailable");
                return Ok(UpdateOutcome::BlockedNetworkError);
            }
        };

        let platform = self.config.platform.clone();
        let force_beta = self
            .store
            .storage()
            .file_len(&self.config.beta_marker_path())
            .is_some();
        let status = table.status(local_version, &platform, force_beta);
        let session = SessionInfo {
            lang: self.update_config.as_ref().and_then(|c| c.lang.clone()),
            version: local_string.clone(),
            platform: platform.clone(),
            beta: status == EligibilityStatus::BETA,
            review: status.is_review(),
            server_list_url: table.server_list_for(status, &platform),
            gift_url: table.gift_url.clone(),
            event_url: table.event_url.clone(),
        };
        tracing::info!(
            version = %local_string,
            platform = %platform,
            status = status.code(),
            beta = session.beta,
            review = session.review,
            "update session resolved"
        );
        self.host.on_session(&session);
        self.session = Some(session);

        let target = table.target_version(status, &platform);
        self.table = Some(table);
        if target == 0 || target == local_version {
            tracing::info!(target, "no update available");
            return Ok(self.finish());
        }
        self.target_version = target;

        let target_manifest = match self.fetch_target_manifest().await {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(error = %err, "target manifest unavailable");
                return Ok(UpdateOutcome::BlockedNetworkError);
            }
        };

        let diff = compute_diff(
            self.store.manifest(),
            &target_manifest,
            self.store.storage(),
            self.store.persistent_root(),
            self.codec.as_ref(),
        );
        let plan = match diff {
            Ok(Diff::Plan(plan)) => plan,
            Ok(Diff::AlreadyCurrent) => {
                tracing::info!(
                    local = local_version,
                    target = target_manifest.version(),
                    "local content is newer than target"
                );
                return Ok(self.finish());
            }
            Err(err @ UpdaterError::IncompatibleVersion { .. }) => {
                tracing::warn!(error = %err, "target requires reinstall");
                return Ok(UpdateOutcome::BlockedIncompatible);
            }
            Err(err) => return Err(err),
        };

        if plan.is_empty() {
            self.store
                .manifest_mut()
                .set_version(target_manifest.version());
            self.store.persist();
            self.plan = Some(plan);
            self.host.progress(0.0, &self.text(TextId::Complete, &[]));
            return Ok(self.finish());
        }

        tracing::info!(
            entries = plan.len(),
            bytes = plan.total_bytes(),
            target = %self.codec.render(target),
            "update available"
        );

        if self.needs_confirmation(&plan) {
            let size = format_size(plan.total_bytes());
            let notice = self.notice(
                TextId::NewVersion,
                &[&size],
                Some((NoticeAction::Update, TextId::Update)),
            );
            if self.host.notice(notice).await == NoticeChoice::Exit {
                self.plan = Some(plan);
                return Ok(UpdateOutcome::Exited);
            }
        }

        let outcome = self.download(&plan, target_manifest.version()).await;
        self.plan = Some(plan);
        Ok(outcome)
    }

    fn finish(&self) -> UpdateOutcome {
        self.host.on_update_end();
        UpdateOutcome::Complete
    }

    fn needs_confirmation(&self, plan: &DownloadPlan) -> bool {
        !self.host.is_local_network() && plan.total_bytes() > self.config.confirm_threshold_bytes
    }

    async fn load_update_config(&self) -> Result<UpdateConfig> {
        let bases = self.store.bases();
        for base in [&bases.persistent, &bases.streaming] {
            let url = format!("{base}{UPDATE_CONFIG_FILE}");
            match self.fetcher.fetch(&url).await {
                Ok(body) => match UpdateConfig::from_json(&body) {
                    Ok(config) => return Ok(config),
                    Err(err) => tracing::warn!(url = %url, error = %err, "invalid update config"),
                },
                Err(err) => tracing::debug!(url = %url, error = %err, "update config not found"),
            }
        }
        tracing::error!("no usable update configuration");
        Err(UpdaterError::ConfigUnavailable(
            "persistent and bundled update.json both unavailable".into(),
        ))
    }

    async fn fetch_version_table(&self, local_version: &str) -> Result<VersionTable> {
        let setting_url = self
            .update_config
            .as_ref()
            .and_then(UpdateConfig::setting_url)
            .ok_or_else(|| UpdaterError::VersionTable("no remote setting url".into()))?;

        let url = format!(
            "{}&channel_id={}&p={}&v={}",
            cache_busted(setting_url),
            self.config.channel_id.as_deref().unwrap_or_default(),
            self.config.platform,
            local_version
        );
        let body = fetch_with_retry(&self.fetcher, &url, &self.config.retry, |body| {
            if body.is_empty() {
                Err(UpdaterError::Network {
                    url: url.clone(),
                    reason: "empty response".into(),
                })
            } else {
                Ok(())
            }
        })
        .await?;

        VersionTable::parse(&String::from_utf8_lossy(&body), self.codec.as_ref())
    }

    fn content_root_url(&self) -> Result<String> {
        let table = self
            .table
            .as_ref()
            .ok_or_else(|| UpdaterError::validation("version table not loaded"))?;
        Ok(format!(
            "{}{}-{}/",
            table.resource_url,
            self.codec.render(self.target_version),
            self.config.platform
        ))
    }

    async fn fetch_target_manifest(&self) -> Result<Manifest> {
        let url = cache_busted(&format!("{}{MANIFEST_FILE}", self.content_root_url()?));
        let body = fetch_with_retry(&self.fetcher, &url, &self.config.retry, |_| Ok(())).await?;
        Manifest::from_bytes(&body, StorageTier::Persistent)
    }

    async fn download(&mut self, plan: &DownloadPlan, target_manifest_version: i32) -> UpdateOutcome {
        let root_url = match self.content_root_url() {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(error = %err, "cannot resolve content url");
                return UpdateOutcome::BlockedNetworkError;
            }
        };

        let media_dir = self.store.persistent_root().join("media");
        if let Err(err) = self.store.storage().ensure_dir(&media_dir) {
            tracing::warn!(path = %media_dir.display(), error = %err, "cannot create media directory");
        }

        self.progress = DownloadProgress {
            total_bytes: plan.total_bytes(),
            ..DownloadProgress::default()
        };
        self.report_progress();

        for entry in plan.entries() {
            let url = cache_busted(&format!("{root_url}{}", entry.filename()));
            let verify_checksums = self.config.verify_checksums;
            let fetched = fetch_with_retry(&self.fetcher, &url, &self.config.retry, |body| {
                check_payload(entry, body, &url, verify_checksums)
            })
            .await;

            let body = match fetched {
                Ok(body) => body,
                Err(err) => {
                    tracing::warn!(
                        file = %entry.filename(),
                        error = %err,
                        downloaded = self.progress.downloaded_entries,
                        "download aborted"
                    );
                    return UpdateOutcome::BlockedNetworkError;
                }
            };

            if let Err(err) = self.write_entry(entry, &body) {
                tracing::error!(file = %entry.filename(), error = %err, "failed to store payload");
                return UpdateOutcome::BlockedNetworkError;
            }
            self.store.manifest_mut().upsert(entry.clone());

            let size = u64::from(entry.size);
            self.progress.downloaded_bytes += size;
            self.progress.downloaded_entries += 1;
            self.progress.unsaved_bytes += size;
            self.report_progress();

            if self.progress.unsaved_bytes >= self.config.checkpoint_bytes {
                self.progress.unsaved_bytes = 0;
                self.progress.checkpoints += 1;
                self.store.persist();
            }
        }

        self.store
            .manifest_mut()
            .set_version(target_manifest_version);
        self.store.persist();
        self.progress.unsaved_bytes = 0;

        tracing::info!(
            version = %self.local_version_string(),
            entries = self.progress.downloaded_entries,
            bytes = self.progress.downloaded_bytes,
            "update complete"
        );
        self.host.progress(1.0, &self.text(TextId::Complete, &[]));
        self.finish()
    }

    fn write_entry(&self, entry: &ManifestEntry, body: &Bytes) -> Result<()> {
        let path = entry
            .write_path(self.store.persistent_root())
            .ok_or_else(|| UpdaterError::validation("entry has no writable location"))?;
        self.store.storage().write_file(&path, body)?;
        Ok(())
    }

    fn report_progress(&self) {
        let label = self.text(
            TextId::Progress,
            &[&format_progress(
                self.progress.downloaded_bytes,
                self.progress.total_bytes,
            )],
        );
        self.host.progress(self.progress.fraction(), &label);
    }

    fn text(&self, id: TextId, args: &[&str]) -> String {
        self.update_config
            .as_ref()
            .map(|config| config.text(id, args))
            .unwrap_or_default()
    }

    fn notice(&self, message: TextId, args: &[&str], action: Option<(NoticeAction, TextId)>) -> Notice {
        Notice {
            message: self.text(message, args),
            exit_label: self.text(TextId::Exit, &[]),
            action: action.map(|(action, label)| (action, self.text(label, &[]))),
        }
    }
}

fn check_payload(entry: &ManifestEntry, body: &Bytes, url: &str, verify_checksum: bool) -> Result<()> {
    let actual = body.len() as u64;
    if actual != u64::from(entry.size) {
        return Err(UpdaterError::SizeMismatch {
            url: url.to_string(),
            expected: u64::from(entry.size),
            actual,
        });
    }
    if verify_checksum {
        let crc = crc32fast::hash(body);
        if crc != entry.checksum {
            return Err(UpdaterError::ChecksumMismatch {
                url: url.to_string(),
                expected: entry.checksum,
                actual: crc,
            });
        }
    }
    Ok(())
}
