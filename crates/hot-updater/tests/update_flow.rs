use async_trait::async_trait;
use bytes::Bytes;
use hot_updater::{
    AssetFetcher, AssetMode, FsStorage, Manifest, ManifestEntry, Notice, NoticeAction,
    NoticeChoice, Phase, Result, RetryPolicy, SessionInfo, StorageTier, UpdateHost, UpdateOrchestrator,
    UpdateOutcome, UpdaterConfig, UpdaterError, MANIFEST_FILE,
};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const SETTING_URL: &str = "cdn://setting";
const UPDATE_JSON: &str = r#"{
    "lang": "en",
    "url": "cdn://setting",
    "text": ["Exit", "Retry", "Update", "Checking", "Package error", "Reinstall required",
             "Network error", "Download {0}?", "{0}", "Done"]
}"#;

#[derive(Default)]
struct Remote {
    files: HashMap<String, Vec<u8>>,
    failures: HashMap<String, u32>,
    calls: HashMap<String, u32>,
}

/// Serves `data://` from the persistent directory and everything else from memory.
#[derive(Clone)]
struct MockFetcher {
    remote: Arc<Mutex<Remote>>,
    data_root: PathBuf,
}

impl MockFetcher {
    fn put(&self, url: &str, body: Vec<u8>) {
        self.remote.lock().unwrap().files.insert(url.to_string(), body);
    }

    fn remove(&self, url: &str) {
        self.remote.lock().unwrap().files.remove(url);
    }

    fn fail(&self, url: &str, times: u32) {
        self.remote
            .lock()
            .unwrap()
            .failures
            .insert(url.to_string(), times);
    }

    fn calls(&self, url: &str) -> u32 {
        self.remote
            .lock()
            .unwrap()
            .calls
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        let key = url.split('?').next().unwrap_or(url).to_string();
        let not_found = |reason: String| UpdaterError::Network {
            url: key.clone(),
            reason,
        };

        if let Some(relative) = key.strip_prefix("data://") {
            return std::fs::read(self.data_root.join(relative))
                .map(Bytes::from)
                .map_err(|err| not_found(err.to_string()));
        }

        let mut remote = self.remote.lock().unwrap();
        *remote.calls.entry(key.clone()).or_default() += 1;
        if let Some(left) = remote.failures.get_mut(&key) {
            if *left > 0 {
                *left -= 1;
                return Err(not_found("injected failure".into()));
            }
        }
        remote
            .files
            .get(&key)
            .cloned()
            .map(Bytes::from)
            .ok_or_else(|| not_found("404".into()))
    }
}

#[derive(Default)]
struct ScriptedHost {
    local_network: bool,
    choices: Mutex<VecDeque<NoticeChoice>>,
    notices: Mutex<Vec<Notice>>,
    progress: Mutex<Vec<(f32, String)>>,
    sessions: Mutex<Vec<SessionInfo>>,
    ended: AtomicUsize,
}

impl ScriptedHost {
    fn answering(choices: &[NoticeChoice]) -> Self {
        Self {
            choices: Mutex::new(choices.iter().copied().collect()),
            ..Self::default()
        }
    }

    fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpdateHost for ScriptedHost {
    fn progress(&self, fraction: f32, label: &str) {
        self.progress
            .lock()
            .unwrap()
            .push((fraction, label.to_string()));
    }

    async fn notice(&self, notice: Notice) -> NoticeChoice {
        self.notices.lock().unwrap().push(notice);
        self.choices
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(NoticeChoice::Exit)
    }

    fn is_local_network(&self) -> bool {
        self.local_network
    }

    fn on_session(&self, session: &SessionInfo) {
        self.sessions.lock().unwrap().push(session.clone());
    }

    fn on_update_end(&self) {
        self.ended.fetch_add(1, Ordering::SeqCst);
    }
}

fn asset(hash: u64, payload: &[u8], tier: StorageTier) -> ManifestEntry {
    ManifestEntry {
        hash,
        mode: AssetMode::RenameAndCopy,
        storage: tier,
        checksum: crc32fast::hash(payload),
        size: payload.len() as u32,
        origin: None,
    }
}

fn asset_url(version: &str, hash: u64) -> String {
    format!("cdn://res/{version}-android/media/file-{hash:016x}")
}

struct Fixture {
    dir: TempDir,
    fetcher: MockFetcher,
}

impl Fixture {
    /// Installed 1.0.0 with a bundled manifest, remote table offering 1.1.0.
    fn new(bundled: &[(u64, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher {
            remote: Arc::new(Mutex::new(Remote::default())),
            data_root: dir.path().to_path_buf(),
        };

        let mut bundle = Manifest::new();
        bundle.set_version(1_000_000);
        for &(hash, payload) in bundled {
            bundle.upsert(asset(hash, payload.as_bytes(), StorageTier::Streaming));
        }
        fetcher.put("bundle://media/file.list", bundle.to_bytes());
        fetcher.put("bundle://media/update.json", UPDATE_JSON.as_bytes().to_vec());
        fetcher.put(
            SETTING_URL,
            b"cdn://res/\ncdn://svr\ncdn://gift\ncdn://event\n1.0.0,android,3\n1.1.0,android,3\n"
                .to_vec(),
        );

        Self { dir, fetcher }
    }

    fn publish(&self, version: &str, code: i32, assets: &[(u64, &str)]) {
        let mut target = Manifest::new();
        target.set_version(code);
        for &(hash, payload) in assets {
            target.upsert(asset(hash, payload.as_bytes(), StorageTier::Persistent));
            self.fetcher
                .put(&asset_url(version, hash), payload.as_bytes().to_vec());
        }
        self.fetcher.put(
            &format!("cdn://res/{version}-android/media/file.list"),
            target.to_bytes(),
        );
    }

    fn config(&self) -> UpdaterConfig {
        UpdaterConfig {
            platform: "android".into(),
            data_url: "bundle://".into(),
            persistent_url: "data://".into(),
            persistent_path: self.dir.path().to_path_buf(),
            retry: RetryPolicy {
                attempts: 5,
                delay_ms: 0,
            },
            ..UpdaterConfig::default()
        }
    }

    fn orchestrator(
        &self,
        host: ScriptedHost,
    ) -> UpdateOrchestrator<MockFetcher, FsStorage, ScriptedHost> {
        self.orchestrator_with(host, self.config())
    }

    fn orchestrator_with(
        &self,
        host: ScriptedHost,
        config: UpdaterConfig,
    ) -> UpdateOrchestrator<MockFetcher, FsStorage, ScriptedHost> {
        UpdateOrchestrator::new(self.fetcher.clone(), FsStorage, host, config)
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn persisted(&self) -> Manifest {
        let raw = std::fs::read(self.root().join(MANIFEST_FILE)).unwrap();
        Manifest::from_bytes(&raw, StorageTier::Persistent).unwrap()
    }
}

#[tokio::test]
async fn downloads_only_changed_entries_and_persists_target_version() {
    let fx = Fixture::new(&[(1, "alpha"), (2, "bravo")]);
    fx.publish("1.1.0", 1_001_000, &[(1, "alpha"), (2, "bravo-2"), (3, "charlie")]);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.drive().await.unwrap(), UpdateOutcome::Complete);

    let plan = orchestrator.plan().unwrap();
    let planned: Vec<u64> = plan.entries().iter().map(|e| e.hash).collect();
    assert_eq!(planned, vec![2, 3]);
    assert_eq!(plan.total_bytes(), 14);

    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 1)), 0);
    let written = std::fs::read(fx.root().join("media/file-0000000000000003")).unwrap();
    assert_eq!(written, b"charlie");

    let persisted = fx.persisted();
    assert_eq!(persisted.version(), 1_001_000);
    assert_eq!(persisted.entry(2).unwrap().size, 7);
    assert!(persisted.entry(3).is_some());
    assert_eq!(orchestrator.local_version_string(), "1.1.0");

    let host = orchestrator.host();
    assert!(host.notices().is_empty());
    assert_eq!(host.ended.load(Ordering::SeqCst), 1);
    let sessions = host.sessions.lock().unwrap();
    assert_eq!(sessions[0].server_list_url, "cdn://svr?s=3&p=android");
    assert_eq!(sessions[0].version, "1.0.0");
    assert!(!sessions[0].beta);
    let progress = host.progress.lock().unwrap();
    assert_eq!(progress.last().unwrap(), &(1.0, "Done".to_string()));
}

#[tokio::test]
async fn second_run_at_target_is_complete_without_downloads() {
    let fx = Fixture::new(&[(1, "alpha")]);
    fx.publish("1.1.0", 1_001_000, &[(1, "alpha"), (3, "charlie")]);

    let mut first = fx.orchestrator(ScriptedHost::default());
    assert_eq!(first.run().await.unwrap(), UpdateOutcome::Complete);
    let manifest_url = "cdn://res/1.1.0-android/media/file.list";
    let manifest_calls = fx.fetcher.calls(manifest_url);
    let asset_calls = fx.fetcher.calls(&asset_url("1.1.0", 3));

    let mut second = fx.orchestrator(ScriptedHost::default());
    assert_eq!(second.run().await.unwrap(), UpdateOutcome::Complete);
    assert!(second.plan().map_or(true, |plan| plan.is_empty()));
    assert_eq!(second.store().manifest().version(), 1_001_000);
    assert_eq!(fx.fetcher.calls(manifest_url), manifest_calls);
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 3)), asset_calls);
}

#[tokio::test]
async fn nothing_to_download_still_records_target_version() {
    let fx = Fixture::new(&[(1, "alpha")]);
    fx.publish("1.1.0", 1_001_000, &[(1, "alpha")]);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.run().await.unwrap(), UpdateOutcome::Complete);
    assert!(orchestrator.plan().unwrap().is_empty());
    assert_eq!(fx.persisted().version(), 1_001_000);
}

#[tokio::test]
async fn exhausted_asset_retries_block_and_keep_partial_progress() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo"), (3, "charlie")]);
    fx.fetcher.remove(&asset_url("1.1.0", 3));

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 3)), 5);

    let local = orchestrator.store().manifest();
    assert!(local.entry(2).is_some());
    assert!(local.entry(3).is_none());
    assert_eq!(local.version(), 1_000_000);
}

#[tokio::test]
async fn size_mismatch_counts_as_failed_fetch() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo")]);
    fx.fetcher.put(&asset_url("1.1.0", 2), b"brav".to_vec());

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 5);
    assert!(!fx.root().join("media/file-0000000000000002").exists());
}

#[tokio::test]
async fn checkpoint_persists_entries_up_to_threshold_crossing() {
    let payloads: Vec<(u64, String)> = (10u64..14)
        .map(|h| (h, char::from(b'a' + h as u8).to_string().repeat(100 * 1024)))
        .collect();
    let assets: Vec<(u64, &str)> = payloads.iter().map(|(h, p)| (*h, p.as_str())).collect();

    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &assets);
    fx.fetcher.remove(&asset_url("1.1.0", 13));

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert_eq!(orchestrator.progress().checkpoints, 1);

    // Interrupted here: only what the checkpoint wrote survives a restart.
    let persisted = fx.persisted();
    assert_eq!(persisted.version(), 1_000_000);
    for hash in 10..13 {
        assert!(persisted.entry(hash).is_some(), "entry {hash} missing");
    }
    assert!(persisted.entry(13).is_none());

    fx.fetcher
        .put(&asset_url("1.1.0", 13), payloads[3].1.clone().into_bytes());
    let mut resumed = fx.orchestrator(ScriptedHost::default());
    assert_eq!(resumed.run().await.unwrap(), UpdateOutcome::Complete);
    let replanned: Vec<u64> = resumed.plan().unwrap().entries().iter().map(|e| e.hash).collect();
    assert_eq!(replanned, vec![13]);
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 10)), 1);
    assert_eq!(fx.persisted().version(), 1_001_000);
}

#[tokio::test]
async fn retry_from_notice_restarts_and_completes() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo")]);
    fx.fetcher.fail(&asset_url("1.1.0", 2), 5);

    let host = ScriptedHost::answering(&[NoticeChoice::Action]);
    let mut orchestrator = fx.orchestrator(host);
    assert_eq!(orchestrator.drive().await.unwrap(), UpdateOutcome::Complete);
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 6);
    assert_eq!(orchestrator.restarts(), 1);
    assert_eq!(orchestrator.phase(), Phase::Complete);

    let notices = orchestrator.host().notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].message, "Network error");
    assert_eq!(
        notices[0].action,
        Some((NoticeAction::Retry, "Retry".to_string()))
    );
}

#[tokio::test]
async fn unreachable_version_table_blocks_after_five_attempts() {
    let fx = Fixture::new(&[]);
    fx.fetcher.remove(SETTING_URL);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.drive().await.unwrap(), UpdateOutcome::Exited);
    assert_eq!(fx.fetcher.calls(SETTING_URL), 5);
}

#[tokio::test]
async fn unreachable_target_manifest_blocks_after_five_attempts() {
    let fx = Fixture::new(&[(1, "alpha")]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo")]);
    let manifest_url = "cdn://res/1.1.0-android/media/file.list";
    fx.fetcher.remove(manifest_url);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert_eq!(fx.fetcher.calls(manifest_url), 5);
    assert_eq!(orchestrator.target_version(), 1_001_000);
    assert!(orchestrator.plan().is_none());
    assert_eq!(orchestrator.phase(), Phase::Working);
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 0);
}

#[tokio::test]
async fn corrupt_target_manifest_blocks_without_downloading() {
    let fx = Fixture::new(&[(1, "alpha")]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo")]);
    let manifest_url = "cdn://res/1.1.0-android/media/file.list";
    fx.fetcher.put(manifest_url, vec![1, 0, 0, 0, 9, 1, 2]);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert!(orchestrator.plan().is_none());
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 0);
    assert_eq!(orchestrator.store().manifest().version(), 1_000_000);
}

#[tokio::test]
async fn target_manifest_naming_files_outside_the_store_is_refused() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[]);
    let mut target = Manifest::new();
    target.set_version(1_001_000);
    target.upsert(ManifestEntry {
        mode: AssetMode::OriginalName,
        origin: Some("../escaped.bin".into()),
        ..asset(4, b"delta", StorageTier::Persistent)
    });
    fx.fetcher
        .put("cdn://res/1.1.0-android/media/file.list", target.to_bytes());

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedNetworkError
    );
    assert!(orchestrator.plan().is_none());
    assert!(!fx.root().join("../escaped.bin").exists());
}

#[tokio::test]
async fn major_version_jump_requires_reinstall() {
    let fx = Fixture::new(&[(1, "alpha")]);
    fx.fetcher.put(
        SETTING_URL,
        b"cdn://res/\ncdn://svr\ncdn://gift\ncdn://event\n1.0.0,android,3\n2.0.0,android,3\n"
            .to_vec(),
    );
    fx.publish("2.0.0", 2_000_000, &[(1, "alpha")]);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(
        orchestrator.run().await.unwrap(),
        UpdateOutcome::BlockedIncompatible
    );
    assert!(orchestrator.plan().is_none());

    let host = ScriptedHost::answering(&[NoticeChoice::Action]);
    let mut orchestrator = fx.orchestrator(host);
    assert_eq!(
        orchestrator.drive().await.unwrap(),
        UpdateOutcome::BlockedIncompatible
    );
    let notices = orchestrator.host().notices();
    assert_eq!(notices[0].message, "Reinstall required");
    assert_eq!(notices[0].action.as_ref().unwrap().0, NoticeAction::OpenStore);
}

#[tokio::test]
async fn missing_update_config_is_fatal() {
    let fx = Fixture::new(&[]);
    fx.fetcher.remove("bundle://media/update.json");

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, UpdaterError::ConfigUnavailable(_)));
}

#[tokio::test]
async fn persistent_update_config_takes_precedence() {
    let fx = Fixture::new(&[]);
    fx.fetcher.remove("bundle://media/update.json");
    std::fs::create_dir_all(fx.root().join("media")).unwrap();
    std::fs::write(fx.root().join("media/update.json"), UPDATE_JSON).unwrap();
    fx.publish("1.1.0", 1_001_000, &[]);

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.run().await.unwrap(), UpdateOutcome::Complete);
}

#[tokio::test]
async fn unknown_build_skips_update() {
    let fx = Fixture::new(&[]);
    fx.fetcher.put(
        SETTING_URL,
        b"cdn://res/\ncdn://svr\ncdn://gift\ncdn://event\n1.1.0,android,3\n".to_vec(),
    );

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.run().await.unwrap(), UpdateOutcome::Complete);
    assert_eq!(orchestrator.target_version(), 0);
    assert_eq!(
        fx.fetcher.calls("cdn://res/1.1.0-android/media/file.list"),
        0
    );
}

#[tokio::test]
async fn beta_marker_falls_back_to_newest_online_release() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[(5, "echo")]);
    std::fs::write(fx.root().join("portal.txt"), b"").unwrap();

    let mut orchestrator = fx.orchestrator(ScriptedHost::default());
    assert_eq!(orchestrator.run().await.unwrap(), UpdateOutcome::Complete);
    assert_eq!(orchestrator.target_version(), 1_001_000);

    let session = orchestrator.session().unwrap();
    assert!(session.beta);
    assert_eq!(session.server_list_url, "cdn://svr?s=1&p=android");
}

#[tokio::test]
async fn large_plans_ask_before_downloading() {
    let fx = Fixture::new(&[]);
    fx.publish("1.1.0", 1_001_000, &[(2, "bravo")]);
    let config = UpdaterConfig {
        confirm_threshold_bytes: 1,
        ..fx.config()
    };

    let mut declined = fx.orchestrator_with(ScriptedHost::default(), config.clone());
    assert_eq!(declined.run().await.unwrap(), UpdateOutcome::Exited);
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 0);
    let notices = declined.host().notices();
    assert_eq!(notices[0].message, "Download 1KB?");
    assert_eq!(notices[0].action.as_ref().unwrap().0, NoticeAction::Update);

    let trusted = ScriptedHost {
        local_network: true,
        ..ScriptedHost::default()
    };
    let mut accepted = fx.orchestrator_with(trusted, config);
    assert_eq!(accepted.run().await.unwrap(), UpdateOutcome::Complete);
    assert!(accepted.host().notices().is_empty());
    assert_eq!(fx.fetcher.calls(&asset_url("1.1.0", 2)), 1);
}

#[tokio::test]
async fn skip_update_only_loads_local_manifest() {
    let fx = Fixture::new(&[(1, "alpha")]);
    let config = UpdaterConfig {
        skip_update: true,
        ..fx.config()
    };

    let mut orchestrator = fx.orchestrator_with(ScriptedHost::default(), config);
    assert_eq!(orchestrator.run().await.unwrap(), UpdateOutcome::Complete);
    assert_eq!(orchestrator.store().manifest().len(), 1);
    assert_eq!(fx.fetcher.calls(SETTING_URL), 0);
}
