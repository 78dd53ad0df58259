use crate::{
    app_state::EngineState,
    backend::Backend,
    clock::ManualClock,
    config::EngineConfig,
    models::{
        AppMode, AutoSwitchTickResult, DashboardSnapshot, ExtensionInfo, PostSwitchStrategy,
        Profile, ThreadRecoverTickResult,
    },
    store::AppStore,
};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

pub const START_MS: i64 = 1_760_000_000_000;

pub fn profile(name: &str) -> Profile {
    Profile {
        name: name.to_string(),
        display_workspace: format!("{name}-ws"),
        ..Default::default()
    }
}

pub fn dashboard(names: &[&str]) -> DashboardSnapshot {
    DashboardSnapshot {
        app_name: "Codex Switch".to_string(),
        active_profile: names.first().map(|name| name.to_string()),
        profiles: names.iter().map(|name| profile(name)).collect(),
        ..Default::default()
    }
}

#[derive(Default)]
pub struct FakeBackend {
    pub dashboard: Mutex<DashboardSnapshot>,
    pub calls: Mutex<Vec<String>>,
    pub reorder_calls: Mutex<Vec<Vec<String>>>,
    pub reorder_hold: Mutex<Option<Arc<Semaphore>>>,
    pub reorder_entered: Notify,
    pub fail_fetch: AtomicBool,
    pub fail_reorder: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub fail_post_switch: AtomicBool,
    pub fail_keepalive: AtomicBool,
    pub hook_installed: AtomicBool,
    pub fetch_count: AtomicUsize,
    pub fetch_delay: Mutex<Option<Duration>>,
    pub extension_version: Mutex<Option<String>>,
    pub auto_switch_script: Mutex<VecDeque<Result<AutoSwitchTickResult, String>>>,
    pub thread_recover_script: Mutex<VecDeque<Result<ThreadRecoverTickResult, String>>>,
}

impl FakeBackend {
    pub fn with_dashboard(snapshot: DashboardSnapshot) -> Self {
        Self {
            dashboard: Mutex::new(snapshot),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub fn reorders(&self) -> Vec<Vec<String>> {
        self.reorder_calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    pub fn push_auto_switch(&self, result: Result<AutoSwitchTickResult, String>) {
        if let Ok(mut script) = self.auto_switch_script.lock() {
            script.push_back(result);
        }
    }

    pub fn push_thread_recover(&self, result: Result<ThreadRecoverTickResult, String>) {
        if let Ok(mut script) = self.thread_recover_script.lock() {
            script.push_back(result);
        }
    }

    pub fn hold_reorders(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        if let Ok(mut hold) = self.reorder_hold.lock() {
            *hold = Some(Arc::clone(&gate));
        }
        gate
    }

    fn record(&self, call: String) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn snapshot(&self) -> Result<DashboardSnapshot> {
        self.dashboard
            .lock()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("fake dashboard poisoned"))
    }

    fn mutate(&self, change: impl FnOnce(&mut DashboardSnapshot)) -> Result<DashboardSnapshot> {
        let mut guard = self
            .dashboard
            .lock()
            .map_err(|_| anyhow!("fake dashboard poisoned"))?;
        change(&mut guard);
        Ok(guard.clone())
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn fetch_dashboard(&self, sync_identity: bool, mode: AppMode) -> Result<DashboardSnapshot> {
        self.record(format!("fetch_dashboard:{sync_identity}:{}", mode.as_str()));
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delay.lock().ok().and_then(|delay| *delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            bail!("backend unavailable");
        }
        self.snapshot()
    }

    async fn apply_profile(&self, name: &str, mode: AppMode) -> Result<DashboardSnapshot> {
        self.record(format!("apply_profile:{name}:{}", mode.as_str()));
        self.mutate(|snapshot| snapshot.active_profile = Some(name.to_string()))
    }

    async fn refresh_quota(
        &self,
        name: &str,
        mode: AppMode,
        force_token_refresh: bool,
    ) -> Result<DashboardSnapshot> {
        self.record(format!(
            "refresh_quota:{name}:{}:{force_token_refresh}",
            mode.as_str()
        ));
        if self.fail_refresh.load(Ordering::SeqCst) {
            bail!("quota endpoint rejected");
        }
        self.snapshot()
    }

    async fn refresh_all_quota(
        &self,
        mode: AppMode,
        force_token_refresh: bool,
    ) -> Result<DashboardSnapshot> {
        self.record(format!(
            "refresh_all_quota:{}:{force_token_refresh}",
            mode.as_str()
        ));
        if self.fail_refresh.load(Ordering::SeqCst) {
            bail!("quota endpoint rejected");
        }
        self.snapshot()
    }

    async fn reorder_profiles(&self, names: &[String]) -> Result<DashboardSnapshot> {
        self.record(format!("reorder_profiles:{}", names.join(",")));
        if let Ok(mut calls) = self.reorder_calls.lock() {
            calls.push(names.to_vec());
        }
        self.reorder_entered.notify_one();
        let hold = self.reorder_hold.lock().ok().and_then(|hold| hold.clone());
        if let Some(gate) = hold {
            gate.acquire().await?.forget();
        }
        if self.fail_reorder.load(Ordering::SeqCst) {
            bail!("order write rejected");
        }
        self.mutate(|snapshot| {
            let mut remaining = std::mem::take(&mut snapshot.profiles);
            for name in names {
                if let Some(index) = remaining.iter().position(|p| &p.name == name) {
                    snapshot.profiles.push(remaining.remove(index));
                }
            }
            snapshot.profiles.extend(remaining);
        })
    }

    async fn run_keepalive_all(&self) -> Result<DashboardSnapshot> {
        self.record("run_keepalive_all".to_string());
        if self.fail_keepalive.load(Ordering::SeqCst) {
            bail!("keepalive rejected");
        }
        self.mutate(|snapshot| snapshot.last_keepalive_at = Some(START_MS / 1000))
    }

    async fn auto_switch_tick(&self, mode: AppMode) -> Result<AutoSwitchTickResult> {
        self.record(format!("auto_switch_tick:{}", mode.as_str()));
        let next = self
            .auto_switch_script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(AutoSwitchTickResult {
                action: "idle".to_string(),
                ..Default::default()
            }),
        }
    }

    async fn auto_switch_reset(&self) -> Result<()> {
        self.record("auto_switch_reset".to_string());
        Ok(())
    }

    async fn thread_recover_tick(&self, mode: AppMode) -> Result<ThreadRecoverTickResult> {
        self.record(format!("thread_recover_tick:{}", mode.as_str()));
        let next = self
            .thread_recover_script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        match next {
            Some(Ok(result)) => Ok(result),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(ThreadRecoverTickResult {
                action: "idle".to_string(),
                message: None,
            }),
        }
    }

    async fn is_hook_installed(&self) -> Result<bool> {
        self.record("is_hook_installed".to_string());
        Ok(self.hook_installed.load(Ordering::SeqCst))
    }

    async fn install_hook(&self) -> Result<String> {
        self.record("install_hook".to_string());
        self.hook_installed.store(true, Ordering::SeqCst);
        Ok("Hook 已安装".to_string())
    }

    async fn get_extension_info(&self) -> Result<ExtensionInfo> {
        self.record("get_extension_info".to_string());
        let current_version = self
            .extension_version
            .lock()
            .ok()
            .and_then(|version| version.clone());
        Ok(ExtensionInfo {
            all_versions: current_version.iter().cloned().collect(),
            current_version,
        })
    }

    async fn run_post_switch_action(&self, strategy: PostSwitchStrategy) -> Result<String> {
        self.record(format!("run_post_switch_action:{}", strategy.as_str()));
        if self.fail_post_switch.load(Ordering::SeqCst) {
            bail!("extension host did not respond");
        }
        Ok(format!("已执行 {}", strategy.as_str()))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub state: Arc<EngineState>,
    pub backend: Arc<FakeBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(backend: FakeBackend) -> Harness {
    harness_with(backend, EngineConfig::default())
}

pub fn harness_with(backend: FakeBackend, config: EngineConfig) -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let backend = Arc::new(backend);
    let clock = Arc::new(ManualClock::new(START_MS));
    let state = EngineState::initialize(
        AppStore::new(dir.path().join("data")),
        backend.clone(),
        config,
        clock.clone(),
    )
    .expect("engine state");
    Harness {
        dir,
        state: Arc::new(state),
        backend,
        clock,
    }
}
