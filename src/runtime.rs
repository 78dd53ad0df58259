use crate::{
    app_state::EngineState,
    backend::Backend,
    clock::SystemClock,
    commands,
    config::EngineConfig,
    jobs::{
        auto_switch::AutoSwitchJob, hook_watch::HookWatchJob, keepalive::KeepaliveJob,
        sleep_or_cancel, thread_recover::ThreadRecoverJob,
    },
    models::AppMode,
    order_queue::OrderQueue,
    poller::LivePoller,
    store::AppStore,
};
use anyhow::Result;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Default)]
struct Scopes {
    auto_switch: Option<CancellationToken>,
    keepalive: Option<CancellationToken>,
}

/// Owns the background loops and their lifetimes. Every loop runs under a
/// child of `root`; toggles cancel and recreate their own child scope.
pub struct Runtime {
    state: Arc<EngineState>,
    root: CancellationToken,
    poller: Arc<LivePoller>,
    order_queue: Arc<OrderQueue>,
    keepalive: Arc<KeepaliveJob>,
    auto_switch: Arc<AutoSwitchJob>,
    thread_recover: Arc<ThreadRecoverJob>,
    hook_watch: Arc<HookWatchJob>,
    scopes: Mutex<Scopes>,
}

impl Runtime {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            poller: Arc::new(LivePoller::new(Arc::clone(&state))),
            order_queue: Arc::new(OrderQueue::new(Arc::clone(&state))),
            keepalive: Arc::new(KeepaliveJob::new(Arc::clone(&state))),
            auto_switch: Arc::new(AutoSwitchJob::new(Arc::clone(&state))),
            thread_recover: Arc::new(ThreadRecoverJob::new(Arc::clone(&state))),
            hook_watch: Arc::new(HookWatchJob::new(Arc::clone(&state))),
            root: CancellationToken::new(),
            scopes: Mutex::new(Scopes::default()),
            state,
        }
    }

    pub async fn start(
        backend: Arc<dyn Backend>,
        store: AppStore,
        config: EngineConfig,
    ) -> Result<Arc<Self>> {
        let state = EngineState::initialize(store, backend, config, Arc::new(SystemClock))?;
        let runtime = Arc::new(Self::new(Arc::new(state)));
        runtime.startup().await;
        Ok(runtime)
    }

    pub fn state(&self) -> &Arc<EngineState> {
        &self.state
    }

    pub fn order_queue(&self) -> &Arc<OrderQueue> {
        &self.order_queue
    }

    pub fn queue_order(&self, names: Vec<String>) {
        self.order_queue.queue_order(names);
    }

    pub async fn startup(&self) {
        let settings = self.state.settings();
        info!(mode = settings.app_mode.as_str(), "runtime starting");
        match settings.app_mode {
            AppMode::Gpt => {
                if let Err(error) =
                    commands::load_dashboard(&self.state, true, Some("已加载"), None).await
                {
                    warn!(error = %error, "initial load failed");
                }
            }
            AppMode::OpenCode => {
                let timeout = Duration::from_millis(self.state.config.startup_load_timeout_ms);
                if let Err(error) =
                    commands::load_dashboard(&self.state, false, Some("已加载"), Some(timeout)).await
                {
                    warn!(error = %error, "initial load failed");
                }
                let state = Arc::clone(&self.state);
                let cancel = self.root.child_token();
                let delay = Duration::from_millis(self.state.config.startup_background_sync_delay_ms);
                tokio::spawn(async move {
                    if !sleep_or_cancel(&cancel, delay).await {
                        return;
                    }
                    if let Err(error) = commands::load_dashboard(&state, true, None, None).await {
                        warn!(error = %error, "background identity sync failed");
                    }
                });
            }
        }
        if settings.auto_refresh_on_startup {
            if let Err(error) = commands::refresh_all_quota(&self.state, false).await {
                warn!(error = %error, "startup quota refresh failed");
            }
        }

        tokio::spawn(Arc::clone(&self.poller).run(self.root.child_token()));
        tokio::spawn(Arc::clone(&self.hook_watch).run(self.root.child_token()));
        if settings.auto_switch_enabled {
            self.start_auto_switch();
        } else {
            self.reset_auto_switch().await;
        }
        if settings.keepalive_enabled {
            self.start_keepalive();
        }
    }

    fn start_auto_switch(&self) {
        let Ok(mut scopes) = self.scopes.lock() else {
            return;
        };
        if scopes.auto_switch.is_some() {
            return;
        }
        let scope = self.root.child_token();
        tokio::spawn(Arc::clone(&self.auto_switch).run(scope.clone()));
        tokio::spawn(Arc::clone(&self.thread_recover).run(scope.clone()));
        scopes.auto_switch = Some(scope);
        self.state.set_status("无感换号已开启（实时监控中）。");
    }

    async fn stop_auto_switch(&self) {
        let scope = self
            .scopes
            .lock()
            .ok()
            .and_then(|mut scopes| scopes.auto_switch.take());
        let Some(scope) = scope else {
            return;
        };
        scope.cancel();
        self.reset_auto_switch().await;
    }

    async fn reset_auto_switch(&self) {
        if let Err(error) = self.state.backend.auto_switch_reset().await {
            debug!(error = %error, "auto-switch reset failed");
        }
    }

    fn start_keepalive(&self) {
        let Ok(mut scopes) = self.scopes.lock() else {
            return;
        };
        if scopes.keepalive.is_some() {
            return;
        }
        let scope = self.root.child_token();
        tokio::spawn(Arc::clone(&self.keepalive).run(scope.clone()));
        scopes.keepalive = Some(scope);
    }

    fn stop_keepalive(&self) {
        let scope = self
            .scopes
            .lock()
            .ok()
            .and_then(|mut scopes| scopes.keepalive.take());
        if let Some(scope) = scope {
            scope.cancel();
        }
    }

    pub async fn set_auto_switch(&self, enabled: bool) -> Result<()> {
        self.state
            .update_settings(|settings| settings.auto_switch_enabled = enabled)?;
        if enabled {
            self.start_auto_switch();
        } else {
            self.stop_auto_switch().await;
            self.state.set_status("无感换号已关闭。");
        }
        Ok(())
    }

    pub fn set_keepalive(&self, enabled: bool) -> Result<()> {
        self.state
            .update_settings(|settings| settings.keepalive_enabled = enabled)?;
        if enabled {
            self.start_keepalive();
        } else {
            self.stop_keepalive();
            self.state.set_status("自动保活已关闭。");
        }
        Ok(())
    }

    pub fn is_auto_switch_running(&self) -> bool {
        self.scopes
            .lock()
            .map(|scopes| scopes.auto_switch.is_some())
            .unwrap_or(false)
    }

    pub fn is_keepalive_running(&self) -> bool {
        self.scopes
            .lock()
            .map(|scopes| scopes.keepalive.is_some())
            .unwrap_or(false)
    }

    /// Cancels every scope. Backend calls already in flight finish on their
    /// own; their results are dropped.
    pub async fn shutdown(&self) {
        self.stop_auto_switch().await;
        self.root.cancel();
        info!("runtime stopped");
    }
}
