use crate::{
    backend::Backend,
    clock::Clock,
    config::EngineConfig,
    current_error::{scoped_current_error, CurrentErrorBanner},
    guard::{BlockingGate, BusyGate},
    models::{AppMode, DashboardSnapshot, LocalSettings},
    reconcile::{reconcile, DashboardModel, ReconcileContext},
    store::AppStore,
};
use anyhow::{anyhow, Result};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{info, warn};

pub type SharedModel = Option<Arc<DashboardModel>>;

pub struct EngineState {
    pub store: AppStore,
    pub config: EngineConfig,
    pub backend: Arc<dyn Backend>,
    pub clock: Arc<dyn Clock>,
    pub busy: BusyGate,
    pub blocking: BlockingGate,
    model: watch::Sender<SharedModel>,
    status: watch::Sender<String>,
    settings: Mutex<LocalSettings>,
    banner: Mutex<CurrentErrorBanner>,
}

impl EngineState {
    pub fn initialize(
        store: AppStore,
        backend: Arc<dyn Backend>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        store.init()?;
        let config = config.normalized();
        let settings = store.load_settings()?;
        let (model, _) = watch::channel(None);
        let (status, _) = watch::channel(String::new());
        Ok(Self {
            banner: Mutex::new(CurrentErrorBanner::new(config.current_error_banner_delay_ms)),
            store,
            config,
            backend,
            clock,
            busy: BusyGate::default(),
            blocking: BlockingGate::default(),
            model,
            status,
            settings: Mutex::new(settings),
        })
    }

    pub fn settings(&self) -> LocalSettings {
        self.settings
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn mode(&self) -> AppMode {
        self.settings().app_mode
    }

    /// Applies `change` and persists the result. A failed write is logged and
    /// the in-memory value still takes effect.
    pub fn update_settings(&self, change: impl FnOnce(&mut LocalSettings)) -> Result<LocalSettings> {
        let next = {
            let mut guard = self
                .settings
                .lock()
                .map_err(|_| anyhow!("本地设置状态锁失败"))?;
            change(&mut guard);
            guard.clone()
        };
        if let Err(error) = self.store.save_settings(&next) {
            warn!(error = %error, "persist local settings failed");
        }
        Ok(next)
    }

    pub fn remembered_profile(&self, mode: AppMode) -> Option<String> {
        self.settings().active_profile_by_mode[mode].clone()
    }

    pub fn remember_active_profile(&self, mode: AppMode, name: &str) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let result = self.update_settings(|settings| {
            settings.active_profile_by_mode[mode] = Some(name.to_string());
        });
        if let Err(error) = result {
            warn!(error = %error, mode = mode.as_str(), "remember active profile failed");
        }
    }

    pub fn current_model(&self) -> SharedModel {
        self.model.borrow().clone()
    }

    pub fn subscribe_model(&self) -> watch::Receiver<SharedModel> {
        self.model.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<String> {
        self.status.subscribe()
    }

    pub fn signature(&self) -> Option<String> {
        self.model
            .borrow()
            .as_ref()
            .map(|model| model.signature.clone())
    }

    pub fn apply_snapshot(&self, snapshot: DashboardSnapshot, preserve_quota: bool) -> Arc<DashboardModel> {
        let settings = self.settings();
        let ctx = ReconcileContext {
            mode: settings.app_mode,
            remembered: settings.active_profile_by_mode[settings.app_mode].as_deref(),
            preserve_quota,
        };
        let mut applied = None;
        self.model.send_modify(|slot| {
            let next = Arc::new(reconcile(snapshot, slot.as_deref(), ctx));
            applied = Some(Arc::clone(&next));
            *slot = Some(next);
        });
        self.observe_current_error();
        applied.unwrap_or_default()
    }

    /// Silent-refresh variant: back-fills missing quota and only replaces the
    /// model when the reconciled signature differs. Returns whether it did.
    pub fn apply_if_changed(&self, snapshot: DashboardSnapshot) -> bool {
        let settings = self.settings();
        let ctx = ReconcileContext {
            mode: settings.app_mode,
            remembered: settings.active_profile_by_mode[settings.app_mode].as_deref(),
            preserve_quota: true,
        };
        let changed = self.model.send_if_modified(|slot| {
            let next = reconcile(snapshot, slot.as_deref(), ctx);
            if slot
                .as_ref()
                .is_some_and(|current| current.signature == next.signature)
            {
                return false;
            }
            *slot = Some(Arc::new(next));
            true
        });
        self.observe_current_error();
        changed
    }

    pub fn reorder_display(&self, names: &[String]) {
        self.model.send_if_modified(|slot| match slot.as_ref() {
            Some(current) => {
                *slot = Some(Arc::new(current.with_display_order(names)));
                true
            }
            None => false,
        });
    }

    pub fn select_profile(&self, name: &str) -> bool {
        self.model.send_if_modified(|slot| {
            let Some(current) = slot.as_ref() else {
                return false;
            };
            if !current.snapshot.contains(name) || current.selected.as_deref() == Some(name) {
                return false;
            }
            let mut next = DashboardModel::clone(current);
            next.selected = Some(name.to_string());
            *slot = Some(Arc::new(next));
            true
        })
    }

    pub fn selected_profile(&self) -> Option<String> {
        self.model
            .borrow()
            .as_ref()
            .and_then(|model| model.selected.clone())
    }

    pub fn set_status(&self, text: impl Into<String>) {
        let text = text.into();
        info!(status = %text, "status");
        self.status.send_replace(text);
    }

    pub fn status_text(&self) -> String {
        self.status.borrow().clone()
    }

    /// Feeds the mode-scoped identity error into the banner debounce and
    /// returns what should be on screen now.
    pub fn observe_current_error(&self) -> Option<String> {
        let mode = self.mode();
        let scoped = self
            .current_model()
            .and_then(|model| scoped_current_error(&model.snapshot, mode));
        let now_ms = self.clock.now_ms();
        let mut banner = self.banner.lock().ok()?;
        banner.observe(scoped.as_deref(), now_ms).map(str::to_string)
    }

    pub fn is_gated(&self) -> bool {
        self.busy.is_busy() || self.blocking.is_blocking()
    }

    pub async fn wait_for_dashboard(&self) -> SharedModel {
        let budget = Duration::from_millis(
            self.config.dashboard_wait_step_ms * u64::from(self.config.dashboard_wait_max_steps),
        );
        let mut receiver = self.subscribe_model();
        let model = match tokio::time::timeout(budget, receiver.wait_for(Option::is_some)).await {
            Ok(Ok(model)) => model.clone(),
            _ => self.current_model(),
        };
        model
    }
}
