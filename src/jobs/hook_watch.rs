use super::{sleep_or_cancel, JobTick};
use crate::{app_state::EngineState, guard::FlightGuard};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct HookWatchJob {
    state: Arc<EngineState>,
    guard: FlightGuard,
}

impl HookWatchJob {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            guard: FlightGuard::new(),
        }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> JobTick {
        let Some(_permit) = self.guard.try_begin() else {
            return JobTick::InFlight;
        };
        let backend = &self.state.backend;
        let installed = match backend.is_hook_installed().await {
            Ok(installed) => installed,
            Err(error) => {
                debug!(error = %error, "hook status unavailable");
                return JobTick::Idle;
            }
        };
        if !installed || cancel.is_cancelled() {
            return JobTick::Idle;
        }
        let current = match backend.get_extension_info().await {
            Ok(info) => info.current_version,
            Err(error) => {
                debug!(error = %error, "extension info unavailable");
                None
            }
        };
        let Some(current) = current else {
            return JobTick::Idle;
        };
        if cancel.is_cancelled() {
            return JobTick::Discarded;
        }

        let Some(previous) = self.state.settings().hook_version_snapshot else {
            if let Err(error) = self
                .state
                .update_settings(|settings| settings.hook_version_snapshot = Some(current.clone()))
            {
                warn!(error = %error, "record hook version failed");
            }
            return JobTick::Idle;
        };
        if previous == current {
            return JobTick::Idle;
        }
        if self.state.is_gated() {
            return JobTick::Gated;
        }

        let _busy = self.state.busy.enter();
        info!(from = %previous, to = %current, "extension updated, reinstalling hook");
        let result = backend.install_hook().await;
        let saved = match result {
            Ok(_) => backend
                .get_extension_info()
                .await
                .ok()
                .and_then(|info| info.current_version)
                .unwrap_or_else(|| current.clone()),
            Err(_) => current.clone(),
        };
        match result {
            Ok(message) => {
                if let Err(error) = self
                    .state
                    .update_settings(|settings| settings.hook_version_snapshot = Some(saved))
                {
                    warn!(error = %error, "record hook version failed");
                }
                if cancel.is_cancelled() {
                    return JobTick::Discarded;
                }
                self.state.set_status(format!(
                    "检测到 Codex 扩展版本更新（{previous} -> {current}），已自动执行“安装/更新方案2 Hook 提速版”。{message}"
                ));
            }
            Err(error) => {
                if cancel.is_cancelled() {
                    return JobTick::Discarded;
                }
                self.state.set_status(format!(
                    "检测到 Codex 扩展版本更新（{previous} -> {current}），自动更新 Hook 失败: {error}"
                ));
            }
        }
        JobTick::Ran
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let poll = self.state.config.hook_version_poll();
        loop {
            self.run_once(&cancel).await;
            if !sleep_or_cancel(&cancel, poll).await {
                break;
            }
        }
        debug!("hook watch stopped");
    }
}
