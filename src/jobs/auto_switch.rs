use super::{non_empty, post_switch::run_post_switch, sleep_or_cancel, JobTick};
use crate::{
    app_state::EngineState,
    guard::FlightGuard,
    models::{AppMode, AutoSwitchTickResult},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_SWITCHED_MESSAGE: &str = "已切换账号。";
const HOOK_FAILURE_TIP: &str = "方案2提速失败，可在设置中心切换到方案1（直接重启 Extension Host）。";

/// Asks the backend on a short cadence whether the live account should be
/// switched, and finishes the switch locally when it was.
pub struct AutoSwitchJob {
    state: Arc<EngineState>,
    guard: FlightGuard,
}

impl AutoSwitchJob {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            guard: FlightGuard::new(),
        }
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> JobTick {
        if self.state.is_gated() {
            return JobTick::Gated;
        }
        let Some(_permit) = self.guard.try_begin() else {
            return JobTick::InFlight;
        };
        let mode = self.state.mode();
        let result = self.state.backend.auto_switch_tick(mode).await;
        if cancel.is_cancelled() {
            return JobTick::Discarded;
        }
        match result {
            Ok(result) => self.handle(result, mode, cancel).await,
            Err(error) => {
                self.state.set_status(format!("无感换号检测失败: {error}"));
                JobTick::Ran
            }
        }
    }

    async fn handle(
        &self,
        mut result: AutoSwitchTickResult,
        mode: AppMode,
        cancel: &CancellationToken,
    ) -> JobTick {
        let previous = self.state.remembered_profile(mode).or_else(|| {
            self.state
                .current_model()
                .and_then(|model| model.current_profile.clone())
        });
        if let Some(snapshot) = result.dashboard.take() {
            self.state.apply_snapshot(snapshot, false);
        }
        if !result.switched() {
            if let Some(message) = non_empty(result.message.as_deref()) {
                if !result.is_quiet() {
                    self.state.set_status(message);
                }
            }
            debug!(action = %result.action, mode = mode.as_str(), "auto-switch tick");
            return JobTick::Ran;
        }

        let switched_to = non_empty(result.switched_to.as_deref()).map(str::to_string);
        if let Some(name) = switched_to.as_deref() {
            self.state.remember_active_profile(mode, name);
            self.state.select_profile(name);
        }
        let base = non_empty(result.message.as_deref())
            .unwrap_or(DEFAULT_SWITCHED_MESSAGE)
            .to_string();
        info!(mode = mode.as_str(), to = ?switched_to, "auto-switch switched account");

        let (outcome, detail) = match mode {
            AppMode::Gpt => self.finish_gpt(&base, cancel).await,
            AppMode::OpenCode => match switched_to.as_deref() {
                Some(name) => self.calibrate_opencode(name, &base, cancel).await,
                None => {
                    self.state.set_status(base.clone());
                    ("switched", None)
                }
            },
        };
        if let Some(name) = switched_to.as_deref() {
            if let Err(error) = self.state.store.create_switch_history(
                mode,
                previous.as_deref(),
                name,
                outcome,
                detail.as_deref(),
            ) {
                warn!(error = %error, "record switch history failed");
            }
        }
        if cancel.is_cancelled() {
            JobTick::Discarded
        } else {
            JobTick::Ran
        }
    }

    async fn finish_gpt(
        &self,
        base: &str,
        cancel: &CancellationToken,
    ) -> (&'static str, Option<String>) {
        let strategy = self.state.settings().post_switch_strategy;
        match run_post_switch(self.state.backend.as_ref(), strategy, true).await {
            Ok(message) => {
                if !cancel.is_cancelled() {
                    self.state.set_status(format!("{base} {message}"));
                }
                ("switched", Some(message))
            }
            Err(error) => {
                if !cancel.is_cancelled() {
                    self.state
                        .set_status(format!("{base} 切后动作失败: {error}。{HOOK_FAILURE_TIP}"));
                }
                warn!(error = %error, "post-switch action failed");
                ("post_action_failed", Some(error.to_string()))
            }
        }
    }

    /// OpenCode switches are followed by one manual-style apply so the local
    /// credentials match what the backend picked.
    async fn calibrate_opencode(
        &self,
        name: &str,
        base: &str,
        cancel: &CancellationToken,
    ) -> (&'static str, Option<String>) {
        match self.state.backend.apply_profile(name, AppMode::OpenCode).await {
            Ok(snapshot) => {
                if !cancel.is_cancelled() {
                    self.state.apply_snapshot(snapshot, false);
                    self.state
                        .set_status(format!("{base}（已自动执行一次手动切号校准）"));
                }
                ("switched", None)
            }
            Err(error) => {
                if !cancel.is_cancelled() {
                    self.state
                        .set_status(format!("{base} 自动切后校准失败: {error}"));
                }
                ("post_action_failed", Some(error.to_string()))
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let tick = self.state.config.auto_switch_tick();
        while sleep_or_cancel(&cancel, tick).await {
            let outcome = self.run_once(&cancel).await;
            if outcome.should_retry() {
                debug!(?outcome, "auto-switch deferred");
            }
        }
        debug!("auto-switch stopped");
    }
}
