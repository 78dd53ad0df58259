use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Cadences, thresholds and backoff constants for every loop in the runtime.
/// All values are milliseconds unless the name says otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub live_poll_ms: u64,
    pub live_fetch_min_ms: u64,
    pub live_error_retry_ms: u64,
    pub live_error_retry_max_ms: u64,
    pub live_burst_window_ms: u64,
    pub live_burst_threshold: usize,
    pub live_burst_cooldown_ms: u64,
    pub keepalive_base_ms: u64,
    pub keepalive_jitter_ms: u64,
    pub startup_keepalive_threshold_ms: u64,
    pub startup_stagger_min_ms: u64,
    pub startup_stagger_max_ms: u64,
    pub busy_retry_ms: u64,
    pub auto_switch_tick_ms: u64,
    pub thread_recover_tick_ms: u64,
    pub hook_version_poll_ms: u64,
    pub dashboard_wait_step_ms: u64,
    pub dashboard_wait_max_steps: u32,
    pub startup_load_timeout_ms: u64,
    pub startup_background_sync_delay_ms: u64,
    pub current_error_banner_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            live_poll_ms: 500,
            live_fetch_min_ms: 500,
            live_error_retry_ms: 250,
            live_error_retry_max_ms: 900,
            live_burst_window_ms: 3000,
            live_burst_threshold: 6,
            live_burst_cooldown_ms: 900,
            keepalive_base_ms: 48 * HOUR_MS,
            keepalive_jitter_ms: 30 * MINUTE_MS,
            startup_keepalive_threshold_ms: 24 * HOUR_MS,
            startup_stagger_min_ms: MINUTE_MS,
            startup_stagger_max_ms: 8 * MINUTE_MS,
            busy_retry_ms: 30 * 1000,
            auto_switch_tick_ms: 500,
            thread_recover_tick_ms: 2000,
            hook_version_poll_ms: 3000,
            dashboard_wait_step_ms: 250,
            dashboard_wait_max_steps: 40,
            startup_load_timeout_ms: 8000,
            startup_background_sync_delay_ms: 120,
            current_error_banner_delay_ms: 1200,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("读取运行配置失败: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("运行配置格式不正确: {}", path.display()))?;
        Ok(config.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.live_poll_ms = self.live_poll_ms.clamp(100, 60_000);
        self.live_fetch_min_ms = self.live_fetch_min_ms.min(60_000);
        self.live_error_retry_ms = self.live_error_retry_ms.max(1);
        self.live_error_retry_max_ms = self.live_error_retry_max_ms.max(self.live_error_retry_ms);
        self.live_burst_window_ms = self.live_burst_window_ms.max(1);
        self.live_burst_threshold = self.live_burst_threshold.max(1);
        self.keepalive_base_ms = self.keepalive_base_ms.max(MINUTE_MS);
        self.keepalive_jitter_ms = self.keepalive_jitter_ms.min(self.keepalive_base_ms / 2);
        self.startup_stagger_max_ms = self.startup_stagger_max_ms.max(self.startup_stagger_min_ms);
        self.busy_retry_ms = self.busy_retry_ms.max(100);
        self.auto_switch_tick_ms = self.auto_switch_tick_ms.max(100);
        self.thread_recover_tick_ms = self.thread_recover_tick_ms.max(100);
        self.hook_version_poll_ms = self.hook_version_poll_ms.max(100);
        self.dashboard_wait_step_ms = self.dashboard_wait_step_ms.max(10);
        self
    }

    pub fn live_poll_interval(&self) -> Duration {
        Duration::from_millis(self.live_poll_ms)
    }

    pub fn auto_switch_tick(&self) -> Duration {
        Duration::from_millis(self.auto_switch_tick_ms)
    }

    pub fn thread_recover_tick(&self) -> Duration {
        Duration::from_millis(self.thread_recover_tick_ms)
    }

    pub fn hook_version_poll(&self) -> Duration {
        Duration::from_millis(self.hook_version_poll_ms)
    }
}
