use super::{sleep_or_cancel, JobTick};
use crate::{app_state::EngineState, config::EngineConfig, guard::FlightGuard};
use rand::Rng;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const HOUR_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveReason {
    Startup,
    Periodic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepalivePlan {
    pub delay_ms: u64,
    pub reason: KeepaliveReason,
}

fn jitter(config: &EngineConfig, rng: &mut impl Rng) -> i64 {
    let bound = config.keepalive_jitter_ms as i64;
    rng.gen_range(-bound..=bound)
}

pub fn periodic_delay(config: &EngineConfig, rng: &mut impl Rng) -> u64 {
    (config.keepalive_base_ms as i64 + jitter(config, rng)).max(0) as u64
}

pub fn startup_stagger_delay(config: &EngineConfig, rng: &mut impl Rng) -> u64 {
    rng.gen_range(config.startup_stagger_min_ms..=config.startup_stagger_max_ms)
}

/// Time until the next periodic run counted from the last keepalive
/// (`last_keepalive_at` is epoch seconds). Overdue runs are staggered; the
/// result never drops below the stagger minimum.
pub fn delay_from_last_keepalive(
    last_keepalive_at: Option<i64>,
    now_ms: i64,
    config: &EngineConfig,
    rng: &mut impl Rng,
) -> u64 {
    let Some(last) = last_keepalive_at.filter(|secs| *secs > 0) else {
        return periodic_delay(config, rng);
    };
    let elapsed = now_ms - last * 1000;
    let base = config.keepalive_base_ms as i64;
    if elapsed >= base {
        return startup_stagger_delay(config, rng);
    }
    let remain = base - elapsed;
    (remain + jitter(config, rng)).max(config.startup_stagger_min_ms as i64) as u64
}

/// First run after the job starts. `check_startup` is true only the first
/// time in a process: a missing or stale keepalive then gets a staggered
/// startup run instead of an immediate one.
pub fn plan_first_run(
    last_keepalive_at: Option<i64>,
    now_ms: i64,
    config: &EngineConfig,
    check_startup: bool,
    rng: &mut impl Rng,
) -> KeepalivePlan {
    if check_startup {
        let stale = match last_keepalive_at.filter(|secs| *secs > 0) {
            None => true,
            Some(last) => now_ms - last * 1000 >= config.startup_keepalive_threshold_ms as i64,
        };
        if stale {
            return KeepalivePlan {
                delay_ms: startup_stagger_delay(config, rng),
                reason: KeepaliveReason::Startup,
            };
        }
    }
    KeepalivePlan {
        delay_ms: delay_from_last_keepalive(last_keepalive_at, now_ms, config, rng),
        reason: KeepaliveReason::Periodic,
    }
}

pub struct KeepaliveJob {
    state: Arc<EngineState>,
    guard: FlightGuard,
    startup_checked: AtomicBool,
}

impl KeepaliveJob {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            guard: FlightGuard::new(),
            startup_checked: AtomicBool::new(false),
        }
    }

    pub async fn run_once(&self, reason: KeepaliveReason, cancel: &CancellationToken) -> JobTick {
        if self.state.is_gated() {
            return JobTick::Gated;
        }
        let Some(_permit) = self.guard.try_begin() else {
            return JobTick::InFlight;
        };
        let hours = self.state.config.keepalive_base_ms / HOUR_MS;
        let threshold_hours = self.state.config.startup_keepalive_threshold_ms / HOUR_MS;
        let (success_text, fail_prefix) = match reason {
            KeepaliveReason::Startup => (format!("启动保活完成（{threshold_hours}h + 错峰）"), "启动保活失败"),
            KeepaliveReason::Periodic => (format!("自动保活完成（{hours}h + 错峰）"), "自动保活失败"),
        };
        let result = self.state.backend.run_keepalive_all().await;
        if cancel.is_cancelled() {
            return JobTick::Discarded;
        }
        match result {
            Ok(snapshot) => {
                self.state.apply_snapshot(snapshot, false);
                self.state.set_status(success_text);
            }
            Err(error) => self.state.set_status(format!("{fail_prefix}: {error}")),
        }
        JobTick::Ran
    }

    fn first_plan(&self) -> KeepalivePlan {
        let last = self
            .state
            .current_model()
            .and_then(|model| model.snapshot.last_keepalive_at);
        let check_startup = !self.startup_checked.swap(true, Ordering::AcqRel);
        let mut rng = rand::thread_rng();
        plan_first_run(
            last,
            self.state.clock.now_ms(),
            &self.state.config,
            check_startup,
            &mut rng,
        )
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.state.wait_for_dashboard().await;
        if cancel.is_cancelled() {
            return;
        }
        let mut plan = self.first_plan();
        match plan.reason {
            KeepaliveReason::Startup => {
                let mins = ((plan.delay_ms as f64) / 60_000.0).round().max(1.0) as u64;
                self.state.set_status(format!(
                    "满足启动保活条件（>={}h），已错峰排队，约 {mins} 分钟后执行。",
                    self.state.config.startup_keepalive_threshold_ms / HOUR_MS
                ));
            }
            KeepaliveReason::Periodic => self.state.set_status(format!(
                "自动保活已开启（按上次保活时间判断，运行中每{}h错峰）。",
                self.state.config.keepalive_base_ms / HOUR_MS
            )),
        }
        loop {
            info!(delay_ms = plan.delay_ms, reason = ?plan.reason, "keepalive scheduled");
            if !sleep_or_cancel(&cancel, Duration::from_millis(plan.delay_ms)).await {
                break;
            }
            let tick = self.run_once(plan.reason, &cancel).await;
            if tick.should_retry() {
                debug!(?tick, "keepalive deferred");
                plan.delay_ms = self.state.config.busy_retry_ms;
                continue;
            }
            let delay_ms = {
                let mut rng = rand::thread_rng();
                periodic_delay(&self.state.config, &mut rng)
            };
            plan = KeepalivePlan {
                delay_ms,
                reason: KeepaliveReason::Periodic,
            };
        }
        debug!("keepalive stopped");
    }
}
