use crate::{app_state::EngineState, guard::FlightGuard};
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Busy,
    Blocking,
    InFlight,
    NotDue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Skipped(SkipReason),
    Unchanged,
    Applied,
    Discarded,
    Failed { retry_ms: u64 },
}

#[derive(Debug, Default)]
struct Backoff {
    next_fetch_at: i64,
    streak: u32,
    error_times: VecDeque<i64>,
}

impl Backoff {
    fn push_error(&mut self, now_ms: i64, window_ms: u64) -> usize {
        self.error_times.push_back(now_ms);
        while self
            .error_times
            .front()
            .is_some_and(|ts| now_ms - ts > window_ms as i64)
        {
            self.error_times.pop_front();
        }
        self.error_times.len()
    }
}

pub struct LivePoller {
    state: Arc<EngineState>,
    guard: FlightGuard,
    backoff: Mutex<Backoff>,
}

impl LivePoller {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            guard: FlightGuard::new(),
            backoff: Mutex::new(Backoff::default()),
        }
    }

    pub fn next_fetch_at(&self) -> i64 {
        self.backoff
            .lock()
            .map(|backoff| backoff.next_fetch_at)
            .unwrap_or_default()
    }

    pub fn error_streak(&self) -> u32 {
        self.backoff
            .lock()
            .map(|backoff| backoff.streak)
            .unwrap_or_default()
    }

    pub async fn tick(&self, cancel: &CancellationToken) -> PollOutcome {
        if self.state.busy.is_busy() {
            return PollOutcome::Skipped(SkipReason::Busy);
        }
        if self.state.blocking.is_blocking() {
            return PollOutcome::Skipped(SkipReason::Blocking);
        }
        let Some(_permit) = self.guard.try_begin() else {
            return PollOutcome::Skipped(SkipReason::InFlight);
        };
        let config = &self.state.config;
        let now_ms = self.state.clock.now_ms();
        {
            let Ok(mut backoff) = self.backoff.lock() else {
                return PollOutcome::Skipped(SkipReason::InFlight);
            };
            if now_ms < backoff.next_fetch_at {
                return PollOutcome::Skipped(SkipReason::NotDue);
            }
            backoff.next_fetch_at = now_ms + config.live_fetch_min_ms as i64;
        }

        let mode = self.state.mode();
        let result = self.state.backend.fetch_dashboard(false, mode).await;
        let now_ms = self.state.clock.now_ms();
        match result {
            Ok(snapshot) => {
                let soft_error = snapshot
                    .current_error
                    .as_deref()
                    .is_some_and(|text| !text.trim().is_empty());
                let outcome = if cancel.is_cancelled() || self.state.mode() != mode {
                    PollOutcome::Discarded
                } else if self.state.apply_if_changed(snapshot) {
                    PollOutcome::Applied
                } else {
                    PollOutcome::Unchanged
                };
                self.record_success(now_ms, soft_error);
                outcome
            }
            Err(error) => {
                let retry_ms = self.record_failure(now_ms);
                debug!(error = %error, retry_ms, "live poll failed");
                PollOutcome::Failed { retry_ms }
            }
        }
    }

    fn record_success(&self, now_ms: i64, soft_error: bool) {
        let config = &self.state.config;
        let Ok(mut backoff) = self.backoff.lock() else {
            return;
        };
        backoff.streak = 0;
        if !soft_error {
            backoff.error_times.clear();
            return;
        }
        let burst = backoff.push_error(now_ms, config.live_burst_window_ms);
        if burst >= config.live_burst_threshold {
            backoff.next_fetch_at = now_ms + config.live_burst_cooldown_ms as i64;
            backoff.error_times.clear();
            warn!(burst, cooldown_ms = config.live_burst_cooldown_ms, "identity errors bursting, cooling down live poll");
        }
    }

    /// Exponential backoff capped at the retry ceiling; a burst of errors in
    /// the window forces the cooldown and restarts the window. The streak
    /// survives the window reset.
    fn record_failure(&self, now_ms: i64) -> u64 {
        let config = &self.state.config;
        let Ok(mut backoff) = self.backoff.lock() else {
            return config.live_error_retry_max_ms;
        };
        backoff.streak = backoff.streak.saturating_add(1);
        let burst = backoff.push_error(now_ms, config.live_burst_window_ms);
        let exponent = (backoff.streak - 1).min(20);
        let retry_ms = config
            .live_error_retry_ms
            .saturating_mul(1u64 << exponent)
            .min(config.live_error_retry_max_ms);
        let cooldown_ms = if burst >= config.live_burst_threshold {
            config.live_burst_cooldown_ms
        } else {
            0
        };
        let delay_ms = retry_ms.max(cooldown_ms);
        backoff.next_fetch_at = now_ms + delay_ms as i64;
        if cooldown_ms > 0 {
            backoff.error_times.clear();
            warn!(streak = backoff.streak, burst, delay_ms, "live poll failures bursting, cooling down");
        }
        delay_ms
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.state.config.live_poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let outcome = self.tick(&cancel).await;
            if let PollOutcome::Failed { retry_ms } = outcome {
                debug!(retry_ms, streak = self.error_streak(), "live poll backing off");
            }
        }
        debug!("live poller stopped");
    }
}
