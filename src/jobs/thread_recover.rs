use super::{non_empty, sleep_or_cancel, JobTick};
use crate::{app_state::EngineState, guard::FlightGuard};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Periodic attempt to unstick a session. Only definitive outcomes reach the
/// status line; transient failures are swallowed.
pub struct ThreadRecoverJob {
    state: Arc<EngineState>,
    guard: FlightGuard,
}

impl ThreadRecoverJob {
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
        let result = self.state.backend.thread_recover_tick(mode).await;
        if cancel.is_cancelled() {
            return JobTick::Discarded;
        }
        match result {
            Ok(result) => {
                if result.is_definitive() {
                    if let Some(message) = non_empty(result.message.as_deref()) {
                        self.state.set_status(message);
                    }
                }
                JobTick::Ran
            }
            Err(error) => {
                debug!(error = %error, mode = mode.as_str(), "thread recover tick failed");
                JobTick::Ran
            }
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let tick = self.state.config.thread_recover_tick();
        while sleep_or_cancel(&cancel, tick).await {
            self.run_once(&cancel).await;
        }
        debug!("thread recover stopped");
    }
}
