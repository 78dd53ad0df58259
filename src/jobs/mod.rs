pub mod auto_switch;
pub mod hook_watch;
pub mod keepalive;
pub mod post_switch;
pub mod thread_recover;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTick {
    Gated,
    InFlight,
    Idle,
    Ran,
    Discarded,
}

impl JobTick {
    pub fn should_retry(self) -> bool {
        matches!(self, JobTick::Gated | JobTick::InFlight)
    }
}

pub(crate) async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

pub(crate) fn non_empty(text: Option<&str>) -> Option<&str> {
    text.map(str::trim).filter(|text| !text.is_empty())
}
