use crate::{app_state::EngineState, commands, guard::FlightGuard};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Coalesces profile reorders into at most one outstanding save. The latest
/// queued order always wins; intermediate ones are never sent.
pub struct OrderQueue {
    state: Arc<EngineState>,
    pending: Mutex<Option<Vec<String>>>,
    saving: FlightGuard,
}

impl OrderQueue {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self {
            state,
            pending: Mutex::new(None),
            saving: FlightGuard::new(),
        }
    }

    pub fn queue_order(self: &Arc<Self>, names: Vec<String>) {
        self.state.reorder_display(&names);
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(names);
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.flush().await });
    }

    pub fn is_idle(&self) -> bool {
        !self.saving.is_running() && !self.has_pending()
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .map(|pending| pending.is_some())
            .unwrap_or(false)
    }

    fn take_pending(&self) -> Option<Vec<String>> {
        self.pending.lock().ok().and_then(|mut pending| pending.take())
    }

    pub async fn flush(&self) {
        loop {
            let Some(permit) = self.saving.try_begin() else {
                debug!("order save in flight, latest order will follow");
                return;
            };
            let Some(names) = self.take_pending() else {
                return;
            };
            self.state.set_status("正在保存排序...");
            match self.state.backend.reorder_profiles(&names).await {
                Ok(snapshot) => {
                    if self.has_pending() {
                        self.state.set_status("排序已保存，正在同步最新顺序...");
                    } else {
                        self.state.apply_snapshot(snapshot, false);
                        self.state.set_status("排序已保存");
                    }
                }
                Err(error) => {
                    self.state.set_status(format!("保存排序失败: {error}"));
                    if let Err(error) =
                        commands::load_dashboard(&self.state, false, Some("已回读排序"), None).await
                    {
                        warn!(error = %error, "re-read order after failed save failed");
                    }
                }
            }
            drop(permit);
            if !self.has_pending() {
                return;
            }
        }
    }
}
