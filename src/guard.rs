//! Non-blocking gates shared by foreground commands and background jobs.
//!
//! None of these wait: a caller that cannot enter skips or reschedules.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

/// `Idle -> Running -> Idle` flag guaranteeing one run at a time per job.
#[derive(Debug, Default, Clone)]
pub struct FlightGuard {
    running: Arc<AtomicBool>,
}

impl FlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_begin(&self) -> Option<FlightPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct FlightPermit {
    running: Arc<AtomicBool>,
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[derive(Debug, Default, Clone)]
pub struct BusyGate {
    holders: Arc<AtomicUsize>,
}

impl BusyGate {
    pub fn enter(&self) -> BusyPermit {
        self.holders.fetch_add(1, Ordering::AcqRel);
        BusyPermit {
            holders: Arc::clone(&self.holders),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.holders.load(Ordering::Acquire) > 0
    }
}

#[derive(Debug)]
pub struct BusyPermit {
    holders: Arc<AtomicUsize>,
}

impl Drop for BusyPermit {
    fn drop(&mut self) {
        self.holders.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Debug, Default, Clone)]
pub struct BlockingGate {
    message: Arc<Mutex<Option<String>>>,
}

impl BlockingGate {
    pub fn enter(&self, message: impl Into<String>) -> BlockingPermit {
        self.set(Some(message.into()));
        BlockingPermit { gate: self.clone() }
    }

    pub fn update(&self, message: impl Into<String>) {
        self.set(Some(message.into()));
    }

    pub fn message(&self) -> Option<String> {
        self.message.lock().map(|guard| guard.clone()).unwrap_or(None)
    }

    pub fn is_blocking(&self) -> bool {
        self.message().is_some()
    }

    fn set(&self, value: Option<String>) {
        if let Ok(mut guard) = self.message.lock() {
            *guard = value;
        }
    }
}

#[derive(Debug)]
pub struct BlockingPermit {
    gate: BlockingGate,
}

impl Drop for BlockingPermit {
    fn drop(&mut self) {
        self.gate.set(None);
    }
}
