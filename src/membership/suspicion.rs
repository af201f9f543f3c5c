// Suspicion Timers
//
// One one-shot timer per suspect member. If the member has not refuted by
// the time the timer fires, it is declared faulty. Restarting a timer for
// the same address replaces the previous one (latest start wins); any
// transition out of suspect cancels it.

use crate::node::NodeInner;
use crate::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct Suspicion {
    timeout: Duration,
    timers: Mutex<HashMap<Address, JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl Suspicion {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            timers: Mutex::new(HashMap::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Arm (or re-arm) the timer for a suspect member
    pub fn start(&self, address: Address, node: Weak<NodeInner>) {
        if !self.enabled.load(Ordering::SeqCst) {
            return;
        }
        let mut timers = self.timers.lock();
        if let Some(previous) = timers.remove(&address) {
            previous.abort();
        }
        let timeout = self.timeout;
        let timer_address = address.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(node) = node.upgrade() {
                node.convert_suspect_to_faulty(&timer_address).await;
            }
        });
        timers.insert(address, handle);
    }

    /// Cancel the timer for a member that is no longer suspect
    pub fn cancel(&self, address: &str) {
        if let Some(handle) = self.timers.lock().remove(address) {
            handle.abort();
        }
    }

    /// Forget a timer without aborting it; called from the timer task itself
    /// when it fires
    pub fn clear(&self, address: &str) {
        self.timers.lock().remove(address);
    }

    /// Cancel every timer and refuse new ones; used by leave and destroy
    pub fn stop_all(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        let mut timers = self.timers.lock();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Accept timers again; required before a rejoin
    pub fn reenable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.lock().len()
    }
}
