// Stats Reporting
//
// Counters, gauges, and timings are pushed through an injected `StatsSink`
// (no-op by default) rather than a process-wide singleton. Named stats hooks
// let embedding applications expose their own state through `get_stats()`.

use crate::error::{Result, RingError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Destination for protocol counters, gauges, and timings
pub trait StatsSink: Send + Sync {
    fn count(&self, name: &str, value: i64);
    fn gauge(&self, name: &str, value: f64);
    fn timing(&self, name: &str, elapsed: Duration);
}

/// Sink that discards everything; the default when none is injected
#[derive(Debug, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn count(&self, _name: &str, _value: i64) {}
    fn gauge(&self, _name: &str, _value: f64) {}
    fn timing(&self, _name: &str, _elapsed: Duration) {}
}

/// Provider of a named block in the node's `get_stats()` output
pub trait StatsHook: Send + Sync {
    fn get_stats(&self) -> serde_json::Value;
}

/// Registry of named stats hooks; duplicate names are rejected
#[derive(Default)]
pub struct StatsHookRegistry {
    hooks: Mutex<HashMap<String, Arc<dyn StatsHook>>>,
}

impl StatsHookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, hook: Arc<dyn StatsHook>) -> Result<()> {
        let name = name.into();
        let mut hooks = self.hooks.lock();
        if hooks.contains_key(&name) {
            return Err(RingError::Configuration(format!(
                "stats hook {:?} is already registered",
                name
            )));
        }
        hooks.insert(name, hook);
        Ok(())
    }

    /// Collect every hook's output into one JSON object keyed by hook name
    pub fn collect(&self) -> serde_json::Value {
        let hooks = self.hooks.lock();
        let mut out = serde_json::Map::new();
        for (name, hook) in hooks.iter() {
            out.insert(name.clone(), hook.get_stats());
        }
        serde_json::Value::Object(out)
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }
}
