//! Process-wide counter registry
//!
//! Telemetry for hand-off drops, publish volume and source progress.
//! Counters are plain atomics behind a named registry; exporting them
//! anywhere is somebody else's job.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

/// Cheap cloneable counter.
#[derive(Clone)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

fn registry() -> &'static Mutex<HashMap<String, Counter>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Counter>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Fetch or create the named counter.
pub fn counter(name: &str) -> Counter {
    let mut map = registry().lock().unwrap_or_else(|e| e.into_inner());
    map.entry(name.to_string())
        .or_insert_with(|| Counter(Arc::new(AtomicU64::new(0))))
        .clone()
}

/// Snapshot of every counter, sorted by name.
pub fn snapshot() -> Vec<(String, u64)> {
    let map = registry().lock().unwrap_or_else(|e| e.into_inner());
    let mut entries: Vec<(String, u64)> = map
        .iter()
        .map(|(name, counter)| (name.clone(), counter.value()))
        .collect();
    entries.sort();
    entries
}
