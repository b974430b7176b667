//! Statistics tracking for the proxy.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared by the relay engine and the egress dialer.
pub struct Stats {
    pub connections: AtomicU64,
    pub resolved: AtomicU64,
    pub resolve_failures: AtomicU64,
    pub dialed: AtomicU64,
    pub dial_failures: AtomicU64,
    pub bind_warnings: AtomicU64,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            connections: AtomicU64::new(0),
            resolved: AtomicU64::new(0),
            resolve_failures: AtomicU64::new(0),
            dialed: AtomicU64::new(0),
            dial_failures: AtomicU64::new(0),
            bind_warnings: AtomicU64::new(0),
        }
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolve(&self, ok: bool) {
        if ok {
            self.resolved.fetch_add(1, Ordering::Relaxed);
        } else {
            self.resolve_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_dial(&self, ok: bool) {
        if ok {
            self.dialed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dial_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_bind_warning(&self) {
        self.bind_warnings.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_and_reset(&self) -> StatsSnapshot {
        StatsSnapshot {
            connections: self.connections.swap(0, Ordering::Relaxed),
            resolved: self.resolved.swap(0, Ordering::Relaxed),
            resolve_failures: self.resolve_failures.swap(0, Ordering::Relaxed),
            dialed: self.dialed.swap(0, Ordering::Relaxed),
            dial_failures: self.dial_failures.swap(0, Ordering::Relaxed),
            bind_warnings: self.bind_warnings.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub connections: u64,
    pub resolved: u64,
    pub resolve_failures: u64,
    pub dialed: u64,
    pub dial_failures: u64,
    pub bind_warnings: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_resets_counters() {
        let stats = Stats::new();
        stats.record_connection();
        stats.record_resolve(true);
        stats.record_resolve(false);
        stats.record_dial(true);
        stats.record_bind_warning();

        let snap = stats.snapshot_and_reset();
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.resolved, 1);
        assert_eq!(snap.resolve_failures, 1);
        assert_eq!(snap.dialed, 1);
        assert_eq!(snap.dial_failures, 0);
        assert_eq!(snap.bind_warnings, 1);

        assert_eq!(stats.snapshot_and_reset().connections, 0);
    }
}
