//! Per-session diagnostics counters.
//!
//! Fragments may be decoded concurrently from a worker pool, so the
//! counters are atomics owned by the session rather than ambient globals.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::ppm::compression::SCHEME_COUNT;

/// Shared counters for one codec session.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Channel anomalies seen across the whole run.
    error_count: AtomicU32,
    /// Compressed-channel counts per scheme code.
    comp_schemes: [AtomicU64; SCHEME_COUNT],
}

impl SessionStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one channel anomaly and returns the run total.
    pub fn record_channel_error(&self) -> u32 {
        self.error_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Channel anomalies recorded so far.
    pub fn error_count(&self) -> u32 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Records one compressed channel encoded or decoded with `scheme`.
    pub fn record_scheme(&self, scheme: u8) {
        if let Some(counter) = self.comp_schemes.get(scheme as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Per-scheme compressed-channel counts.
    pub fn scheme_counts(&self) -> [u64; SCHEME_COUNT] {
        let mut out = [0; SCHEME_COUNT];
        for (slot, counter) in out.iter_mut().zip(&self.comp_schemes) {
            *slot = counter.load(Ordering::Relaxed);
        }
        out
    }

    /// Logs the end-of-run compression statistics.
    pub fn report(&self) {
        let counts = self.scheme_counts();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            log::info!("compression stats: no compressed channels seen");
            return;
        }
        let line: Vec<String> = counts
            .iter()
            .enumerate()
            .map(|(scheme, n)| format!("{scheme}/{n}"))
            .collect();
        log::info!("compression stats scheme/count: {}", line.join(" "));
        if self.error_count() > 0 {
            log::warn!("channel anomalies this run: {}", self.error_count());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = SessionStats::new();
        assert_eq!(stats.record_channel_error(), 1);
        assert_eq!(stats.record_channel_error(), 2);
        assert_eq!(stats.error_count(), 2);

        stats.record_scheme(0);
        stats.record_scheme(3);
        stats.record_scheme(3);
        assert_eq!(stats.scheme_counts(), [1, 0, 0, 2]);
    }
}
