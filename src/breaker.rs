//! Admission controller.
//!
//! Failure and timeout rates over a sliding window are converted into a pool of "serve from cache" permits. Every
//! counter is an atomic; nothing here blocks. Reading a rate and then adding permits is not atomic as a whole, which
//! only makes the heuristic slightly imprecise under contention.
//!
//! The window is a hard cutoff: once `total` goes past the window size every counter drops to zero, including the
//! contribution of the report that triggered the reset.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::types::Outcome;

pub trait AdmissionControl: Send + Sync + 'static {
    fn report(&self, outcome: Outcome);

    /// Try to take one degrade permit. Called once per inbound call.
    fn degrade(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BreakerConfig {
    /// Number of reports after which all counters reset.
    pub window:               u64,
    pub err_threshold:        f64,
    pub timeout_threshold:    f64,
    /// Permits added on every report while the error rate is above threshold. Rounded up.
    pub err_degrade_rate:     f64,
    /// Same for the timeout rate.
    pub timeout_degrade_rate: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window:               100_000,
            err_threshold:        0.01,
            timeout_threshold:    0.01,
            err_degrade_rate:     2.0,
            timeout_degrade_rate: 2.0,
        }
    }
}

#[derive(Debug)]
pub struct Breaker {
    window:            u64,
    err_threshold:     f64,
    timeout_threshold: f64,
    err_permits:       u64,
    timeout_permits:   u64,

    total:         AtomicU64,
    err_count:     AtomicU64,
    timeout_count: AtomicU64,
    permits:       AtomicU64,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            window:            config.window,
            err_threshold:     config.err_threshold,
            timeout_threshold: config.timeout_threshold,
            err_permits:       permit_step(config.err_degrade_rate),
            timeout_permits:   permit_step(config.timeout_degrade_rate),
            total:             AtomicU64::new(0),
            err_count:         AtomicU64::new(0),
            timeout_count:     AtomicU64::new(0),
            permits:           AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    #[inline]
    pub fn error_count(&self) -> u64 {
        self.err_count.load(Ordering::Acquire)
    }

    #[inline]
    pub fn timeout_count(&self) -> u64 {
        self.timeout_count.load(Ordering::Acquire)
    }

    /// Permits currently in the pool.
    #[inline]
    pub fn permits(&self) -> u64 {
        self.permits.load(Ordering::Acquire)
    }

    fn rate_exceeded(&self, counter: &AtomicU64, threshold: f64) -> bool {
        let total = self.total.load(Ordering::Acquire);
        if total == 0 {
            return false;
        }
        counter.load(Ordering::Acquire) as f64 / total as f64 > threshold
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

impl AdmissionControl for Breaker {
    fn report(&self, outcome: Outcome) {
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        match outcome {
            Outcome::Fail => {
                self.err_count.fetch_add(1, Ordering::AcqRel);
            }
            Outcome::Timeout => {
                self.timeout_count.fetch_add(1, Ordering::AcqRel);
            }
            Outcome::Success => (),
        }

        if self.rate_exceeded(&self.err_count, self.err_threshold) {
            self.permits.fetch_add(self.err_permits, Ordering::AcqRel);
        }
        if self.rate_exceeded(&self.timeout_count, self.timeout_threshold) {
            self.permits.fetch_add(self.timeout_permits, Ordering::AcqRel);
        }

        if total > self.window {
            tracing::debug!(window = self.window, "admission window is full, resetting counters");
            self.total.store(0, Ordering::Release);
            self.err_count.store(0, Ordering::Release);
            self.timeout_count.store(0, Ordering::Release);
        }
    }

    fn degrade(&self) -> bool {
        self.permits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |p| p.checked_sub(1))
            .is_ok()
    }
}

fn permit_step(rate: f64) -> u64 {
    if rate.is_finite() && rate > 0.0 {
        rate.ceil() as u64
    }
    else {
        0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn breaker(window: u64, err_threshold: f64, timeout_threshold: f64) -> Breaker {
        Breaker::new(BreakerConfig {
            window,
            err_threshold,
            timeout_threshold,
            ..Default::default()
        })
    }

    #[test]
    fn no_permits_without_failures() {
        let b = breaker(100, 0.05, 0.05);
        for _ in 0..50 {
            b.report(Outcome::Success);
        }
        assert_eq!(b.permits(), 0);
        assert!(!b.degrade());
    }

    #[test]
    fn error_rate_over_threshold_grants_degrade() {
        let (window, threshold) = (100u64, 0.05);
        let b = breaker(window, threshold, 1.0);
        let fails = (threshold * window as f64).ceil() as u64 + 1;
        for _ in 0..fails {
            b.report(Outcome::Fail);
        }
        b.report(Outcome::Success);
        assert!(b.total() < window, "window must not have reset yet");
        assert!(b.degrade());
    }

    #[test]
    fn both_thresholds_add_up() {
        let b = Breaker::new(BreakerConfig {
            window:               1000,
            err_threshold:        0.0,
            timeout_threshold:    0.0,
            err_degrade_rate:     1.5,
            timeout_degrade_rate: 3.0,
        });
        b.report(Outcome::Fail);
        assert_eq!(b.permits(), 2);
        b.report(Outcome::Timeout);
        // err 1/2 > 0 and timeout 1/2 > 0
        assert_eq!(b.permits(), 2 + 2 + 3);
    }

    #[test]
    fn degrade_consumes_permits() {
        let b = breaker(1000, 0.5, 1.0);
        b.report(Outcome::Fail);
        assert_eq!(b.permits(), 2);
        assert!(b.degrade());
        assert!(b.degrade());
        assert!(!b.degrade());
        assert_eq!(b.permits(), 0);
    }

    #[test]
    fn window_resets_hard() {
        let window = 10;
        let b = breaker(window, 1.0, 1.0);
        for _ in 0..window {
            b.report(Outcome::Success);
        }
        assert_eq!(b.total(), window);
        b.report(Outcome::Fail);
        assert!(b.total() < window);
        assert_eq!(b.total(), 0);
        // The sample which overflowed the window is gone with it.
        assert_eq!(b.error_count(), 0);
    }

    #[test]
    fn permits_survive_window_reset() {
        let b = breaker(2, 0.1, 1.0);
        b.report(Outcome::Fail);
        b.report(Outcome::Fail);
        b.report(Outcome::Fail);
        assert_eq!(b.total(), 0);
        assert_eq!(b.permits(), 6);
    }

    #[test]
    fn concurrent_reports_are_counted() {
        let b = std::sync::Arc::new(breaker(1_000_000, 1.0, 1.0));
        let threads = (0..4)
            .map(|_| {
                let b = b.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        b.report(Outcome::Timeout);
                    }
                })
            })
            .collect::<Vec<_>>();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(b.total(), 4000);
        assert_eq!(b.timeout_count(), 4000);
    }

    #[cfg(all(feature = "serde", feature = "test"))]
    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let config: BreakerConfig = serde_json::from_str(r#"{"window": 500, "err_threshold": 0.2}"#).unwrap();
        assert_eq!(config.window, 500);
        assert_eq!(config.err_threshold, 0.2);
        assert_eq!(config.timeout_threshold, BreakerConfig::default().timeout_threshold);
        assert_eq!(config.err_degrade_rate, 2.0);
    }
}
