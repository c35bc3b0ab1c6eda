use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Source of item timestamps, in seconds since the Unix epoch.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
    }
}

/// Cheap clock: an atomic refreshed by a timer task instead of a system call on every read.
///
/// Must be started from within a tokio runtime. The timer stops when the clock is dropped.
#[derive(Debug)]
pub struct CoarseClock {
    now:    Arc<AtomicI64>,
    ticker: JoinHandle<()>,
}

impl CoarseClock {
    pub fn start(resolution: Duration) -> Self {
        let now = Arc::new(AtomicI64::new(SystemClock.now()));
        let task_now = Arc::clone(&now);
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(resolution.max(Duration::from_millis(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                task_now.store(SystemClock.now(), Ordering::Release);
            }
        });
        Self { now, ticker }
    }
}

impl Clock for CoarseClock {
    #[inline]
    fn now(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}

impl Drop for CoarseClock {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Release);
    }

    pub fn advance(&self, secs: i64) -> i64 {
        self.now.fetch_add(secs, Ordering::AcqRel) + secs
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> i64 {
        self.now.load(Ordering::Acquire)
    }
}
