//! Time and system load.
//!
//! The engine compares section validity stamps, which are unix seconds on
//! the wire, against a [`Clock`]. The trait exists so tests can drive time
//! explicitly with a [`FakeClock`] instead of sleeping.
//!
//! The [`ResourceMonitor`] periodically samples overall CPU utilization and
//! exposes an `enough_resources` flag. Under pressure the engine skips the
//! consistency check pass, trading strictness for availability.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::System;
use tracing::warn;

//------------ Clock ---------------------------------------------------------

/// A source of wall-clock time.
pub trait Clock: Clone + Send + Sync + 'static {
    /// The current time in unix seconds.
    fn now(&self) -> i64;

    /// The current time in unix milliseconds.
    fn now_millis(&self) -> i64;
}

//------------ SystemClock ---------------------------------------------------

/// The system's wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Duration since the unix epoch.
    fn since_epoch() -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Self::since_epoch().as_secs() as i64
    }

    fn now_millis(&self) -> i64 {
        Self::since_epoch().as_millis() as i64
    }
}

//------------ FakeClock -----------------------------------------------------

/// A clock whose time only moves when told to.
#[derive(Clone, Debug, Default)]
pub struct FakeClock {
    /// The current fake time in milliseconds.
    millis: Arc<parking_lot::Mutex<i64>>,
}

impl FakeClock {
    /// Creates a fake clock starting at the given unix second.
    pub fn at(secs: i64) -> Self {
        FakeClock {
            millis: Arc::new(parking_lot::Mutex::new(secs * 1000)),
        }
    }

    /// Moves time forward by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.millis.lock() += duration.as_millis() as i64;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> i64 {
        *self.millis.lock() / 1000
    }

    fn now_millis(&self) -> i64 {
        *self.millis.lock()
    }
}

//------------ ResourceMonitor -----------------------------------------------

/// Threshold above which consistency checks are shed, in percent.
const CPU_PRESSURE_THRESHOLD: f32 = 75.0;

/// How often the CPU is sampled.
const SAMPLE_PERIOD: Duration = Duration::from_secs(10);

/// A coarse CPU load sampler.
///
/// [`spawn`][Self::spawn] starts a background task that refreshes the flag
/// every ten seconds, integrating utilization over a 100 ms window. Without
/// a running sampler the flag stays at its initial value, which is what
/// tests use to pin the engine into either mode.
#[derive(Clone, Debug)]
pub struct ResourceMonitor {
    /// Whether the system currently has headroom for consistency checks.
    enough: Arc<AtomicBool>,
}

impl ResourceMonitor {
    /// Creates a monitor with the flag pinned to `enough`.
    pub fn pinned(enough: bool) -> Self {
        ResourceMonitor {
            enough: Arc::new(AtomicBool::new(enough)),
        }
    }

    /// Creates a monitor and spawns its sampling task.
    pub fn spawn() -> Self {
        let monitor = Self::pinned(true);
        let enough = monitor.enough.clone();
        tokio::spawn(async move {
            let mut system = System::new();
            loop {
                system.refresh_cpu_usage();
                tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL)
                    .await;
                system.refresh_cpu_usage();
                let usage = system.global_cpu_info().cpu_usage();
                let headroom = usage < CPU_PRESSURE_THRESHOLD;
                if !headroom {
                    warn!(usage, "not enough resources for consistency checks");
                }
                enough.store(headroom, Ordering::Relaxed);
                tokio::time::sleep(SAMPLE_PERIOD).await;
            }
        });
        monitor
    }

    /// Returns whether there is headroom for expensive checks.
    pub fn enough_resources(&self) -> bool {
        self.enough.load(Ordering::Relaxed)
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::at(100);
        assert_eq!(clock.now(), 100);
        assert_eq!(clock.now_millis(), 100_000);
        clock.advance(Duration::from_millis(2500));
        assert_eq!(clock.now(), 102);
        assert_eq!(clock.now_millis(), 102_500);
    }

    #[test]
    fn pinned_monitor_keeps_its_value() {
        assert!(ResourceMonitor::pinned(true).enough_resources());
        assert!(!ResourceMonitor::pinned(false).enough_resources());
    }
}
