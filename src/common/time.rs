// # Time Source Abstraction
//
// All expiration and refresh decisions are made against a monotonic
// nanosecond ticker rather than the wall clock, so tests can drive time
// deterministically and production reads stay allocation-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

/// Process-wide origin for [`SystemTicker`]. All system tickers report
/// nanoseconds elapsed since the first ticker read in the process, which
/// keeps timestamps small and comparable across cache instances.
static ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// A monotonic nanosecond clock.
///
/// Implementations must be monotonic: successive reads never decrease.
pub trait Ticker: Send + Sync + 'static {
    /// Current reading in nanoseconds.
    fn read(&self) -> u64;
}

/// Production ticker backed by [`Instant`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTicker;

impl SystemTicker {
    pub fn new() -> Self {
        SystemTicker
    }
}

impl Ticker for SystemTicker {
    fn read(&self) -> u64 {
        ORIGIN.elapsed().as_nanos() as u64
    }
}

/// A manually advanced ticker for deterministic tests.
///
/// Time only moves when `advance` or `set` is called, so expiration
/// behavior can be asserted exactly.
#[derive(Debug, Default)]
pub struct ManualTicker {
    nanos: AtomicU64,
}

impl ManualTicker {
    pub fn new() -> Self {
        ManualTicker {
            nanos: AtomicU64::new(0),
        }
    }

    /// Advance the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        self.nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::SeqCst);
    }

    /// Set the clock to an absolute nanosecond reading.
    ///
    /// Callers are responsible for preserving monotonicity.
    pub fn set(&self, nanos: u64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }
}

impl Ticker for ManualTicker {
    fn read(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
