//! Logical Clock
//!
//! Lets a slave read a master's timestamps without synchronized system
//! clocks. The clock keeps a single signed offset that is recomputed
//! wholesale on every `sync` call. There is no averaging and no
//! round-trip compensation, so every sync may step the clock.

use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// A point in time, in microseconds since the UNIX epoch.
///
/// Used both for local logical time and for the master's time tags carried
/// on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const UNIX_EPOCH: Timestamp = Timestamp(0);

    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis.saturating_mul(1_000))
    }

    pub fn as_micros(self) -> i64 {
        self.0
    }

    /// Convert a system time, counting negatively for times before the epoch
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Self(duration_micros(after)),
            Err(before) => Self(-duration_micros(before.duration())),
        }
    }

    /// Signed number of seconds from `earlier` to `self`, saturating at the
    /// ends of the timestamp range
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        self.0.saturating_sub(earlier.0) as f64 / 1e6
    }

    /// How long until `later` is reached, or `None` if it already has been
    pub fn checked_duration_until(self, later: Timestamp) -> Option<Duration> {
        let micros = later.0.checked_sub(self.0)?;
        if micros > 0 {
            Some(Duration::from_micros(micros as u64))
        } else {
            None
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_micros(rhs)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}s", self.0 as f64 / 1e6)
    }
}

fn duration_micros(duration: Duration) -> i64 {
    i64::try_from(duration.as_micros()).unwrap_or(i64::MAX)
}

/// Source of local system time
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time from the operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::from_system_time(SystemTime::now())
    }
}

/// A manually driven time source for tests and simulations.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct ManualTimeSource {
    micros: Arc<AtomicI64>,
}

impl ManualTimeSource {
    pub fn new(start: Timestamp) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.as_micros())),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.micros.fetch_add(duration_micros(by), Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }
}

/// Local time plus a signed offset learned from the master
pub struct LogicalClock {
    source: Box<dyn TimeSource>,
    /// Signed offset in microseconds
    offset_micros: i64,
    synchronized: bool,
}

impl LogicalClock {
    /// Create a clock backed by the system time
    pub fn new() -> Self {
        Self::with_source(SystemTimeSource)
    }

    pub fn with_source(source: impl TimeSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            offset_micros: 0,
            synchronized: false,
        }
    }

    /// Local system time adjusted by the current offset
    pub fn now(&self) -> Timestamp {
        Timestamp(self.local_now().0.saturating_add(self.offset_micros))
    }

    /// Unadjusted local system time
    pub fn local_now(&self) -> Timestamp {
        self.source.now()
    }

    /// Recompute the offset from the master's timestamp.
    ///
    /// Sets `offset = local_now - master_time`, whatever the prior state.
    pub fn sync(&mut self, master_time: Timestamp) {
        self.offset_micros = self.local_now().0.saturating_sub(master_time.0);
        self.synchronized = true;
    }

    pub fn offset_micros(&self) -> i64 {
        self.offset_micros
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized
    }
}

impl Default for LogicalClock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LogicalClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalClock")
            .field("offset_micros", &self.offset_micros)
            .field("synchronized", &self.synchronized)
            .finish()
    }
}
