//! Process-wide export counters.
//!
//! Every header the process emits carries a flow sequence number and a
//! `sys_uptime`. Both are shared by all flows regardless of which collector
//! they are sent to, so a single [`ExportClock`] is created at startup and
//! handed to every synthesizer behind an `Arc`.

use std::{
    sync::atomic::{AtomicU32, Ordering},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// Added to the elapsed process time when computing `sys_uptime`.
pub const UPTIME_OFFSET_MS: u32 = 1_000;

/// Source of time for an [`ExportClock`]
pub trait Clock {
    /// Time elapsed since the exporter started.
    fn since_start(&self) -> Duration;
    /// Wall-clock time since the Unix epoch.
    fn unix_now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for RealClock {
    fn since_start(&self) -> Duration {
        self.start.elapsed()
    }

    fn unix_now(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Values stamped into one header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// This header's position in the process-wide sequence, starting at 1
    pub flow_sequence: u32,
    /// Milliseconds since start plus [`UPTIME_OFFSET_MS`]
    pub sys_uptime: u32,
    /// Export time, seconds
    pub unix_secs: u32,
    /// Export time, sub-second nanoseconds
    pub unix_nsecs: u32,
}

/// The shared flow sequence counter and uptime reference.
#[derive(Debug)]
pub struct ExportClock<C = RealClock> {
    clock: C,
    sequence: AtomicU32,
}

impl ExportClock<RealClock> {
    /// Create an `ExportClock` whose uptime starts now.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(RealClock::default())
    }
}

impl Default for ExportClock<RealClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> ExportClock<C>
where
    C: Clock,
{
    /// Create an `ExportClock` over an arbitrary time source.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            sequence: AtomicU32::new(0),
        }
    }

    /// Advance the flow sequence by one and recompute `sys_uptime`.
    ///
    /// Concurrent callers each receive a distinct sequence number. The order
    /// in which those numbers reach the wire is not defined.
    #[allow(clippy::cast_possible_truncation)]
    pub fn stamp(&self) -> Stamp {
        let flow_sequence = self.sequence.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
        // Truncation matches the 32 bit wrap of a real exporter's uptime.
        let sys_uptime =
            (self.clock.since_start().as_millis() as u32).wrapping_add(UPTIME_OFFSET_MS);

        let now = self.clock.unix_now();
        Stamp {
            flow_sequence,
            sys_uptime,
            unix_secs: now.as_secs() as u32,
            unix_nsecs: now.subsec_nanos(),
        }
    }
}
