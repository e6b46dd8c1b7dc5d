//! Simulation clock primitives
//!
//! The simulator is a single-threaded cooperative machine: time advances
//! only when a module finishes a piece of work and notifies a completion
//! event. There is no preemption and no OS threading; everything that looks
//! concurrent is ordered by these events.

// ============================================================================
// SimTime
// ============================================================================

/// A point in simulated time, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn from_ns(ns: u64) -> Self {
        SimTime(ns)
    }

    pub const fn as_ns(&self) -> u64 {
        self.0
    }
}

impl core::ops::Add<u64> for SimTime {
    type Output = SimTime;

    fn add(self, ns: u64) -> SimTime {
        SimTime(self.0.saturating_add(ns))
    }
}

impl core::fmt::Display for SimTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

// ============================================================================
// FinishEvent
// ============================================================================

/// One-shot completion signal
///
/// Each hardware op owns a fresh event; sharing one event across ops would
/// let a single notification release every waiter. The event records the
/// completion time so downstream ops know when their input became ready.
#[derive(Debug, Default)]
pub struct FinishEvent {
    at: Option<SimTime>,
}

impl FinishEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notify the event at time `at`. Notifying twice is a scheduler bug.
    pub fn notify(&mut self, at: SimTime) {
        debug_assert!(self.at.is_none(), "finish event notified twice");
        if self.at.is_none() {
            self.at = Some(at);
        }
    }

    pub fn is_notified(&self) -> bool {
        self.at.is_some()
    }

    /// Completion time, once notified
    pub fn time(&self) -> Option<SimTime> {
        self.at
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
