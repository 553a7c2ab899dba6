/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Simulation time values.
//!
//! Two types keep the clock and the offsets apart:
//!
//! * [`SimTime`] – an absolute point on the simulation clock, in nanoseconds
//!   since the start of the run.  Never negative.
//! * [`Delay`] – a signed offset from "now".  Signed so that a negative delay
//!   is representable and can be rejected by
//!   [`Scheduler::schedule`](super::Scheduler::schedule) instead of wrapping.

use std::fmt;

const NANOS_PER_MICRO: u64 = 1_000;
const NANOS_PER_MILLI: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

// ── SimTime ───────────────────────────────────────────────────────────────────

/// Absolute simulation time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SimTime(u64);

impl SimTime {
    /// Start of the simulation.
    pub const ZERO: SimTime = SimTime(0);

    /// Largest millisecond value [`try_from_millis`](Self::try_from_millis)
    /// accepts.
    pub const MAX_MILLIS: u64 = u64::MAX / NANOS_PER_MILLI;

    pub const fn from_nanos(ns: u64) -> Self {
        SimTime(ns)
    }

    pub const fn from_micros(us: u64) -> Self {
        SimTime(us * NANOS_PER_MICRO)
    }

    pub const fn from_millis(ms: u64) -> Self {
        SimTime(ms * NANOS_PER_MILLI)
    }

    /// `None` if `ms` does not fit the nanosecond clock.
    pub const fn try_from_millis(ms: u64) -> Option<Self> {
        match ms.checked_mul(NANOS_PER_MILLI) {
            Some(ns) => Some(SimTime(ns)),
            None => None,
        }
    }

    pub const fn from_secs(s: u64) -> Self {
        SimTime(s * NANOS_PER_SEC)
    }

    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Time in (fractional) milliseconds, for logging.
    pub fn as_millis_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_MILLI as f64
    }

    /// Time in (fractional) seconds, for reports.
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / NANOS_PER_SEC as f64
    }

    /// `self + delay`, or `None` if the result would be negative or overflow.
    pub fn checked_add(self, delay: Delay) -> Option<SimTime> {
        if delay.0 >= 0 {
            self.0.checked_add(delay.0 as u64).map(SimTime)
        } else {
            self.0.checked_sub(delay.0.unsigned_abs()).map(SimTime)
        }
    }

    /// Signed offset from `earlier` to `self`.
    pub fn since(self, earlier: SimTime) -> Delay {
        Delay(self.0 as i64 - earlier.0 as i64)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}ms", self.as_millis_f64())
    }
}

// ── Delay ─────────────────────────────────────────────────────────────────────

/// Signed time offset in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Delay(i64);

impl Delay {
    pub const ZERO: Delay = Delay(0);

    pub const fn from_nanos(ns: i64) -> Self {
        Delay(ns)
    }

    pub const fn from_micros(us: i64) -> Self {
        Delay(us * NANOS_PER_MICRO as i64)
    }

    pub const fn from_millis(ms: i64) -> Self {
        Delay(ms * NANOS_PER_MILLI as i64)
    }

    pub const fn from_secs(s: i64) -> Self {
        Delay(s * NANOS_PER_SEC as i64)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Delay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:+.3}ms", self.0 as f64 / NANOS_PER_MILLI as f64)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
