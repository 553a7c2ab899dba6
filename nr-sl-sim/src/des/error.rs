/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Errors raised by the event kernel.
//!
//! Both variants end the caller's current operation:
//!
//! * [`SchedulerError::InvalidDelay`] is returned synchronously from
//!   `schedule*()` – the event is **not** inserted.
//! * [`SchedulerError::EventFailed`] is returned from `run*()` when a callback
//!   fails.  The loop stops at the failing event; nothing after it runs.

use thiserror::Error;

use super::time::{Delay, SimTime};

/// Error type for [`Scheduler`](super::Scheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An event was requested before the current simulation time.
    ///
    /// `delay` is relative to `now`; for `schedule_at()` it is the (negative)
    /// distance between the requested time and `now`.
    #[error("invalid delay {delay} at {now}: events cannot be scheduled in the past")]
    InvalidDelay { delay: Delay, now: SimTime },

    /// Adding the delay to the clock overflowed the 64-bit time range.
    #[error("delay {delay} from {now} overflows the simulation clock")]
    ClockOverflow { delay: Delay, now: SimTime },

    /// A callback returned an error.  The run loop stopped at this event.
    #[error("event #{seq} scheduled for {at} failed")]
    EventFailed {
        seq: u64,
        at: SimTime,
        #[source]
        source: anyhow::Error,
    },
}
