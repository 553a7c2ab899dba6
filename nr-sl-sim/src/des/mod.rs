//! Discrete-event simulation kernel.
//!
//! [`Scheduler`] owns the simulation clock and a time-ordered queue of
//! callbacks.  Everything that happens in a simulated network (bearer
//! activation, MAC scheduling ticks, PSCCH/PSSCH transmissions, mobility
//! updates) is an event on this queue.
//!
//! # Guarantees
//!
//! | Topic | Behaviour |
//! |---|---|
//! | Ordering | Ascending `(fire time, insertion sequence)` – equal times run in submission order |
//! | Clock | Monotonic; only the run loop moves it, never backwards |
//! | Negative delay | Rejected synchronously with [`SchedulerError::InvalidDelay`]; nothing is queued |
//! | Cancellation | Synchronous and idempotent; checked again at pop time |
//! | Callback failure | Stops the loop, returned as [`SchedulerError::EventFailed`] |
//! | Threads | None.  The host world is handed to each callback as `&mut W` |
//!
//! # Example
//! ```rust
//! use nr_sl_sim::des::{Delay, Scheduler, SimTime};
//!
//! let mut sched: Scheduler<Vec<&'static str>> = Scheduler::new();
//! sched.schedule(Delay::from_millis(5), |_, log| { log.push("A"); Ok(()) }).unwrap();
//! sched.schedule(Delay::from_millis(5), |_, log| { log.push("B"); Ok(()) }).unwrap();
//! sched.schedule(Delay::from_millis(3), |_, log| { log.push("C"); Ok(()) }).unwrap();
//!
//! let mut log = Vec::new();
//! sched.run(&mut log, SimTime::from_millis(10)).unwrap();
//! assert_eq!(log, ["C", "A", "B"]);
//! assert_eq!(sched.now(), SimTime::from_millis(10));
//! ```

pub mod error;
pub mod event;
pub mod time;

pub use error::SchedulerError;
pub use event::{EventFn, EventHandle};
pub use time::{Delay, SimTime};

use std::collections::{BinaryHeap, HashSet};
use std::fmt;

use tracing::{debug, info, trace};

use event::ScheduledEvent;

// ── RunSummary ────────────────────────────────────────────────────────────────

/// What one call to [`Scheduler::run`] / [`Scheduler::run_to_completion`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Callbacks executed.
    pub executed: u64,
    /// Cancelled entries discarded at pop time.
    pub skipped_cancelled: u64,
    /// Clock value when the loop returned.
    pub end_time: SimTime,
    /// `true` if [`Scheduler::stop`] ended the run before the queue drained.
    pub stopped: bool,
}

// ── Scheduler ─────────────────────────────────────────────────────────────────

/// Single-threaded discrete-event scheduler over a host world `W`.
///
/// The world is not stored here; it is passed to [`run`](Self::run) and lent
/// to each callback alongside the scheduler, so callbacks can both mutate
/// model state and enqueue follow-up events.
pub struct Scheduler<W> {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<ScheduledEvent<W>>,
    /// Sequence numbers of queued events that have not been cancelled.
    live: HashSet<u64>,
    stop_requested: bool,
}

impl<W> Default for Scheduler<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> fmt::Debug for Scheduler<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now", &self.now)
            .field("next_seq", &self.next_seq)
            .field("queued", &self.queue.len())
            .field("pending", &self.live.len())
            .finish()
    }
}

impl<W> Scheduler<W> {
    /// Create an empty scheduler with the clock at [`SimTime::ZERO`].
    pub fn new() -> Self {
        Self {
            now: SimTime::ZERO,
            next_seq: 0,
            queue: BinaryHeap::new(),
            live: HashSet::new(),
            stop_requested: false,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of queued events that have not been cancelled.
    pub fn pending_events(&self) -> usize {
        self.live.len()
    }

    /// `true` while `handle`'s event is queued and not cancelled.
    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.live.contains(&handle.seq())
    }

    // ── Scheduling ────────────────────────────────────────────────────────────

    /// Schedule `callback` to run at `now + delay`.
    ///
    /// # Errors
    /// * [`SchedulerError::InvalidDelay`] if `delay` is negative.
    /// * [`SchedulerError::ClockOverflow`] if `now + delay` exceeds the clock range.
    pub fn schedule<F>(&mut self, delay: Delay, callback: F) -> Result<EventHandle, SchedulerError>
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> anyhow::Result<()> + 'static,
    {
        if delay.is_negative() {
            return Err(SchedulerError::InvalidDelay {
                delay,
                now: self.now,
            });
        }
        let at = self
            .now
            .checked_add(delay)
            .ok_or(SchedulerError::ClockOverflow {
                delay,
                now: self.now,
            })?;
        Ok(self.insert(at, Box::new(callback)))
    }

    /// Schedule `callback` at the absolute time `at`.
    ///
    /// # Errors
    /// [`SchedulerError::InvalidDelay`] if `at` is before [`now`](Self::now).
    pub fn schedule_at<F>(&mut self, at: SimTime, callback: F) -> Result<EventHandle, SchedulerError>
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> anyhow::Result<()> + 'static,
    {
        if at < self.now {
            return Err(SchedulerError::InvalidDelay {
                delay: at.since(self.now),
                now: self.now,
            });
        }
        Ok(self.insert(at, Box::new(callback)))
    }

    /// Schedule `callback` at the current time, after every event already
    /// queued for `now`.
    pub fn schedule_now<F>(&mut self, callback: F) -> EventHandle
    where
        F: FnOnce(&mut Scheduler<W>, &mut W) -> anyhow::Result<()> + 'static,
    {
        self.insert(self.now, Box::new(callback))
    }

    fn insert(&mut self, at: SimTime, callback: EventFn<W>) -> EventHandle {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(ScheduledEvent { at, seq, callback });
        self.live.insert(seq);
        trace!(seq, at = %at, now = %self.now, queued = self.queue.len(), "event scheduled");
        EventHandle::new(seq, at)
    }

    /// Cancel the event behind `handle`.
    ///
    /// Cancelling an event that already ran or was already cancelled is a
    /// no-op.  Once this returns the callback will never execute.
    pub fn cancel(&mut self, handle: EventHandle) {
        if self.live.remove(&handle.seq()) {
            trace!(seq = handle.seq(), at = %handle.at(), "event cancelled");
        }
    }

    /// Ask the run loop to return after the current callback.
    ///
    /// Only affects a run in progress; every `run*()` call starts with the
    /// flag cleared.  The clock is left at the current event's time.
    pub fn stop(&mut self) {
        self.stop_requested = true;
    }

    // ── Run loop ──────────────────────────────────────────────────────────────

    /// Execute events in order until the queue is empty or the next event
    /// fires after `stop_time`; the clock is then advanced to `stop_time`.
    ///
    /// # Errors
    /// [`SchedulerError::EventFailed`] as soon as a callback fails.  The clock
    /// stays at the failing event's time and later events remain queued.
    pub fn run(&mut self, world: &mut W, stop_time: SimTime) -> Result<RunSummary, SchedulerError> {
        self.run_loop(world, Some(stop_time))
    }

    /// Execute events until the queue is empty.  The clock stays at the time
    /// of the last executed event.
    pub fn run_to_completion(&mut self, world: &mut W) -> Result<RunSummary, SchedulerError> {
        self.run_loop(world, None)
    }

    fn run_loop(
        &mut self,
        world: &mut W,
        stop_time: Option<SimTime>,
    ) -> Result<RunSummary, SchedulerError> {
        self.stop_requested = false;
        let mut summary = RunSummary::default();

        info!(
            now = %self.now,
            stop_time = ?stop_time.map(|t| t.to_string()),
            pending = self.live.len(),
            "=== Scheduler::run() ==="
        );

        loop {
            if self.stop_requested {
                summary.stopped = true;
                debug!(now = %self.now, "stop requested");
                break;
            }

            let next_at = match self.queue.peek() {
                Some(head) => head.at,
                None => break,
            };
            if stop_time.is_some_and(|limit| next_at > limit) {
                break;
            }
            let Some(event) = self.queue.pop() else {
                break;
            };

            // Cancelled after insertion: discard without touching the clock.
            if !self.live.remove(&event.seq) {
                summary.skipped_cancelled += 1;
                continue;
            }

            debug_assert!(event.at >= self.now, "clock must never move backwards");
            self.now = event.at;
            summary.executed += 1;
            trace!(seq = event.seq, now = %self.now, "executing event");

            let (seq, at) = (event.seq, event.at);
            (event.callback)(self, world)
                .map_err(|source| SchedulerError::EventFailed { seq, at, source })?;
        }

        if let Some(limit) = stop_time {
            if !summary.stopped && limit > self.now {
                self.now = limit;
            }
        }
        summary.end_time = self.now;

        info!(
            executed = summary.executed,
            skipped_cancelled = summary.skipped_cancelled,
            end_time = %summary.end_time,
            stopped = summary.stopped,
            "=== Run complete ==="
        );

        Ok(summary)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
