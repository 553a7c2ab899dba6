//! Queue entries and the handles returned to callers.

use std::cmp::Ordering;
use std::fmt;

use super::time::SimTime;
use super::Scheduler;

/// Deferred work: runs once with the kernel and the host world.
///
/// The callback may schedule or cancel further events through the
/// `&mut Scheduler<W>` it receives.
pub type EventFn<W> = Box<dyn FnOnce(&mut Scheduler<W>, &mut W) -> anyhow::Result<()>>;

/// Opaque reference to a scheduled event, used for cancellation.
///
/// Handles are plain sequence numbers: copying one is free and a stale handle
/// (already executed or cancelled) is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventHandle {
    seq: u64,
    at: SimTime,
}

impl EventHandle {
    pub(crate) fn new(seq: u64, at: SimTime) -> Self {
        Self { seq, at }
    }

    /// Insertion sequence number (unique per scheduler).
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Absolute fire time.
    pub fn at(&self) -> SimTime {
        self.at
    }
}

/// One queued event.
pub(crate) struct ScheduledEvent<W> {
    pub(crate) at: SimTime,
    pub(crate) seq: u64,
    pub(crate) callback: EventFn<W>,
}

impl<W> fmt::Debug for ScheduledEvent<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledEvent")
            .field("at", &self.at)
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

// BinaryHeap is a max-heap: reverse (time, seq) so the earliest event, and
// among equal times the first inserted, sits on top.
impl<W> Ord for ScheduledEvent<W> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.at.cmp(&other.at) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ord => ord,
        }
        .reverse()
    }
}

impl<W> PartialOrd for ScheduledEvent<W> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<W> PartialEq for ScheduledEvent<W> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl<W> Eq for ScheduledEvent<W> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn entry(at_ms: u64, seq: u64) -> ScheduledEvent<()> {
        ScheduledEvent {
            at: SimTime::from_millis(at_ms),
            seq,
            callback: Box::new(|_, _| Ok(())),
        }
    }

    #[test]
    fn heap_pops_earliest_time_first() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(30, 0));
        heap.push(entry(10, 1));
        heap.push(entry(20, 2));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn equal_times_pop_in_sequence_order() {
        let mut heap = BinaryHeap::new();
        heap.push(entry(5, 2));
        heap.push(entry(5, 0));
        heap.push(entry(5, 1));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }
}
