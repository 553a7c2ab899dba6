//! Telemetry records and sinks.
//!
//! The scheduler reports every decision, every transmission that fires and
//! every pool-exhaustion through [`StatsSink::record`].  Storage and flushing
//! are up to the sink; the crate ships an in-memory sink, a `tracing` sink
//! and [`TeeSink`] to feed both at once.

use tracing::info;

use crate::des::SimTime;

use super::context::UeId;
use super::pool::PoolId;

/// Whether a transmission carries a new transport block or repeats one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Initial,
    /// Blind retransmission number `n` (1-based).
    BlindRetx(u8),
}

/// One record handed to a [`StatsSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlRecord {
    /// A scheduling decision was made.
    Decision {
        ue: UeId,
        pool: PoolId,
        subchannel: u16,
        slot: u64,
        mcs: u8,
        at: SimTime,
    },
    /// A PSCCH/PSSCH transmission fired.
    Transmission {
        ue: UeId,
        kind: TxKind,
        slot: u64,
        subchannel: u16,
        rb_start: u16,
        rb_len: u16,
        mcs: u8,
        at: SimTime,
    },
    /// No eligible resource was found in the selection window.
    PoolExhausted { ue: UeId, pool: PoolId, at: SimTime },
}

/// Receiver of scheduler telemetry.
pub trait StatsSink {
    fn record(&mut self, record: SlRecord);
}

// ── MemorySink ────────────────────────────────────────────────────────────────

/// Keeps every record in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Vec<SlRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[SlRecord] {
        &self.records
    }

    pub fn transmissions(&self) -> impl Iterator<Item = &SlRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r, SlRecord::Transmission { .. }))
    }

    pub fn decisions(&self) -> impl Iterator<Item = &SlRecord> {
        self.records
            .iter()
            .filter(|r| matches!(r, SlRecord::Decision { .. }))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

impl StatsSink for MemorySink {
    fn record(&mut self, record: SlRecord) {
        self.records.push(record);
    }
}

// ── TracingSink ───────────────────────────────────────────────────────────────

/// Emits one structured `tracing` event per record (target `sl_stats`).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl StatsSink for TracingSink {
    fn record(&mut self, record: SlRecord) {
        match record {
            SlRecord::Decision {
                ue,
                pool,
                subchannel,
                slot,
                mcs,
                at,
            } => info!(target: "sl_stats", ue, pool, subchannel, slot, mcs, at = %at, "decision"),
            SlRecord::Transmission {
                ue,
                kind,
                slot,
                subchannel,
                rb_start,
                rb_len,
                mcs,
                at,
            } => info!(
                target: "sl_stats",
                ue,
                kind = ?kind,
                slot,
                subchannel,
                rb_start,
                rb_len,
                mcs,
                at = %at,
                "pscch/pssch tx"
            ),
            SlRecord::PoolExhausted { ue, pool, at } => {
                info!(target: "sl_stats", ue, pool, at = %at, "pool exhausted")
            }
        }
    }
}

/// Forwards every record to two sinks.
#[derive(Debug, Clone, Default)]
pub struct TeeSink<A, B> {
    pub first: A,
    pub second: B,
}

impl<A: StatsSink, B: StatsSink> StatsSink for TeeSink<A, B> {
    fn record(&mut self, record: SlRecord) {
        self.first.record(record.clone());
        self.second.record(record);
    }
}
