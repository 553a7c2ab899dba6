//! Application traffic on top of the sidelink bearer.
//!
//! Every UE runs one constant-bit-rate source: a packet of
//! `packet_size_bytes` every `packet_size_bytes * 8 / data_rate` seconds,
//! starting one interval after its bearer comes up.  Packets wait in the
//! UE's MAC buffer until the next scheduling decision carries them.
//!
//! [`TrafficStats`] counts what the sources produced and what the group
//! received.  A packet is received by every other active UE with the same
//! destination layer-2 id when the initial transmission of its transport
//! block fires; blind retransmissions never add receptions.

use std::collections::BTreeMap;

use crate::des::{Delay, SimTime};

use super::context::UeId;

// ── TrafficSource ─────────────────────────────────────────────────────────────

/// Constant-rate packet source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrafficSource {
    packet_size_bytes: u32,
    data_rate_kbps: u32,
    interval: Delay,
}

impl TrafficSource {
    /// `None` for a zero packet size or rate, or a rate so high the packet
    /// interval rounds to zero.
    pub fn new(packet_size_bytes: u32, data_rate_kbps: u32) -> Option<Self> {
        if packet_size_bytes == 0 || data_rate_kbps == 0 {
            return None;
        }
        // bits / (kbit/s) = ms, scaled to ns
        let ns = i64::from(packet_size_bytes) * 8 * 1_000_000 / i64::from(data_rate_kbps);
        if ns == 0 {
            return None;
        }
        Some(Self {
            packet_size_bytes,
            data_rate_kbps,
            interval: Delay::from_nanos(ns),
        })
    }

    pub fn packet_size_bytes(&self) -> u32 {
        self.packet_size_bytes
    }

    pub fn data_rate_kbps(&self) -> u32 {
        self.data_rate_kbps
    }

    /// Time between two packets.
    pub fn interval(&self) -> Delay {
        self.interval
    }
}

// ── TrafficStats ──────────────────────────────────────────────────────────────

/// Application-level Tx/Rx counters for the whole group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Sum of packet inter-reception gaps over all receivers, in ns.
    pir_total_ns: u64,
    pir_samples: u64,
    last_rx: BTreeMap<UeId, SimTime>,
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tx_bits(&self) -> u64 {
        self.tx_bytes * 8
    }

    pub fn rx_bits(&self) -> u64 {
        self.rx_bytes * 8
    }

    /// A source handed one packet to its MAC.
    pub fn on_transmit(&mut self, bytes: u32) {
        self.tx_packets += 1;
        self.tx_bytes += u64::from(bytes);
    }

    /// `ue` received `packets` packets totalling `bytes` at `at`.
    ///
    /// Each packet is one inter-reception sample measured from the packet
    /// before it at the same receiver, so packets sharing a transport block
    /// contribute a zero gap.
    pub fn on_receive(&mut self, ue: UeId, packets: u32, bytes: u64, at: SimTime) {
        if packets == 0 {
            return;
        }
        self.rx_packets += u64::from(packets);
        self.rx_bytes += bytes;

        let first_is_sample = match self.last_rx.insert(ue, at) {
            Some(previous) => {
                self.pir_total_ns += at.as_nanos().saturating_sub(previous.as_nanos());
                true
            }
            None => false,
        };
        self.pir_samples += u64::from(packets) - u64::from(!first_is_sample);
    }

    /// Mean packet inter-reception time in seconds, `None` before any
    /// receiver has seen two packets.
    pub fn average_pir_secs(&self) -> Option<f64> {
        (self.pir_samples > 0)
            .then(|| self.pir_total_ns as f64 / self.pir_samples as f64 / 1e9)
    }

    /// Received application throughput over `[from, to]`, in kbit/s.
    pub fn throughput_kbps(&self, from: SimTime, to: SimTime) -> f64 {
        let secs = to.as_secs_f64() - from.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.rx_bits() as f64 / secs / 1000.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
