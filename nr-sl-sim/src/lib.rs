/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! nr-sl-sim – discrete-event core and NR sidelink (V2X) MAC scheduler
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── des/            – event kernel: clock, ordered queue, cancellation
//! ├── sidelink/       – UE MAC: pools, contexts, resource selection
//! │   ├── traffic     – constant-rate sources, Tx/Rx counters
//! │   └── network     – kernel ↔ MAC wiring (bearer, traffic, tick, tx events)
//! ├── config/         – YAML scenario loading and validation
//! └── sim             – scenario driver and end-of-run report
//! ```

pub mod config;
pub mod des;
pub mod sidelink;
pub mod sim;
