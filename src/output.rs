// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Outbound collaborator: the per-packet output record sink.
//!
//! The downstream node tree and output object model are out of scope for
//! this crate (spec §1); `OutputSink` is the seam `StreamAligner::read_event`
//! drives to populate one record per packet, per emitted event.

/// Top-level status of an emitted packet record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketStatus {
    Ok,
    Dropped,
}

/// Per-module FEM status tagged during `fem_event_nr_clock_check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FemStatus {
    Ok,
    BadEventNr,
}

/// Collaborator that accepts reset-then-populate per-packet records.
///
/// Every method is addressed by packet identifier; `reset` must be called
/// before any other setter for a given `pid` in a given emission cycle.
pub trait OutputSink {
    fn reset(&mut self, pid: i32);
    fn set_status(&mut self, pid: i32, status: PacketStatus);
    fn set_identifier(&mut self, pid: i32, id: i32);
    fn set_packet_evt_sequence(&mut self, pid: i32, seq: i32);
    fn set_nr_modules(&mut self, pid: i32, n: i32);
    fn set_nr_channels(&mut self, pid: i32, n: i32);
    fn set_nr_samples(&mut self, pid: i32, n: i32);
    fn set_bco(&mut self, pid: i32, bco: u64);

    fn set_fem_clock(&mut self, pid: i32, module: usize, v: i32);
    fn set_fem_evt_sequence(&mut self, pid: i32, module: usize, v: i32);
    fn set_fem_slot(&mut self, pid: i32, module: usize, v: i32);
    fn set_checksum_lsb(&mut self, pid: i32, module: usize, v: i32);
    fn set_checksum_msb(&mut self, pid: i32, module: usize, v: i32);
    fn set_calc_checksum_lsb(&mut self, pid: i32, module: usize, v: i32);
    fn set_calc_checksum_msb(&mut self, pid: i32, module: usize, v: i32);
    fn set_fem_status(&mut self, pid: i32, module: usize, status: FemStatus);

    fn set_suppressed(&mut self, pid: i32, channel: usize, suppressed: bool);
    fn set_pre(&mut self, pid: i32, channel: usize, v: i32);
    fn set_post(&mut self, pid: i32, channel: usize, v: i32);
    fn set_sample(&mut self, pid: i32, channel: usize, sample_idx: usize, v: i32);
}
