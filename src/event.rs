// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! External interfaces the engine consumes: `EventSource`, `Event`, `Packet`.
//!
//! Raw file location resolution and raw-event iteration live outside this
//! crate; these traits are the seam. The original collaborator looked these
//! fields up with stringly-typed keys (`iValue(row, "CLOCK")`); here the keys
//! are validated once, at compile time, as `PacketField` variants instead.

use crate::clock::CLOCK_MASK;

/// Distinguishes real data events from control/other events. Non-data
/// events are dropped by `StreamAligner::fill_pool` without consuming a
/// pool slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Data,
    Other,
}

/// Typed accessor keys for the per-module / per-channel packet fields.
/// Mirrors the original's `iValue`/`lValue` string-keyed lookups, validated
/// once here instead of at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketField {
    Clock,
    EvtNr,
    NrModules,
    Channels,
    Samples,
    DetId,
    ModuleAddress,
    FemClock,
    FemEvtNr,
    FemSlot,
    ChecksumLsb,
    ChecksumMsb,
    CalcChecksumLsb,
    CalcChecksumMsb,
    Suppressed,
    Pre,
    Post,
}

/// A per-detector subcomponent of an `Event`.
///
/// `row` indexes a module or channel depending on the field; `iValue`/
/// `lValue` in the source took a string key, here it's a `PacketField`.
pub trait Packet {
    fn id(&self) -> i32;

    /// Integer-valued field lookup (module/channel-indexed fields).
    fn i_value(&self, row: usize, field: PacketField) -> i32;

    /// 64-bit field lookup (only `Clock` is defined to use this width).
    fn l_value(&self, row: usize, field: PacketField) -> u64;

    /// Waveform sample at channel `ipmt`, sample index `isamp`.
    fn sample(&self, ipmt: usize, isamp: usize) -> i32;

    /// `lValue(0, "CLOCK") & CLOCK_MASK`.
    fn clock(&self) -> u64 {
        self.l_value(0, PacketField::Clock) & CLOCK_MASK
    }
}

/// An opaque raw event produced by an `EventSource`.
pub trait Event {
    type Packet: Packet;

    fn sequence(&self) -> u64;
    fn event_type(&self) -> EventType;
    fn run_number(&self) -> i32;

    /// Unpack wire fields into the in-memory representation. Called once
    /// per event, before any packet is extracted.
    fn convert(&mut self);

    /// Packet identifiers carried by this event.
    fn packet_ids(&self) -> Vec<i32>;

    /// Extract packet `pid`, if present.
    fn packet(&self, pid: i32) -> Option<Self::Packet>;
}

/// Collaborator that yields raw events from a sequence of input files.
///
/// Raw file location resolution is out of scope for this crate; an
/// `EventSource` implementation owns that entirely.
pub trait EventSource {
    type Event: Event;

    /// Advance to the next input file. Returns `false` if none remain.
    fn open_next_file(&mut self) -> bool;

    /// Produce the next event from the current file. `None` means the
    /// current file is exhausted; the caller must `open_next_file` and
    /// retry.
    fn next_event(&mut self) -> Option<Self::Event>;
}
