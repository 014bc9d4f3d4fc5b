// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-stream state machine: owns one SEB's (or GL1's) event deques, fills
//! pools, reconciles against GL1, and emits aligned records (spec §4.6).

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use crate::arena::{EventArena, EventHandle};
use crate::clock::{POOL_DEPTH, SENTINEL};
use crate::error::{AlignError, Result};
use crate::event::{Event, EventSource, EventType, Packet, PacketField};
use crate::output::{FemStatus, OutputSink, PacketStatus};

use super::checker::{self, Verdict};
use super::clock_pool::ClockPool;
use super::fem;

/// Runs in this range copy the packet-level CLOCK field from the first
/// transmission rather than stamping it fresh, which a naive comparison
/// against GL1 would mistake for a genuine event-level shift.
const PACKETCLK_COPY_RUN_RANGE: std::ops::Range<i32> = 44000..56079;
const FEM_HARD_MISMATCH_LOG_CAP: u32 = 1000;
const FEM_SOFT_MISMATCH_LOG_CAP: u32 = 10;

/// Recovery actions a reconciliation pass took, recorded for test
/// observability without parsing `tracing` output (spec §7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryEvent {
    Ditched { pid: i32, bad_indices: Vec<usize> },
    ShiftApplied { pid: i32, direction: i32 },
    FemClockCopyDetected { pid: i32 },
}

struct PerPacketState {
    events: VecDeque<Option<EventHandle>>,
    shift_offset: i32,
    prev_pool_last_diff_bad: bool,
    ditch: BTreeSet<usize>,
    backup_event: Option<EventHandle>,
    in_fem_copied_set: bool,
    previous_valid_bco: u64,
    clock_pool: ClockPool,
}

impl PerPacketState {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            shift_offset: 0,
            prev_pool_last_diff_bad: false,
            ditch: BTreeSet::new(),
            backup_event: None,
            in_fem_copied_set: false,
            previous_valid_bco: SENTINEL,
            clock_pool: ClockPool::new(),
        }
    }
}

/// One SEB (or the GL1) stream's pooled-alignment state machine.
pub struct StreamAligner<S: EventSource> {
    source: S,
    arena: EventArena<S::Event>,
    packets: HashMap<i32, PerPacketState>,
    packet_set: BTreeSet<i32>,
    files_done: bool,
    all_done: bool,
    event_alignment_problem: bool,
    first_call: bool,
    packetclk_copy_runs: bool,
    run_number: i32,
    fem_event_nr_set: BTreeSet<i32>,
    new_packet_diff_skip_warned: HashSet<i32>,
    fem_mismatch_log_count: u32,
    fem_soft_mismatch_log_count: u32,
    last_recovery: Vec<RecoveryEvent>,
}

impl<S: EventSource> StreamAligner<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            arena: EventArena::new(),
            packets: HashMap::new(),
            packet_set: BTreeSet::new(),
            files_done: false,
            all_done: false,
            event_alignment_problem: false,
            first_call: true,
            packetclk_copy_runs: false,
            run_number: 0,
            fem_event_nr_set: BTreeSet::new(),
            new_packet_diff_skip_warned: HashSet::new(),
            fem_mismatch_log_count: 0,
            fem_soft_mismatch_log_count: 0,
            last_recovery: Vec::new(),
        }
    }

    pub fn files_done(&self) -> bool {
        self.files_done
    }

    pub fn all_done(&self) -> bool {
        self.all_done
    }

    pub fn event_alignment_problem(&self) -> bool {
        self.event_alignment_problem
    }

    pub fn run_number(&self) -> i32 {
        self.run_number
    }

    pub fn last_recovery(&self) -> &[RecoveryEvent] {
        &self.last_recovery
    }

    /// The reference pid for this stream's diff array — for a GL1 aligner
    /// this is the single GL1 packet id; callers treat the lowest-numbered
    /// pid as canonical, mirroring the source's `map::begin()` lookup.
    pub fn reference_pid(&self) -> Option<i32> {
        self.packet_set.iter().next().copied()
    }

    /// Snapshot of one pid's diff array, for the orchestrator to hand to SEB
    /// aligners as the GL1 reference.
    pub fn diff_array(&self, pid: i32) -> Option<[u64; POOL_DEPTH]> {
        self.packets.get(&pid).map(|s| s.clock_pool.diff)
    }

    fn next_raw_event(&mut self) -> Option<S::Event> {
        loop {
            if let Some(evt) = self.source.next_event() {
                return Some(evt);
            }
            if !self.source.open_next_file() {
                return None;
            }
        }
    }

    fn clock_of(&self, handle: EventHandle, pid: i32) -> u64 {
        match self.arena.get(handle).packet(pid) {
            Some(pkt) => pkt.clock(),
            None => {
                tracing::warn!(pid, "missing packet while looking up clock");
                SENTINEL
            }
        }
    }

    /// Fill every packet's pool up to `POOL_DEPTH` events (spec §4.6.1).
    /// Returns the number of slots actually filled; `0` means the previous
    /// pool is still draining or no progress was possible this call.
    pub fn fill_pool(&mut self) -> usize {
        if self.all_done || self.event_alignment_problem || self.files_done {
            return 0;
        }
        if self.packets.values().any(|p| !p.events.is_empty()) {
            return 0;
        }

        for state in self.packets.values_mut() {
            state.clock_pool.roll_over();
        }

        let mut shifted_events: HashMap<i32, EventHandle> = HashMap::new();
        let mut i = 0usize;

        while i < POOL_DEPTH {
            let mut evt = match self.next_raw_event() {
                Some(e) => e,
                None => {
                    tracing::info!("no more input events; marking files done");
                    self.files_done = true;
                    return i;
                }
            };

            if evt.event_type() != EventType::Data {
                tracing::trace!(sequence = evt.sequence(), "dropping non-data event");
                continue;
            }
            evt.convert();

            if self.first_call {
                self.run_number = evt.run_number();
                self.packetclk_copy_runs = PACKETCLK_COPY_RUN_RANGE.contains(&self.run_number);
                for pid in evt.packet_ids() {
                    self.packet_set.insert(pid);
                    self.packets.entry(pid).or_insert_with(PerPacketState::new);
                }
                self.first_call = false;
            }

            let handle = self.arena.insert(evt);
            let pids: Vec<i32> = self.packet_set.iter().copied().collect();

            for pid in pids {
                let shift_offset = self.packets.get(&pid).map(|s| s.shift_offset).unwrap_or(0);

                let effective_handle = if shift_offset == 1 {
                    if i == 0 {
                        self.packets.get(&pid).and_then(|s| s.backup_event)
                    } else {
                        shifted_events.get(&pid).copied()
                    }
                } else {
                    Some(handle)
                };

                shifted_events.insert(pid, handle);
                if i == POOL_DEPTH - 1 && shift_offset == 1 {
                    self.packets.get_mut(&pid).unwrap().backup_event = Some(handle);
                }

                let Some(effective_handle) = effective_handle else {
                    tracing::warn!(pid, "no cached event to fill shifted slot");
                    continue;
                };

                let pkt = self.arena.get(effective_handle).packet(pid);
                let Some(pkt) = pkt else {
                    continue;
                };

                self.fill_packet_clock(pid, i, &pkt);
                self.packets
                    .get_mut(&pid)
                    .unwrap()
                    .events
                    .push_back(Some(effective_handle));
            }

            i += 1;
        }

        i
    }

    /// Record one packet's clock at `slot` (spec §4.6.2).
    fn fill_packet_clock(&mut self, pid: i32, slot: usize, pkt: &<S::Event as Event>::Packet) {
        let fem_copied = self.packetclk_copy_runs
            && self
                .packets
                .get(&pid)
                .map(|s| s.in_fem_copied_set)
                .unwrap_or(false);

        if fem_copied {
            let new_clock = if slot == 0 {
                self.packets[&pid].previous_valid_bco
            } else {
                let prev_handle = self.packets[&pid].events[slot - 1];
                match prev_handle {
                    Some(h) => self.clock_of(h, pid),
                    None => SENTINEL,
                }
            };
            self.packets
                .get_mut(&pid)
                .unwrap()
                .clock_pool
                .record(slot, new_clock);
            return;
        }

        let clock = pkt.clock();
        if clock == SENTINEL {
            tracing::warn!(pid, slot, "bad clock for packet");
            return;
        }

        let state = self.packets.get_mut(&pid).unwrap();
        if state.clock_pool.clk[slot] == SENTINEL && self.new_packet_diff_skip_warned.insert(pid) {
            tracing::info!(pid, "first pool for packet; skipping diff[0], no previous clock");
        }
        state.clock_pool.record(slot, clock);
    }

    /// Reconcile every packet's pool against `gl1_diff` and apply whatever
    /// recovery `AlignmentChecker` prescribes (spec §4.6.3).
    pub fn reconcile(&mut self, gl1_diff: &[u64; POOL_DEPTH]) -> Result<()> {
        if gl1_diff.iter().all(|&d| d == SENTINEL) {
            tracing::debug!("GL1 diffs all sentinel; nothing to check yet");
            return Ok(());
        }

        self.last_recovery.clear();

        let pids: Vec<i32> = self.packet_set.iter().copied().collect();
        for pid in pids {
            self.packets.entry(pid).or_insert_with(PerPacketState::new);
            let prev_bad = self.packets[&pid].prev_pool_last_diff_bad;
            let seb_diff = self.packets[&pid].clock_pool.diff;

            match checker::check(&seb_diff, gl1_diff, prev_bad) {
                Verdict::Aligned {
                    bad_indices,
                    current_pool_last_diff_bad,
                } => {
                    let state = self.packets.get_mut(&pid).unwrap();
                    state.prev_pool_last_diff_bad = current_pool_last_diff_bad;
                    if !bad_indices.is_empty() {
                        let err = AlignError::RecoverableCorruption {
                            pid,
                            bad_indices: bad_indices.clone(),
                        };
                        tracing::info!(error = %err, "ditching bad diff slots");
                        self.last_recovery.push(RecoveryEvent::Ditched {
                            pid,
                            bad_indices: bad_indices.clone(),
                        });
                        for idx in bad_indices {
                            state.ditch.insert(idx);
                        }
                    }
                }
                Verdict::Shift(-1) => self.apply_shift_minus_one(pid)?,
                Verdict::Shift(1) => self.apply_shift_plus_one(pid, gl1_diff)?,
                Verdict::Shift(other) => {
                    unreachable!("AlignmentChecker only emits -1/+1 shifts, got {other}")
                }
                Verdict::Reject => {
                    tracing::warn!(pid, "alignment rejected; no recovery possible");
                    self.event_alignment_problem = true;
                    return Err(AlignError::UnrecoverableAlignment { pid });
                }
            }
        }

        Ok(())
    }

    fn apply_shift_minus_one(&mut self, pid: i32) -> Result<()> {
        if self.packets[&pid].shift_offset == -1 {
            tracing::warn!(pid, "second -1 shift requested; cannot recover");
            self.event_alignment_problem = true;
            return Err(AlignError::UnrecoverableAlignment { pid });
        }

        if let Some(Some(handle)) = self.packets.get_mut(&pid).unwrap().events.pop_front() {
            self.arena.release(handle);
        }
        self.packets.get_mut(&pid).unwrap().clock_pool.shift_left();

        let mut evt = match self.next_raw_event() {
            Some(e) => e,
            None => {
                self.files_done = true;
                return Err(AlignError::InputExhausted);
            }
        };
        evt.convert();
        let handle = self.arena.insert(evt);
        if let Some(pkt) = self.arena.get(handle).packet(pid) {
            self.fill_packet_clock(pid, POOL_DEPTH - 1, &pkt);
        }
        self.packets
            .get_mut(&pid)
            .unwrap()
            .events
            .push_back(Some(handle));

        let state = self.packets.get_mut(&pid).unwrap();
        state.shift_offset -= 1;
        let err = AlignError::RecoverableShift { pid, direction: -1 };
        tracing::info!(error = %err, "applied -1 shift");
        self.last_recovery.push(RecoveryEvent::ShiftApplied { pid, direction: -1 });
        Ok(())
    }

    fn apply_shift_plus_one(&mut self, pid: i32, gl1_diff: &[u64; POOL_DEPTH]) -> Result<()> {
        if self.packetclk_copy_runs && self.try_fem_clock_copy_recovery(pid, gl1_diff) {
            return Ok(());
        }

        if self.packets[&pid].shift_offset == 1 {
            tracing::warn!(pid, "second +1 shift requested; cannot recover");
            self.event_alignment_problem = true;
            return Err(AlignError::UnrecoverableAlignment { pid });
        }

        let state = self.packets.get_mut(&pid).unwrap();
        state.clock_pool.shift_right();
        state.ditch.insert(0);

        let back = state.events.back().copied().flatten();
        state.backup_event = back;
        state.events.push_front(None);
        state.events.pop_back();
        state.shift_offset += 1;

        let err = AlignError::RecoverableShift { pid, direction: 1 };
        tracing::info!(error = %err, "applied +1 shift (dummy inserted at slot 0)");
        self.last_recovery.push(RecoveryEvent::ShiftApplied { pid, direction: 1 });
        Ok(())
    }

    /// Attempt the FEM-copied-clock recovery path (spec §4.5). Returns
    /// `true` if it succeeded and no event-level shift is needed.
    fn try_fem_clock_copy_recovery(&mut self, pid: i32, gl1_diff: &[u64; POOL_DEPTH]) -> bool {
        let handles: Vec<Option<EventHandle>> = self.packets[&pid].events.iter().copied().collect();
        if handles.len() != POOL_DEPTH {
            return false;
        }
        let Some(handles): Option<Vec<EventHandle>> = handles.into_iter().collect() else {
            return false;
        };

        let pkts: Option<Vec<_>> = handles
            .iter()
            .map(|h| self.arena.get(*h).packet(pid))
            .collect();
        let Some(pkts) = pkts else {
            return false;
        };
        let refs: Vec<&<S::Event as Event>::Packet> = pkts.iter().collect();
        let Ok(arr): std::result::Result<[&<S::Event as Event>::Packet; POOL_DEPTH], _> =
            refs.try_into()
        else {
            return false;
        };

        if !fem::fem_clock_aligned(&arr, gl1_diff) {
            tracing::info!(pid, "FEM clocks also misaligned; falling back to normal +1 shift");
            return false;
        }

        tracing::info!(pid, "FEM clocks aligned; packet clock is copied, not shifted");
        let first_handle = handles[0];
        let bco = self.clock_of(first_handle, pid);

        let state = self.packets.get_mut(&pid).unwrap();
        state.in_fem_copied_set = true;
        state.ditch.insert(0);
        state.previous_valid_bco = bco;
        let last = state.clock_pool.clk[POOL_DEPTH - 1];
        state.clock_pool.clk[POOL_DEPTH] = last;

        self.last_recovery
            .push(RecoveryEvent::FemClockCopyDetected { pid });
        true
    }

    /// Emit one aligned event per packet (spec §4.6.4).
    pub fn read_event(&mut self, sink: &mut impl OutputSink) -> Result<()> {
        if self.packets.values().any(|s| s.events.is_empty()) {
            if !self.event_alignment_problem {
                tracing::info!("a packet deque is empty; stream is done");
                self.all_done = true;
            }
            return Err(AlignError::InputExhausted);
        }

        let all_unshifted = self.packets.values().all(|s| s.shift_offset == 0);
        self.fem_event_nr_set.clear();

        let mut to_release: BTreeSet<EventHandle> = BTreeSet::new();
        let pids: Vec<i32> = self.packet_set.iter().copied().collect();

        for pid in pids {
            let shift_offset = self.packets[&pid].shift_offset;
            let front = *self.packets[&pid].events.front().unwrap();

            let handle = match front {
                None => {
                    sink.reset(pid);
                    sink.set_status(pid, PacketStatus::Dropped);
                    sink.set_identifier(pid, pid);
                    continue;
                }
                Some(handle) => handle,
            };

            let pkt = self.arena.get(handle).packet(pid);
            let Some(pkt) = pkt else {
                tracing::warn!(pid, "packet vanished from its own event");
                continue;
            };
            if pkt.id() != pid {
                tracing::error!(pid, got = pkt.id(), "packet id mismatch; aborting stream");
                self.event_alignment_problem = true;
                return Err(AlignError::UnrecoverableAlignment { pid });
            }

            sink.reset(pid);

            let ditched = self.packets[&pid].ditch.contains(&0);
            if ditched {
                sink.set_status(pid, PacketStatus::Dropped);
                sink.set_identifier(pid, pid);
            } else {
                self.emit_packet_record(pid, handle, &pkt, sink);
            }

            if all_unshifted || shift_offset == 1 {
                to_release.insert(handle);
            }
        }

        for handle in to_release {
            self.arena.release(handle);
        }

        for state in self.packets.values_mut() {
            state.ditch = state.ditch.iter().filter(|&&i| i > 0).map(|i| i - 1).collect();
            state.events.pop_front();
        }

        Ok(())
    }

    fn emit_packet_record(
        &mut self,
        pid: i32,
        handle: EventHandle,
        pkt: &<S::Event as Event>::Packet,
        sink: &mut impl OutputSink,
    ) {
        sink.set_status(pid, PacketStatus::Ok);
        sink.set_packet_evt_sequence(pid, pkt.i_value(0, PacketField::EvtNr));
        let nr_modules = pkt.i_value(0, PacketField::NrModules);
        let nr_channels = pkt.i_value(0, PacketField::Channels);
        let nr_samples = pkt.i_value(0, PacketField::Samples);
        sink.set_nr_modules(pid, nr_modules);
        sink.set_nr_channels(pid, nr_channels);
        sink.set_nr_samples(pid, nr_samples);
        sink.set_identifier(pid, pid);

        if self.packetclk_copy_runs && self.packets[&pid].in_fem_copied_set {
            let prev = self.packets[&pid].previous_valid_bco;
            sink.set_bco(pid, prev);
            let fresh = self.clock_of(handle, pid);
            self.packets.get_mut(&pid).unwrap().previous_valid_bco = fresh;
        } else {
            sink.set_bco(pid, pkt.l_value(0, PacketField::Clock));
        }

        for m in 0..nr_modules as usize {
            sink.set_fem_clock(pid, m, pkt.i_value(m, PacketField::FemClock));
            sink.set_fem_evt_sequence(pid, m, pkt.i_value(m, PacketField::FemEvtNr));
            sink.set_fem_slot(pid, m, pkt.i_value(m, PacketField::FemSlot));
            sink.set_checksum_lsb(pid, m, pkt.i_value(m, PacketField::ChecksumLsb));
            sink.set_checksum_msb(pid, m, pkt.i_value(m, PacketField::ChecksumMsb));
            sink.set_calc_checksum_lsb(pid, m, pkt.i_value(m, PacketField::CalcChecksumLsb));
            sink.set_calc_checksum_msb(pid, m, pkt.i_value(m, PacketField::CalcChecksumMsb));
            sink.set_fem_status(pid, m, FemStatus::Ok);
        }

        for c in 0..nr_channels as usize {
            let suppressed = pkt.i_value(c, PacketField::Suppressed) != 0;
            sink.set_suppressed(pid, c, suppressed);
            if suppressed {
                sink.set_pre(pid, c, pkt.i_value(c, PacketField::Pre));
                sink.set_post(pid, c, pkt.i_value(c, PacketField::Post));
            } else {
                for s in 0..nr_samples as usize {
                    sink.set_sample(pid, c, s, pkt.sample(c, s));
                }
            }
        }

        if self
            .fem_event_nr_clock_check(pid, nr_modules, pkt, sink)
            .is_err()
        {
            tracing::warn!(pid, "resetting packet record after FEM event/clock mismatch");
            sink.reset(pid);
        }
    }

    /// Cross-check per-module FEM event numbers against each other and, on
    /// disagreement, against the per-module FEM clocks (spec §4.6.5). Tags
    /// the offending module(s) `BAD_EVENTNR` on the sink: the minority module
    /// in the 2:1 soft case, every module in the hard case.
    fn fem_event_nr_clock_check(
        &mut self,
        pid: i32,
        nr_modules: i32,
        pkt: &<S::Event as Event>::Packet,
        sink: &mut impl OutputSink,
    ) -> Result<()> {
        let mut evt_nrs: Vec<i32> = Vec::with_capacity(nr_modules as usize);
        for m in 0..nr_modules as usize {
            evt_nrs.push(pkt.i_value(m, PacketField::FemEvtNr));
        }
        let distinct: BTreeSet<i32> = evt_nrs.iter().copied().collect();

        if distinct.len() <= 1 {
            if let Some(&only) = distinct.iter().next() {
                self.fem_event_nr_set.insert(only);
            }
            return Ok(());
        }

        if distinct.len() == 2 {
            // Ties broken toward the lowest event number, matching the
            // original's `std::map` + `max_element` ascending-key scan.
            let mut counts: BTreeMap<i32, usize> = BTreeMap::new();
            for &v in &evt_nrs {
                *counts.entry(v).or_insert(0) += 1;
            }
            let mut majority: Option<(i32, usize)> = None;
            for (&v, &c) in &counts {
                if majority.map_or(true, |(_, best)| c > best) {
                    majority = Some((v, c));
                }
            }
            let majority = majority.map(|(v, _)| v);

            let clocks: BTreeSet<i32> = (0..nr_modules as usize)
                .map(|m| pkt.i_value(m, PacketField::FemClock))
                .collect();

            if clocks.len() == 1 {
                if self.fem_soft_mismatch_log_count < FEM_SOFT_MISMATCH_LOG_CAP {
                    self.fem_soft_mismatch_log_count += 1;
                    let err = AlignError::FemEventMismatchSoft { pid };
                    tracing::info!(error = %err, "mismatched FEM event numbers but identical FEM clocks");
                }
                if let Some(good) = majority {
                    self.fem_event_nr_set.insert(good);
                    for (m, &v) in evt_nrs.iter().enumerate() {
                        if v != good {
                            sink.set_fem_status(pid, m, FemStatus::BadEventNr);
                        }
                    }
                }
                return Ok(());
            }
        }

        if self.fem_mismatch_log_count < FEM_HARD_MISMATCH_LOG_CAP {
            self.fem_mismatch_log_count += 1;
            tracing::warn!(pid, "FEM event-number and clock mismatch across modules");
        }
        for m in 0..nr_modules as usize {
            sink.set_fem_status(pid, m, FemStatus::BadEventNr);
        }
        Err(AlignError::FemEventMismatchHard { pid })
    }
}
