// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end exercises of `StreamAligner` against a `Vec`-backed
//! `EventSource`/`Event`/`Packet` fixture. Not a production file reader —
//! just enough to drive real `fill_pool`/`reconcile`/`read_event` cycles
//! with clock sequences chosen to land in each classification branch.

use std::collections::{HashMap, VecDeque};

use seb_align::alignment::{RecoveryEvent, StreamAligner};
use seb_align::clock::POOL_DEPTH;
use seb_align::event::{Event, EventSource, EventType, Packet, PacketField};
use seb_align::output::{FemStatus, OutputSink, PacketStatus};

#[derive(Clone)]
struct FixturePacket {
    id: i32,
    clock: u64,
    nr_modules: i32,
    fem_clock: Vec<i32>,
    fem_evt_nr: Vec<i32>,
}

impl Packet for FixturePacket {
    fn id(&self) -> i32 {
        self.id
    }

    fn i_value(&self, row: usize, field: PacketField) -> i32 {
        match field {
            PacketField::NrModules => self.nr_modules,
            PacketField::Channels => 0,
            PacketField::Samples => 0,
            PacketField::EvtNr => 0,
            PacketField::FemClock => self.fem_clock[row],
            PacketField::FemEvtNr => self.fem_evt_nr[row],
            PacketField::FemSlot => row as i32,
            _ => 0,
        }
    }

    fn l_value(&self, _row: usize, field: PacketField) -> u64 {
        match field {
            PacketField::Clock => self.clock,
            _ => 0,
        }
    }

    fn sample(&self, _ipmt: usize, _isamp: usize) -> i32 {
        0
    }
}

struct FixtureEvent {
    seq: u64,
    run_number: i32,
    pid: i32,
    packet: FixturePacket,
}

impl Event for FixtureEvent {
    type Packet = FixturePacket;

    fn sequence(&self) -> u64 {
        self.seq
    }

    fn event_type(&self) -> EventType {
        EventType::Data
    }

    fn run_number(&self) -> i32 {
        self.run_number
    }

    fn convert(&mut self) {}

    fn packet_ids(&self) -> Vec<i32> {
        vec![self.pid]
    }

    fn packet(&self, pid: i32) -> Option<Self::Packet> {
        (pid == self.pid).then(|| self.packet.clone())
    }
}

struct FixtureSource {
    events: VecDeque<FixtureEvent>,
}

impl EventSource for FixtureSource {
    type Event = FixtureEvent;

    fn open_next_file(&mut self) -> bool {
        false
    }

    fn next_event(&mut self) -> Option<Self::Event> {
        self.events.pop_front()
    }
}

/// A single-module packet stream: one event per clock value, trivial FEM
/// fields that never trip `fem_event_nr_clock_check`.
fn simple_source(pid: i32, run_number: i32, clocks: &[u64]) -> FixtureSource {
    let events = clocks
        .iter()
        .enumerate()
        .map(|(i, &clock)| FixtureEvent {
            seq: i as u64,
            run_number,
            pid,
            packet: FixturePacket {
                id: pid,
                clock,
                nr_modules: 1,
                fem_clock: vec![0],
                fem_evt_nr: vec![0],
            },
        })
        .collect();
    FixtureSource { events }
}

/// A three-module packet stream where every module reports the same FEM
/// clock, given independently of the packet-level `clock` field — for
/// exercising the FEM-copied-clock recovery path.
fn fem_source(pid: i32, run_number: i32, clocks: &[u64], fem_clocks: &[u64]) -> FixtureSource {
    let events = clocks
        .iter()
        .zip(fem_clocks)
        .enumerate()
        .map(|(i, (&clock, &fem))| FixtureEvent {
            seq: i as u64,
            run_number,
            pid,
            packet: FixturePacket {
                id: pid,
                clock,
                nr_modules: 3,
                fem_clock: vec![fem as i32; 3],
                fem_evt_nr: vec![i as i32; 3],
            },
        })
        .collect();
    FixtureSource { events }
}

#[derive(Default, Clone)]
struct RecordedPacket {
    status: Option<PacketStatus>,
    id: Option<i32>,
    bco: Option<u64>,
}

#[derive(Default)]
struct FixtureSink {
    records: HashMap<i32, RecordedPacket>,
}

impl FixtureSink {
    fn get(&self, pid: i32) -> &RecordedPacket {
        self.records.get(&pid).expect("pid never recorded")
    }
}

impl OutputSink for FixtureSink {
    fn reset(&mut self, pid: i32) {
        self.records.insert(pid, RecordedPacket::default());
    }
    fn set_status(&mut self, pid: i32, status: PacketStatus) {
        self.records.get_mut(&pid).unwrap().status = Some(status);
    }
    fn set_identifier(&mut self, pid: i32, id: i32) {
        self.records.get_mut(&pid).unwrap().id = Some(id);
    }
    fn set_packet_evt_sequence(&mut self, _pid: i32, _seq: i32) {}
    fn set_nr_modules(&mut self, _pid: i32, _n: i32) {}
    fn set_nr_channels(&mut self, _pid: i32, _n: i32) {}
    fn set_nr_samples(&mut self, _pid: i32, _n: i32) {}
    fn set_bco(&mut self, pid: i32, bco: u64) {
        self.records.get_mut(&pid).unwrap().bco = Some(bco);
    }
    fn set_fem_clock(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_fem_evt_sequence(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_fem_slot(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_checksum_lsb(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_checksum_msb(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_calc_checksum_lsb(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_calc_checksum_msb(&mut self, _pid: i32, _module: usize, _v: i32) {}
    fn set_fem_status(&mut self, _pid: i32, _module: usize, _status: FemStatus) {}
    fn set_suppressed(&mut self, _pid: i32, _channel: usize, _suppressed: bool) {}
    fn set_pre(&mut self, _pid: i32, _channel: usize, _v: i32) {}
    fn set_post(&mut self, _pid: i32, _channel: usize, _v: i32) {}
    fn set_sample(&mut self, _pid: i32, _channel: usize, _sample_idx: usize, _v: i32) {}
}

const GL1_PID: i32 = 1;
const SEB_PID: i32 = 100;

/// S1 — perfect alignment across a full pool and a short, partial trailing
/// pool: no ditches, no shifts, every emission `Ok`, stream ends cleanly.
#[test]
fn s1_perfect_alignment_across_two_pools() {
    let deltas = [5u64, 7, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5, 5];
    let mut clocks = vec![1000u64];
    for d in deltas {
        clocks.push(clocks.last().unwrap() + d);
    }
    assert_eq!(clocks.len(), 15);

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &clocks));
    let mut seb = StreamAligner::new(simple_source(SEB_PID, 1, &clocks));
    let mut sink = FixtureSink::default();

    // First pool: 10 events, exact match.
    assert_eq!(gl1.fill_pool(), POOL_DEPTH);
    assert_eq!(seb.fill_pool(), POOL_DEPTH);
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(seb.last_recovery().is_empty());
    for _ in 0..POOL_DEPTH {
        seb.read_event(&mut sink).unwrap();
        assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Ok));
    }

    // Second pool: only 5 events remain; the source runs dry mid-fill.
    assert_eq!(gl1.fill_pool(), 5);
    assert_eq!(seb.fill_pool(), 5);
    assert!(seb.files_done());
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(seb.last_recovery().is_empty());
    for _ in 0..5 {
        seb.read_event(&mut sink).unwrap();
        assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Ok));
    }

    assert!(seb.read_event(&mut sink).is_err());
    assert!(seb.all_done());
    assert!(!seb.event_alignment_problem());
}

/// S2 — a single corrupted SEB event straddles two diff slots (a run of
/// length 2), forgiven as intermittent corruption: the slot is ditched, not
/// rejected.
#[test]
fn s2_intermittent_corruption_ditches_one_slot() {
    let gl1_clocks: Vec<u64> = (0..POOL_DEPTH as u64).map(|i| 1000 + 5 * i).collect();
    let mut seb_clocks = gl1_clocks.clone();
    seb_clocks[3] = gl1_clocks[3] + 100;

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &gl1_clocks));
    let mut seb = StreamAligner::new(simple_source(SEB_PID, 1, &seb_clocks));
    let mut sink = FixtureSink::default();

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert_eq!(
        seb.last_recovery(),
        &[RecoveryEvent::Ditched {
            pid: SEB_PID,
            bad_indices: vec![3]
        }]
    );

    for i in 0..POOL_DEPTH {
        seb.read_event(&mut sink).unwrap();
        let expected = if i == 3 {
            PacketStatus::Dropped
        } else {
            PacketStatus::Ok
        };
        assert_eq!(sink.get(SEB_PID).status, Some(expected), "slot {i}");
    }
}

/// S3 — an isolated single-slot bad diff, not at a pool boundary: not
/// forgivable, the whole packet is rejected.
#[test]
fn s3_isolated_bad_diff_rejects() {
    let gl1_clocks: Vec<u64> = (0..POOL_DEPTH as u64).map(|i| 1000 + 5 * i).collect();
    let mut seb_clocks = gl1_clocks.clone();
    for clk in seb_clocks.iter_mut().skip(3) {
        *clk += 5;
    }

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &gl1_clocks));
    let mut seb = StreamAligner::new(simple_source(SEB_PID, 1, &seb_clocks));

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();

    assert!(seb.reconcile(&gl1_diff).is_err());
    assert!(seb.event_alignment_problem());
}

/// Drains a fully-filled pool on both aligners so the next `fill_pool` call
/// is free to start a new cycle.
fn drain_pool(gl1: &mut StreamAligner<FixtureSource>, seb: &mut StreamAligner<FixtureSource>) {
    let mut gl1_sink = FixtureSink::default();
    let mut seb_sink = FixtureSink::default();
    for _ in 0..POOL_DEPTH {
        let _ = gl1.read_event(&mut gl1_sink);
        let _ = seb.read_event(&mut seb_sink);
    }
}

/// S4 — SEB is one event ahead (a duplicated leading event repeating the
/// pool's carryover clock): detected as a -1 shift and recovered by
/// dropping SEB's extra event and pulling one fresh one.
#[test]
fn s4_shift_minus_one_recovers() {
    let warmup: Vec<u64> = (0..POOL_DEPTH as u64).map(|i| 1955 + 5 * i).collect();
    assert_eq!(*warmup.last().unwrap(), 2000);

    let gl1_deltas = [6u64, 7, 8, 9, 10, 11, 12, 13, 14, 15];
    let mut gl1_pool2 = vec![2000u64];
    for d in gl1_deltas {
        gl1_pool2.push(gl1_pool2.last().unwrap() + d);
    }
    let gl1_pool2 = gl1_pool2[1..].to_vec(); // drop the carryover seed itself

    // SEB repeats the carryover clock as an extra leading event, then
    // tracks GL1's pool-2 sequence one slot behind, plus one fresh event to
    // refill after the shift drops the duplicate.
    let mut seb_pool2 = vec![2000u64];
    seb_pool2.extend(&gl1_pool2[..9]);
    seb_pool2.push(gl1_pool2[9]);

    let mut gl1_clocks = warmup.clone();
    gl1_clocks.extend(gl1_pool2);
    let mut seb_clocks = warmup;
    seb_clocks.extend(seb_pool2);

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &gl1_clocks));
    let mut seb = StreamAligner::new(simple_source(SEB_PID, 1, &seb_clocks));

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(seb.last_recovery().is_empty());
    drain_pool(&mut gl1, &mut seb);

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert_eq!(
        seb.last_recovery(),
        &[RecoveryEvent::ShiftApplied {
            pid: SEB_PID,
            direction: -1
        }]
    );

    let mut sink = FixtureSink::default();
    for _ in 0..POOL_DEPTH {
        seb.read_event(&mut sink).unwrap();
        assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Ok));
    }
}

/// S5 — SEB's packet-level clock field is copied from an earlier
/// transmission (a known failure mode on runs in the FEM-copy range), but
/// its FEM clocks independently track GL1: recovered as a FEM clock copy,
/// not a real +1 shift, substituting the last known-good clock as BCO.
#[test]
fn s5_fem_clock_copy_recovers_without_shift() {
    const RUN_IN_COPY_RANGE: i32 = 45000;

    let warmup: Vec<u64> = (0..POOL_DEPTH as u64).map(|i| 1955 + 5 * i).collect();
    assert_eq!(*warmup.last().unwrap(), 2000);

    let gl1_deltas = [5u64, 6, 7, 8, 9, 10, 11, 12, 13, 14];
    let mut gl1_pool2 = vec![2000u64];
    for d in gl1_deltas {
        gl1_pool2.push(gl1_pool2.last().unwrap() + d);
    }
    let gl1_pool2 = gl1_pool2[1..].to_vec();

    // SEB's packet clock looks like it picked up a +1 shift (a later,
    // unrelated delta sequence)...
    let seb_deltas = [6u64, 7, 8, 9, 10, 11, 12, 13, 14, 99];
    let mut seb_pool2 = vec![2000u64];
    for d in seb_deltas {
        seb_pool2.push(seb_pool2.last().unwrap() + d);
    }
    let seb_pool2 = seb_pool2[1..].to_vec();

    let mut gl1_clocks = warmup.clone();
    gl1_clocks.extend(&gl1_pool2);
    let mut seb_clocks = warmup.clone();
    seb_clocks.extend(&seb_pool2);

    // ...but its FEM clocks genuinely track GL1's sequence throughout.
    let seb_fem_warmup = vec![0u64; POOL_DEPTH];
    let mut seb_fem = seb_fem_warmup;
    seb_fem.extend(&gl1_pool2);

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &gl1_clocks));
    let mut seb = StreamAligner::new(fem_source(SEB_PID, RUN_IN_COPY_RANGE, &seb_clocks, &seb_fem));

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(seb.last_recovery().is_empty());
    drain_pool(&mut gl1, &mut seb);

    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert_eq!(
        seb.last_recovery(),
        &[RecoveryEvent::FemClockCopyDetected { pid: SEB_PID }]
    );

    let mut sink = FixtureSink::default();

    seb.read_event(&mut sink).unwrap();
    assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Dropped));

    seb.read_event(&mut sink).unwrap();
    assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Ok));
    assert_eq!(sink.get(SEB_PID).bco, Some(seb_pool2[0]));

    seb.read_event(&mut sink).unwrap();
    assert_eq!(sink.get(SEB_PID).status, Some(PacketStatus::Ok));
    assert_eq!(sink.get(SEB_PID).bco, Some(seb_pool2[1]));
}

/// S6 — a bad diff lands on the very last slot of one pool (forgivable only
/// by itself, so it's ditched and flagged) and the next pool's first slot is
/// also bad: the carryover flag forgives it too, instead of rejecting.
#[test]
fn s6_pool_boundary_carryover_forgives_leading_slot() {
    let gl1_clocks: Vec<u64> = (0..30u64).map(|i| 1955 + 5 * i).collect();

    let mut seb_clocks = gl1_clocks[..20].to_vec();
    seb_clocks[19] = 2100; // last slot of pool 2, corrupted
    seb_clocks.extend([2109u64, 2118, 2123, 2128, 2133, 2138, 2143, 2148, 2153, 2158]);

    let mut gl1 = StreamAligner::new(simple_source(GL1_PID, 1, &gl1_clocks));
    let mut seb = StreamAligner::new(simple_source(SEB_PID, 1, &seb_clocks));
    let mut sink = FixtureSink::default();

    // Pool 1: identical, establishes a shared carryover clock.
    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(seb.last_recovery().is_empty());
    drain_pool(&mut gl1, &mut seb);

    // Pool 2: only the last diff is bad — ditched, flagged for carryover.
    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert_eq!(
        seb.last_recovery(),
        &[RecoveryEvent::Ditched {
            pid: SEB_PID,
            bad_indices: vec![9]
        }]
    );
    for i in 0..POOL_DEPTH {
        seb.read_event(&mut sink).unwrap();
        let expected = if i == 9 {
            PacketStatus::Dropped
        } else {
            PacketStatus::Ok
        };
        assert_eq!(sink.get(SEB_PID).status, Some(expected), "pool2 slot {i}");
    }

    // Pool 3: the leading diff is bad too, but forgiven by the carryover
    // flag rather than rejected.
    gl1.fill_pool();
    seb.fill_pool();
    let gl1_diff = gl1.diff_array(GL1_PID).unwrap();
    seb.reconcile(&gl1_diff).unwrap();
    assert!(!seb.event_alignment_problem());
    assert_eq!(
        seb.last_recovery(),
        &[RecoveryEvent::Ditched {
            pid: SEB_PID,
            bad_indices: vec![0]
        }]
    );
    for i in 0..POOL_DEPTH {
        seb.read_event(&mut sink).unwrap();
        let expected = if i == 0 {
            PacketStatus::Dropped
        } else {
            PacketStatus::Ok
        };
        assert_eq!(sink.get(SEB_PID).status, Some(expected), "pool3 slot {i}");
    }
}
