// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! FEM-module-level clock check used to distinguish a packet-clock-copy
//! anomaly from a genuine event-level shift (spec §4.5).
//!
//! Invoked only on `packetclk_copy_runs` streams, and only after
//! `AlignmentChecker` has already returned `Shift(1)` for a packet — it
//! answers a narrower question than the checker does: is the FEM's own
//! clock, independent of the packet-level CLOCK field suspected of being
//! copied, still tracking GL1?

use std::collections::BTreeMap;

use crate::clock::{clock_diff, POOL_DEPTH, SENTINEL};
use crate::event::{Packet, PacketField};

const FEM_CLOCK_MASK: u64 = 0xFFFF;

/// One pool's worth of per-slot packets for a single pid, in pool order.
pub fn fem_clock_aligned<P: Packet>(events: &[&P; POOL_DEPTH], gl1_diff: &[u64; POOL_DEPTH]) -> bool {
    let mut prev_clk = SENTINEL;

    for (i, pkt) in events.iter().enumerate() {
        let nmod = pkt.i_value(0, PacketField::NrModules) as usize;
        let mut counts: BTreeMap<u64, usize> = BTreeMap::new();
        for j in 0..nmod {
            let fem_clk = (pkt.i_value(j, PacketField::FemClock) as u64) & FEM_CLOCK_MASK;
            *counts.entry(fem_clk).or_insert(0) += 1;
        }

        // Ties broken toward the lowest clock value, same as the original's
        // `std::map` + `max_element` (ascending key order, first max wins).
        let mut majority: Option<(u64, usize)> = None;
        for (&clk, &count) in &counts {
            if majority.map_or(true, |(_, best)| count > best) {
                majority = Some((clk, count));
            }
        }
        let Some((majority_clk, majority_count)) = majority else {
            continue;
        };

        if majority_count < 2 {
            tracing::debug!(pool_index = i, "no majority FEM clock for packet");
            return false;
        }

        if i >= 1 && prev_clk != SENTINEL && gl1_diff[i] != SENTINEL {
            let fem_diff = clock_diff(majority_clk, prev_clk) & FEM_CLOCK_MASK;
            let gl1_low = gl1_diff[i] & FEM_CLOCK_MASK;
            if fem_diff != gl1_low {
                return false;
            }
        }

        prev_clk = majority_clk;
    }

    true
}
