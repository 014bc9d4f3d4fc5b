// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Compares a SEB's diff array against the GL1 reference diff array and
//! classifies the mismatch, if any (spec §4.4).
//!
//! Intermittent corruption within a pool shows up as a run of adjacent bad
//! diffs — a single bad event corrupts the two diffs straddling it, so an
//! isolated interior bad diff can't be explained by single-event corruption
//! and signals something worse. Runs touching slot 0 are forgiven only when
//! the previous pool flagged its own last slot bad (continuation across the
//! pool boundary).

use crate::clock::{POOL_DEPTH, SENTINEL};

/// Outcome of comparing one packet's diff array against GL1's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Exact match or tolerable intermittent corruption. `bad_indices` are
    /// the slots whose emitted event must be ditched.
    Aligned {
        bad_indices: Vec<usize>,
        current_pool_last_diff_bad: bool,
    },
    /// Systemic off-by-one; `-1` or `+1`.
    Shift(i32),
    /// No recovery is possible; the stream must stop.
    Reject,
}

/// Compare `seb_diff` against `gl1_diff`. `prev_pool_last_diff_bad` carries
/// forward whether the previous pool's slot 9 was flagged bad, so a run
/// starting at slot 0 in this pool can be recognized as its continuation.
pub fn check(
    seb_diff: &[u64; POOL_DEPTH],
    gl1_diff: &[u64; POOL_DEPTH],
    prev_pool_last_diff_bad: bool,
) -> Verdict {
    if seb_diff == gl1_diff {
        return Verdict::Aligned {
            bad_indices: Vec::new(),
            current_pool_last_diff_bad: false,
        };
    }

    let bad_diff_indices: Vec<usize> = (0..POOL_DEPTH)
        .filter(|&i| seb_diff[i] != gl1_diff[i])
        .collect();

    if bad_diff_indices.len() < 5 {
        match classify_runs(&bad_diff_indices, prev_pool_last_diff_bad) {
            Some(outcome) => return outcome,
            None => return Verdict::Reject,
        }
    }

    shift_test(seb_diff, gl1_diff)
}

/// Split `bad_diff_indices` into maximal consecutive runs and classify each
/// per spec §4.4 step 4. Returns `None` on any rejecting run; otherwise the
/// final `Aligned` verdict (after the step-5 count check).
fn classify_runs(bad_diff_indices: &[usize], prev_pool_last_diff_bad: bool) -> Option<Verdict> {
    let mut bad_indices = Vec::new();
    let mut current_pool_last_diff_bad = false;

    let mut idx = 0;
    while idx < bad_diff_indices.len() {
        let start = bad_diff_indices[idx];
        let mut end = start;
        while idx + 1 < bad_diff_indices.len() && bad_diff_indices[idx + 1] == end + 1 {
            idx += 1;
            end = bad_diff_indices[idx];
        }
        let length = end - start + 1;

        if length == 0 || length >= 5 {
            return None;
        }

        if start == POOL_DEPTH - 1 {
            bad_indices.push(POOL_DEPTH - 1);
            current_pool_last_diff_bad = true;
        } else if start == 0 {
            if prev_pool_last_diff_bad {
                bad_indices.extend(start..end);
            } else if length == 1 {
                return None;
            } else {
                bad_indices.extend(start..end);
            }
        } else {
            // 0 < start < POOL_DEPTH - 1
            if length == 1 {
                return None;
            }
            bad_indices.extend(start..end);
        }

        idx += 1;
    }

    if bad_indices.is_empty() || bad_indices.len() >= 4 {
        return None;
    }

    Some(Verdict::Aligned {
        bad_indices,
        current_pool_last_diff_bad,
    })
}

/// Shift-detection phase, reached only when the intermittent-corruption
/// branch escaped via the `|bad| >= 5` threshold.
fn shift_test(seb_diff: &[u64; POOL_DEPTH], gl1_diff: &[u64; POOL_DEPTH]) -> Verdict {
    let first_pool = gl1_diff[0] == SENTINEL;

    let start = if first_pool { 2 } else { 1 };
    if (start..POOL_DEPTH).all(|i| seb_diff[i] == gl1_diff[i - 1]) {
        return Verdict::Shift(-1);
    }

    let start = if first_pool { 1 } else { 0 };
    if (start..POOL_DEPTH - 1).all(|i| seb_diff[i] == gl1_diff[i + 1]) {
        return Verdict::Shift(1);
    }

    Verdict::Reject
}
