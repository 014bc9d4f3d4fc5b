// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

use thiserror::Error;

/// Errors the alignment engine can surface.
///
/// Most variants are not fatal by themselves — the `StreamAligner` state
/// flags (`event_alignment_problem`, `files_done`, `all_done`) absorb
/// recoverable cases without unwinding the call stack. These variants exist
/// so recovery decisions can be logged and tested precisely instead of
/// inferred from `bool`/sentinel return values.
#[derive(Debug, Error)]
pub enum AlignError {
    #[error("packet {pid}: intermittent corruption at indices {bad_indices:?}")]
    RecoverableCorruption { pid: i32, bad_indices: Vec<usize> },

    #[error("packet {pid}: recoverable shift by {direction:+}")]
    RecoverableShift { pid: i32, direction: i32 },

    #[error("packet {pid}: unrecoverable alignment failure")]
    UnrecoverableAlignment { pid: i32 },

    #[error("event source exhausted")]
    InputExhausted,

    #[error("packet {pid}: FEM event-number mismatch (2:1 split, clocks agree)")]
    FemEventMismatchSoft { pid: i32 },

    #[error("packet {pid}: FEM event-number and clock mismatch")]
    FemEventMismatchHard { pid: i32 },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AlignError>;
