// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Multi-stream clock-alignment engine for sub-event-buffer readers.
//!
//! A farm of SEB readers each carries an embedded free-running clock; a
//! separate GL1 stream carries the trigger/time reference. This crate
//! detects drift, drops, duplicates, or corruption in a SEB relative to
//! GL1 and emits one coherent aligned event sequence per packet id.

pub mod alignment;
pub mod arena;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod orchestrator;
pub mod output;
