// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Drives one GL1 aligner and N SEB aligners through the fixed fill/
//! reconcile/read cycle (spec §5, §2).

use crate::alignment::StreamAligner;
use crate::clock::POOL_DEPTH;
use crate::error::{AlignError, Result};
use crate::event::EventSource;
use crate::output::OutputSink;

/// Owns the GL1 reference aligner plus every SEB aligner and runs them
/// through one cycle at a time: fill every pool, reconcile every SEB
/// against GL1, then emit one event per aligner.
pub struct Orchestrator<G: EventSource, B: EventSource> {
    gl1: StreamAligner<G>,
    sebs: Vec<StreamAligner<B>>,
}

impl<G: EventSource, B: EventSource> Orchestrator<G, B> {
    pub fn new(gl1_source: G, seb_sources: impl IntoIterator<Item = B>) -> Self {
        Self {
            gl1: StreamAligner::new(gl1_source),
            sebs: seb_sources.into_iter().map(StreamAligner::new).collect(),
        }
    }

    pub fn gl1(&self) -> &StreamAligner<G> {
        &self.gl1
    }

    pub fn sebs(&self) -> &[StreamAligner<B>] {
        &self.sebs
    }

    /// True once every aligner has stopped producing events.
    pub fn all_done(&self) -> bool {
        self.gl1.all_done() && self.sebs.iter().all(|s| s.all_done())
    }

    /// True if any aligner hit an unrecoverable alignment failure.
    pub fn has_alignment_problem(&self) -> bool {
        self.gl1.event_alignment_problem() || self.sebs.iter().any(|s| s.event_alignment_problem())
    }

    /// Run one fill/reconcile/read cycle. `sinks` must yield one
    /// `OutputSink` per SEB aligner, in the same order as `seb_sources` was
    /// given to `new`.
    pub fn run_cycle(&mut self, sinks: &mut [&mut dyn OutputSink]) -> Result<()> {
        self.gl1.fill_pool();
        for seb in &mut self.sebs {
            seb.fill_pool();
        }

        let gl1_pid = self
            .gl1
            .reference_pid()
            .ok_or(AlignError::Config("GL1 stream has no packets".into()))?;
        let gl1_diff: [u64; POOL_DEPTH] = self
            .gl1
            .diff_array(gl1_pid)
            .ok_or(AlignError::Config("GL1 diff array unavailable".into()))?;

        for seb in &mut self.sebs {
            if seb.event_alignment_problem() {
                continue;
            }
            if let Err(err) = seb.reconcile(&gl1_diff) {
                tracing::warn!(error = %err, "SEB reconciliation failed this cycle");
            }
        }

        if sinks.len() != self.sebs.len() {
            return Err(AlignError::Config(format!(
                "expected {} sinks, got {}",
                self.sebs.len(),
                sinks.len()
            )));
        }

        for (seb, sink) in self.sebs.iter_mut().zip(sinks.iter_mut()) {
            if seb.all_done() || seb.event_alignment_problem() {
                continue;
            }
            if let Err(err) = seb.read_event(*sink) {
                tracing::debug!(error = %err, "SEB read_event did not emit this cycle");
            }
        }

        Ok(())
    }
}
