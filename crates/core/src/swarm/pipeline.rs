//! # Pipeline Stages
//!
//! The run state machine:
//!
//! ```text
//! Collecting → Analyzing → Synthesizing → Generating → Validating ─┬→ Done
//!                                                        ↑          │
//!                                                        └ Refining ←┘
//! (any non-terminal stage) → Failed
//! ```
//!
//! `iteration` counts completed validation rounds. A run is Done once an
//! artifact is approved or the refinement budget is spent; running out of
//! budget is Done-unapproved, never Failed.

use serde::{Deserialize, Serialize};

/// Stage of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Fetching the snapshot
    Collecting,
    /// Workers running
    Analyzing,
    /// Merging fragments
    Synthesizing,
    /// Creating artifact version 0
    Generating,
    /// Scoring the latest artifact
    Validating,
    /// Producing the next artifact version
    Refining,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Collecting => "collecting",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::Synthesizing => "synthesizing",
            PipelineStage::Generating => "generating",
            PipelineStage::Validating => "validating",
            PipelineStage::Refining => "refining",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// Whether `from → to` is an edge of the state machine
    pub fn is_legal(from: PipelineStage, to: PipelineStage) -> bool {
        use PipelineStage::*;
        match (from, to) {
            (Collecting, Analyzing)
            | (Analyzing, Synthesizing)
            | (Synthesizing, Generating)
            | (Generating, Validating)
            | (Validating, Done)
            | (Validating, Refining)
            | (Refining, Validating) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// The pipeline state machine
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Current stage
    pub stage: PipelineStage,
    /// Completed validation rounds
    pub iteration: u32,
    /// Configured refinement budget
    pub max_refinement_iterations: u32,
    /// Generator invocations so far (create + refines)
    pub generation_calls: u32,
    /// Every stage entered, in order
    history: Vec<PipelineStage>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(max_refinement_iterations: u32) -> Self {
        Self {
            stage: PipelineStage::Collecting,
            iteration: 0,
            max_refinement_iterations,
            generation_calls: 0,
            history: vec![PipelineStage::Collecting],
        }
    }

    /// Validation rounds allowed; at least one
    pub fn budget(&self) -> u32 {
        self.max_refinement_iterations.max(1)
    }

    fn enter(&mut self, next: PipelineStage) -> PipelineStage {
        debug_assert!(
            PipelineStage::is_legal(self.stage, next),
            "illegal transition {:?} -> {:?}",
            self.stage,
            next
        );
        self.stage = next;
        self.history.push(next);
        next
    }

    /// Advance along the linear part of the machine.
    ///
    /// The outcome of `Validating` is decided by [`Pipeline::on_validated`];
    /// advancing from it, or from a terminal stage, leaves the stage as is.
    pub fn advance(&mut self) -> PipelineStage {
        let next = match self.stage {
            PipelineStage::Collecting => PipelineStage::Analyzing,
            PipelineStage::Analyzing => PipelineStage::Synthesizing,
            PipelineStage::Synthesizing => PipelineStage::Generating,
            PipelineStage::Generating => PipelineStage::Validating,
            PipelineStage::Refining => PipelineStage::Validating,
            PipelineStage::Validating | PipelineStage::Done | PipelineStage::Failed => {
                return self.stage
            }
        };
        self.enter(next)
    }

    /// Close a validation round and pick Done or Refining.
    pub fn on_validated(&mut self, approved: bool) -> PipelineStage {
        if self.stage != PipelineStage::Validating {
            return self.stage;
        }
        self.iteration += 1;
        if approved || self.iteration >= self.budget() {
            self.enter(PipelineStage::Done)
        } else {
            self.enter(PipelineStage::Refining)
        }
    }

    /// Count a generator invocation
    pub fn record_generation(&mut self) {
        self.generation_calls += 1;
    }

    /// Refinements performed (generations after the first)
    pub fn refinements_used(&self) -> u32 {
        self.generation_calls.saturating_sub(1)
    }

    /// Fail the pipeline
    pub fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.enter(PipelineStage::Failed);
        }
    }

    /// Check if pipeline is complete
    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Check if pipeline succeeded
    pub fn is_success(&self) -> bool {
        self.stage == PipelineStage::Done
    }

    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }
}
