//! # Run Metrics
//!
//! Wall-clock time per stage plus the counters a run reports at the end.
//! A stage entered more than once (validating, refining) accumulates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;

use super::pipeline::PipelineStage;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunMetrics {
    /// stage -> accumulated milliseconds
    pub stage_durations_ms: BTreeMap<String, u64>,
    pub total_ms: u64,
    pub refinement_iterations: u32,
    pub generation_calls: u32,
    pub validation_rounds: u32,
    pub backend_calls: u32,
    pub degraded_workers: u32,
}

/// Stopwatch that follows the pipeline from stage to stage
#[derive(Debug)]
pub struct StageClock {
    started: Instant,
    current: Option<(PipelineStage, Instant)>,
    durations: BTreeMap<String, u64>,
}

impl StageClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            current: None,
            durations: BTreeMap::new(),
        }
    }

    /// Close the running stage and start timing `stage`
    pub fn enter(&mut self, stage: PipelineStage) {
        self.close();
        if !stage.is_terminal() {
            self.current = Some((stage, Instant::now()));
        }
    }

    fn close(&mut self) {
        if let Some((stage, since)) = self.current.take() {
            *self.durations.entry(stage.as_str().to_string()).or_default() +=
                since.elapsed().as_millis() as u64;
        }
    }

    /// Stop the clock; returns per-stage and total milliseconds
    pub fn finish(mut self) -> (BTreeMap<String, u64>, u64) {
        self.close();
        (self.durations, self.started.elapsed().as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_stages_accumulate() {
        let mut clock = StageClock::start();
        clock.enter(PipelineStage::Collecting);
        clock.enter(PipelineStage::Validating);
        clock.enter(PipelineStage::Refining);
        clock.enter(PipelineStage::Validating);
        clock.enter(PipelineStage::Done);
        let (durations, total) = clock.finish();

        let keys: Vec<&str> = durations.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["collecting", "refining", "validating"]);
        assert!(durations.values().sum::<u64>() <= total);
    }

    #[test]
    fn test_finish_closes_open_stage() {
        let mut clock = StageClock::start();
        clock.enter(PipelineStage::Analyzing);
        let (durations, _) = clock.finish();
        assert!(durations.contains_key("analyzing"));
    }
}
