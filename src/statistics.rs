//! Run statistics, collected by the runner and exported as JSON.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::data::{ConjectureResult, Status};
use crate::settings::Phase;

/// Counts for one phase of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseStatistics {
    pub test_cases: usize,
    pub valid: usize,
    pub invalid: usize,
    pub overrun: usize,
    pub interesting: usize,
    /// Failures first seen during this phase.
    pub distinct_failures: usize,
    pub shrinks_successful: usize,
    pub duration_secs: f64,
}

/// Execution time percentiles in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimePercentiles {
    pub p5_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub max_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub phases: BTreeMap<Phase, PhaseStatistics>,
    /// How many test cases reported each event label.
    pub events: BTreeMap<String, usize>,
    /// Best score seen for each target label.
    pub targets: BTreeMap<String, f64>,
    pub runtimes: Option<RuntimePercentiles>,
    pub stopped_because: Option<String>,
    #[serde(skip)]
    samples: Vec<Duration>,
}

/// The sample at `fraction` of the way through `sorted`, or `None` when
/// there are no samples.
fn percentile(sorted: &[Duration], fraction: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let index = (last as f64 * fraction).round() as usize;
    Some(sorted[index.min(last)].as_secs_f64() * 1000.0)
}

fn runtime_percentiles(sorted: &[Duration]) -> Option<RuntimePercentiles> {
    Some(RuntimePercentiles {
        p5_ms: percentile(sorted, 0.05)?,
        p50_ms: percentile(sorted, 0.5)?,
        p95_ms: percentile(sorted, 0.95)?,
        max_ms: percentile(sorted, 1.0)?,
    })
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn phase_mut(&mut self, phase: Phase) -> &mut PhaseStatistics {
        self.phases.entry(phase).or_default()
    }

    /// Account for one execution that actually ran.
    pub fn record(&mut self, phase: Phase, result: &ConjectureResult) {
        let stats = self.phase_mut(phase);
        stats.test_cases += 1;
        match result.status {
            Status::Valid => stats.valid += 1,
            Status::Invalid => stats.invalid += 1,
            Status::Overrun => stats.overrun += 1,
            Status::Interesting(_) => stats.interesting += 1,
            Status::Flaky => {}
        }
        for event in &result.events {
            *self.events.entry(event.clone()).or_default() += 1;
        }
        for (label, &score) in &result.target_observations {
            let best = self.targets.entry(label.clone()).or_insert(score);
            if score > *best {
                *best = score;
            }
        }
        self.samples.push(result.runtime);
    }

    pub fn record_new_failure(&mut self, phase: Phase) {
        self.phase_mut(phase).distinct_failures += 1;
    }

    pub fn record_shrinks(&mut self, shrinks: usize) {
        self.phase_mut(Phase::Shrink).shrinks_successful += shrinks;
    }

    pub fn record_duration(&mut self, phase: Phase, duration: Duration) {
        self.phase_mut(phase).duration_secs += duration.as_secs_f64();
    }

    pub fn test_cases(&self) -> usize {
        self.phases.values().map(|phase| phase.test_cases).sum()
    }

    /// Close the statistics for this run.
    pub fn finish(&mut self, stopped_because: impl Into<String>) {
        self.stopped_because = Some(stopped_because.into());
        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        self.runtimes = runtime_percentiles(&sorted);
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ConjectureData;

    fn result(status: Status, millis: u64) -> ConjectureResult {
        let mut data = ConjectureData::for_choices(&[]);
        data.event("seen");
        data.target("score", millis as f64);
        let mut result = data.freeze();
        result.status = status;
        result.runtime = Duration::from_millis(millis);
        result
    }

    #[test]
    fn percentile_of_nothing_is_none() {
        assert_eq!(percentile(&[], 0.5), None);
        let samples = [Duration::from_millis(1), Duration::from_millis(2), Duration::from_millis(9)];
        assert_eq!(percentile(&samples, 0.0), Some(1.0));
        assert_eq!(percentile(&samples, 0.5), Some(2.0));
        assert_eq!(percentile(&samples, 1.0), Some(9.0));
    }

    #[test]
    fn finishing_without_samples_has_no_runtimes() {
        let mut stats = Statistics::new();
        stats.finish("nothing ran");
        assert_eq!(stats.runtimes, None);
        assert_eq!(stats.stopped_because.as_deref(), Some("nothing ran"));
    }

    #[test]
    fn counts_by_phase_and_status() {
        let mut stats = Statistics::new();
        stats.record(Phase::Generate, &result(Status::Valid, 1));
        stats.record(Phase::Generate, &result(Status::Invalid, 2));
        stats.record(Phase::Shrink, &result(Status::Valid, 3));
        stats.record_shrinks(4);
        assert_eq!(stats.phases[&Phase::Generate].test_cases, 2);
        assert_eq!(stats.phases[&Phase::Generate].invalid, 1);
        assert_eq!(stats.phases[&Phase::Shrink].shrinks_successful, 4);
        assert_eq!(stats.test_cases(), 3);
        assert_eq!(stats.events["seen"], 3);
        assert_eq!(stats.targets["score"], 3.0);
    }

    #[test]
    fn exports_json() {
        let mut stats = Statistics::new();
        for millis in 1..=100 {
            stats.record(Phase::Generate, &result(Status::Valid, millis));
        }
        stats.finish("max_examples reached");
        let runtimes = stats.runtimes.clone().unwrap();
        assert!(runtimes.p5_ms < runtimes.p50_ms && runtimes.p50_ms < runtimes.p95_ms);
        assert_eq!(runtimes.max_ms, 100.0);

        let json = stats.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["phases"]["generate"]["test_cases"], 100);
        assert_eq!(value["stopped_because"], "max_examples reached");
    }
}
