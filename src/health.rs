//! Health checks over the early part of a run.
//!
//! The observer watches executions until enough valid examples have been
//! seen to be confident generation is working, and reports a diagnostic
//! when it is clearly not: everything is being filtered out, examples are
//! too large, or generation is too slow. It never changes how an execution
//! is classified.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::data::{ConjectureResult, InterestingOrigin, Status};
use crate::settings::{HealthCheck, Settings};

/// Valid examples after which the checks stop.
const VALID_EXAMPLES_NEEDED: usize = 10;

const MAX_INVALID: usize = 50;

const MAX_OVERRUN: usize = 20;

const MAX_DRAW_TIME: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthDiagnostic {
    pub check: HealthCheck,
    pub message: String,
}

impl HealthDiagnostic {
    fn new(check: HealthCheck, message: impl Into<String>) -> Self {
        HealthDiagnostic { check, message: message.into() }
    }
}

impl fmt::Display for HealthDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check, self.message)
    }
}

#[derive(Debug, Clone)]
pub struct HealthObserver {
    suppressed: BTreeSet<HealthCheck>,
    max_choices: usize,
    valid: usize,
    invalid: usize,
    overrun: usize,
    draw_time: Duration,
    finished: bool,
    warnings: Vec<HealthDiagnostic>,
}

impl HealthObserver {
    pub fn new(settings: &Settings) -> Self {
        HealthObserver {
            suppressed: settings.suppress_health_check.clone(),
            max_choices: settings.max_choices,
            valid: 0,
            invalid: 0,
            overrun: 0,
            draw_time: Duration::ZERO,
            finished: false,
            warnings: Vec::new(),
        }
    }

    fn fail(&self, diagnostic: HealthDiagnostic) -> Result<(), HealthDiagnostic> {
        if self.suppressed.contains(&diagnostic.check) {
            log::debug!("suppressed health check {}", diagnostic);
            Ok(())
        } else {
            Err(diagnostic)
        }
    }

    /// Check the execution made entirely of simplest choices.
    pub fn check_base_example(&mut self, result: &ConjectureResult) -> Result<(), HealthDiagnostic> {
        let too_large = match result.status {
            Status::Overrun => true,
            Status::Interesting(_) => false,
            _ => result.len() > self.max_choices / 2,
        };
        if !too_large {
            return Ok(());
        }
        self.fail(HealthDiagnostic::new(
            HealthCheck::LargeBaseExample,
            format!(
                "the smallest natural example needs {} choices ({}) against a budget of {}; \
                 data generation is likely to be slow and mostly overrun",
                result.len(),
                result.status,
                self.max_choices
            ),
        ))
    }

    /// Account for one generated execution.
    pub fn observe(&mut self, result: &ConjectureResult) -> Result<(), HealthDiagnostic> {
        if self.finished {
            return Ok(());
        }
        match &result.status {
            Status::Valid => {
                self.valid += 1;
                self.draw_time += result.draw_time;
            }
            Status::Invalid => self.invalid += 1,
            // Overruns forced by the novelty index say nothing about the test.
            Status::Overrun if !result.rejected_by_tree => self.overrun += 1,
            Status::Overrun | Status::Flaky => {}
            Status::Interesting(_) => {
                // A real failure is more useful than a diagnostic.
                self.finished = true;
                return Ok(());
            }
        }

        if self.draw_time > MAX_DRAW_TIME {
            return self.fail(HealthDiagnostic::new(
                HealthCheck::TooSlow,
                format!(
                    "generating {} valid examples took {:.2}s of drawing",
                    self.valid,
                    self.draw_time.as_secs_f64()
                ),
            ));
        }
        if self.valid >= VALID_EXAMPLES_NEEDED {
            self.finished = true;
            return Ok(());
        }
        if self.invalid >= MAX_INVALID {
            return self.fail(HealthDiagnostic::new(
                HealthCheck::FilterTooMuch,
                format!(
                    "only {} valid examples out of {} executions; too many were rejected by assume or mark_invalid",
                    self.valid,
                    self.valid + self.invalid + self.overrun
                ),
            ));
        }
        if self.overrun >= MAX_OVERRUN {
            return self.fail(HealthDiagnostic::new(
                HealthCheck::DataTooLarge,
                format!(
                    "{} executions ran past the budget of {} choices before {} valid examples were found",
                    self.overrun, self.max_choices, VALID_EXAMPLES_NEEDED
                ),
            ));
        }
        Ok(())
    }

    /// Note that a failure attributed to the deadline did not reproduce the
    /// same way. This only ever warns.
    pub fn deadline_flaky(&mut self, origin: &InterestingOrigin, detail: impl fmt::Display) {
        if self.suppressed.contains(&HealthCheck::DeadlineFlaky) {
            return;
        }
        let diagnostic = HealthDiagnostic::new(
            HealthCheck::DeadlineFlaky,
            format!("{} did not reproduce consistently: {}; test timings are unreliable", origin, detail),
        );
        log::warn!("{}", diagnostic);
        if !self.warnings.contains(&diagnostic) {
            self.warnings.push(diagnostic);
        }
    }

    /// Compare the runtime of a replay with the first run of the same input.
    pub fn compare_runtimes(&mut self, origin: &InterestingOrigin, first: Duration, replay: Duration) {
        let (low, high) = if first < replay { (first, replay) } else { (replay, first) };
        if high > low * 2 && high - low > Duration::from_millis(10) {
            self.deadline_flaky(
                origin,
                format!("runtime changed from {:?} to {:?} between runs", first, replay),
            );
        }
    }

    pub fn warnings(&self) -> &[HealthDiagnostic] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<HealthDiagnostic> {
        self.warnings
    }
}
