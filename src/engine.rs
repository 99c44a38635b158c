// This file is part of the Hypothesis Conjecture Rust implementation.
//
// Copyright (C) 2025 Hypothesis Contributors
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The run orchestrator.
//!
//! [`ConjectureRunner`] owns everything that lives for one run of one test:
//! the novelty tree, the execution cache, the failures found so far and the
//! database handle. It drives the phases in order:
//!
//! 1. **Reuse** replays examples saved by earlier runs.
//! 2. **Generate** runs the base example and then novel prefixes from the tree.
//! 3. **Target** hill-climbs any scores the test reports.
//! 4. **Shrink** reduces every failure it will report.
//! 5. **Explain** finds spans of the minimal failures that can vary freely.
//!
//! Each phase can be disabled in [`Settings`]. Every execution goes through
//! [`ConjectureRunner::process`], which records it in the tree (detecting
//! flaky tests), the statistics, the health observer and, for failures, the
//! database.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use thiserror::Error;

use crate::cache::LruCache;
use crate::choice::{ChoiceValue, InvalidArgument};
use crate::data::{ConjectureData, ConjectureResult, InterestingOrigin, Span, Status};
use crate::database::{
    choices_from_bytes, choices_to_bytes, evict_excess, BackgroundDatabase, DatabaseError, DatabaseKey,
    DatabaseResult, DirectoryDatabase, ExampleDatabase, InMemoryDatabase, ReadOnlyDatabase, PARETO, SECONDARY,
};
use crate::datatree::{DataTree, FlakyReplay};
use crate::execution::{execute, TestResult};
use crate::health::{HealthDiagnostic, HealthObserver};
use crate::optimiser::Optimiser;
use crate::providers::{HypothesisProvider, PrimitiveProvider, ProviderRegistry, SimplestProvider};
use crate::settings::{DatabaseSetting, Phase, Settings, DEFAULT_DATABASE_DIR};
use crate::shrinker::{ShrinkConfig, ShrinkExit, Shrinker};
use crate::statistics::Statistics;

/// Invalid or overrun test cases allowed per requested example.
const INVALID_PER_EXAMPLE: usize = 10;

const CACHE_CAPACITY: usize = 10_000;

/// Minimum number of saved examples replayed before secondary ones are used.
const MIN_REUSE: usize = 2;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    #[error("unable to satisfy assumptions: {valid} valid examples in {calls} test cases")]
    Unsatisfiable { calls: usize, valid: usize },

    #[error("flaky test: {0}")]
    Flaky(String),

    #[error("failed health check {0}")]
    FailedHealthCheck(HealthDiagnostic),

    #[error("example database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Why the run stopped looking for new examples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Generated the requested number of valid examples.
    MaxExamples,
    /// Too many invalid or overrun test cases.
    MaxIterations,
    /// Every possible choice sequence has been tried.
    SearchExhausted,
    /// A failure was found and the extra search for others is over.
    FailureFound,
    GenerateTimeLimit,
    MaxShrinks,
    ShrinkTimeLimit,
    Flaky,
    /// No phase that could stop early ran.
    Finished,
}

impl ExitReason {
    pub fn description(&self, settings: &Settings) -> String {
        match self {
            ExitReason::MaxExamples => format!("max_examples={}", settings.max_examples),
            ExitReason::MaxIterations => format!(
                "max_examples={}, but too few examples satisfied assumptions",
                settings.max_examples
            ),
            ExitReason::SearchExhausted => "every possible example was tried".to_string(),
            ExitReason::FailureFound => "found a failing example".to_string(),
            ExitReason::GenerateTimeLimit => "generation time limit reached".to_string(),
            ExitReason::MaxShrinks => format!("shrunk example {} times", settings.max_shrinks),
            ExitReason::ShrinkTimeLimit => format!("shrinking took longer than {:?}", settings.max_shrink_time),
            ExitReason::Flaky => "test was flaky".to_string(),
            ExitReason::Finished => "nothing left to do".to_string(),
        }
    }
}

/// A span of a minimal failure whose contents do not matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FreeSpan {
    pub label: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct FailureReport {
    pub origin: InterestingOrigin,
    /// The minimal failing choice sequence.
    pub choices: Vec<ChoiceValue>,
    pub notes: Vec<String>,
    /// Shrinking stopped on a budget rather than at a fixed point.
    pub possibly_non_minimal: bool,
    pub free_spans: Vec<FreeSpan>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Falsifying example ({}): [", self.origin)?;
        for (i, value) in self.choices.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")?;
        for note in &self.notes {
            write!(f, "\n  {}", note)?;
        }
        for span in &self.free_spans {
            write!(f, "\n  choices {}..{} ({}) can be anything", span.start, span.end, span.label)?;
        }
        if self.possibly_non_minimal {
            write!(f, "\n  (shrinking stopped early; this example may not be minimal)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// One entry per distinct failure, ordered by origin.
    pub failures: Vec<FailureReport>,
    pub statistics: Statistics,
    /// Warnings that did not stop the run.
    pub health: Vec<HealthDiagnostic>,
    pub exit_reason: ExitReason,
}

impl RunReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failure(&self, origin: &InterestingOrigin) -> Option<&FailureReport> {
        self.failures.iter().find(|failure| &failure.origin == origin)
    }
}

/// Stand-in for an execution whose status is already known.
fn simulated(status: Status) -> ConjectureResult {
    let mut result = ConjectureData::for_choices(&[]).freeze();
    result.status = status;
    result
}

fn open_database(setting: &DatabaseSetting) -> DatabaseResult<Option<Box<dyn ExampleDatabase>>> {
    let database: Box<dyn ExampleDatabase> = match setting {
        DatabaseSetting::Default => Box::new(BackgroundDatabase::new(DirectoryDatabase::new(DEFAULT_DATABASE_DIR)?)?),
        DatabaseSetting::Directory(path) => Box::new(BackgroundDatabase::new(DirectoryDatabase::new(path)?)?),
        DatabaseSetting::InMemory => Box::new(InMemoryDatabase::new()),
        DatabaseSetting::None => return Ok(None),
    };
    Ok(Some(database))
}

/// Order saved examples smallest first.
fn shortlex(mut entries: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    entries.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    entries
}

pub struct ConjectureRunner<F>
where
    F: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    settings: Settings,
    test: F,
    key: DatabaseKey,
    database: Option<Box<dyn ExampleDatabase>>,
    registry: ProviderRegistry,
    tree: DataTree,
    cache: LruCache<Vec<ChoiceValue>, ConjectureResult>,
    rng: ChaCha8Rng,
    prefix_provider: Box<dyn PrimitiveProvider>,
    phase: Phase,
    health: HealthObserver,
    statistics: Statistics,
    interesting: BTreeMap<InterestingOrigin, ConjectureResult>,
    best_targets: BTreeMap<String, ConjectureResult>,
    possibly_non_minimal: BTreeSet<InterestingOrigin>,
    free_spans: BTreeMap<InterestingOrigin, Vec<FreeSpan>>,
    first_failure_at: Option<usize>,
    call_count: usize,
    valid_examples: usize,
    invalid_examples: usize,
    overrun_examples: usize,
    exact_deadline: bool,
    exit_reason: Option<ExitReason>,
}

impl<F> ConjectureRunner<F>
where
    F: FnMut(&mut ConjectureData<'_>) -> TestResult,
{
    /// A runner for the test identified by `name`, using the built-in backends.
    pub fn new(name: &str, test: F, settings: Settings) -> EngineResult<Self> {
        Self::with_registry(name, test, settings, ProviderRegistry::builtin())
    }

    pub fn with_registry(name: &str, test: F, settings: Settings, registry: ProviderRegistry) -> EngineResult<Self> {
        settings.validate()?;
        let key = DatabaseKey::for_test(name, b"");
        let seed = match (settings.seed, settings.derandomize) {
            (Some(seed), _) => seed,
            (None, true) => key.seed(),
            (None, false) => rand::random(),
        };
        let prefix_provider = registry.create(&settings.backend, seed)?;
        let database = open_database(&settings.database)?;
        log::debug!("runner for {:?}: seed {}, backend {}, database {:?}", name, seed, settings.backend, database);

        let mut runner = ConjectureRunner {
            health: HealthObserver::new(&settings),
            settings,
            test,
            key,
            database: None,
            registry,
            tree: DataTree::new(),
            cache: LruCache::new(CACHE_CAPACITY),
            rng: ChaCha8Rng::seed_from_u64(seed),
            prefix_provider,
            phase: Phase::Reuse,
            statistics: Statistics::new(),
            interesting: BTreeMap::new(),
            best_targets: BTreeMap::new(),
            possibly_non_minimal: BTreeSet::new(),
            free_spans: BTreeMap::new(),
            first_failure_at: None,
            call_count: 0,
            valid_examples: 0,
            invalid_examples: 0,
            overrun_examples: 0,
            exact_deadline: false,
            exit_reason: None,
        };
        runner.set_database(database);
        Ok(runner)
    }

    /// Use `database` instead of the one named in the settings.
    pub fn with_database(mut self, database: Option<Box<dyn ExampleDatabase>>) -> Self {
        self.set_database(database);
        self
    }

    fn set_database(&mut self, database: Option<Box<dyn ExampleDatabase>>) {
        // Derandomized runs must not change what later runs will see.
        self.database = match database {
            Some(db) if self.settings.derandomize => Some(Box::new(ReadOnlyDatabase::new(db))),
            other => other,
        };
    }

    pub fn database_key(&self) -> &DatabaseKey {
        &self.key
    }

    pub fn call_count(&self) -> usize {
        self.call_count
    }

    /// Run every enabled phase and report what was found.
    pub fn run(mut self) -> EngineResult<RunReport> {
        log::info!("starting run for {}", self.key);
        let outcome = self.run_phases();
        if let Some(db) = self.database.as_mut() {
            if let Err(e) = db.flush() {
                log::warn!("could not flush example database: {}", e);
            }
        }
        outcome?;

        if self.interesting.is_empty() && self.settings.has_phase(Phase::Generate) && self.valid_examples == 0 {
            return Err(EngineError::Unsatisfiable { calls: self.call_count, valid: self.valid_examples });
        }
        let report = self.report();
        log::info!(
            "run finished after {} test cases with {} failure(s): {}",
            self.call_count,
            report.failures.len(),
            report.exit_reason.description(&self.settings)
        );
        Ok(report)
    }

    fn run_phases(&mut self) -> EngineResult<()> {
        if self.settings.has_phase(Phase::Reuse) {
            self.run_phase(Phase::Reuse, Self::reuse_existing_examples)?;
        }
        if self.settings.has_phase(Phase::Generate) && self.interesting.is_empty() {
            self.run_phase(Phase::Generate, Self::generate_new_examples)?;
        }
        if self.settings.has_phase(Phase::Target) && (self.interesting.is_empty() || self.settings.report_multiple_bugs) {
            self.run_phase(Phase::Target, Self::optimise_targets)?;
        }
        if self.settings.has_phase(Phase::Shrink) && !self.interesting.is_empty() {
            self.run_phase(Phase::Shrink, Self::shrink_interesting_examples)?;
        }
        self.verify_failures()?;
        self.save_results();
        if self.settings.has_phase(Phase::Explain) && !self.interesting.is_empty() {
            self.run_phase(Phase::Explain, Self::explain_failures)?;
        }
        Ok(())
    }

    fn run_phase<G>(&mut self, phase: Phase, body: G) -> EngineResult<()>
    where
        G: FnOnce(&mut Self) -> EngineResult<()>,
    {
        log::info!("{} phase", phase);
        self.phase = phase;
        let started = Instant::now();
        let calls_before = self.call_count;
        let outcome = body(self);
        self.statistics.record_duration(phase, started.elapsed());
        log::debug!("{} phase ran {} test cases in {:?}", phase, self.call_count - calls_before, started.elapsed());
        outcome
    }

    // === EXECUTION ===

    fn new_provider(&mut self) -> Box<dyn PrimitiveProvider> {
        let seed = self.rng.gen();
        match self.registry.create(&self.settings.backend, seed) {
            Ok(provider) => provider,
            Err(e) => {
                log::warn!("{}; using the hypothesis backend", e);
                Box::new(HypothesisProvider::new(seed))
            }
        }
    }

    /// The deadline executions are held to. Every run but the final replay
    /// gets a quarter extra, so only examples well past the deadline are
    /// reported and the exact check on replay still fails them.
    fn deadline(&self) -> Option<Duration> {
        let deadline = self.settings.deadline?;
        if self.exact_deadline {
            Some(deadline)
        } else {
            Some(deadline / 4 * 5)
        }
    }

    /// Run the test on fresh data that starts with `prefix`.
    fn generate_from(&mut self, prefix: Vec<ChoiceValue>) -> EngineResult<ConjectureResult> {
        let provider = self.new_provider();
        let data = ConjectureData::with_prefix(prefix, provider, self.settings.max_choices)
            .with_tree(&self.tree)
            .with_deadline(self.deadline());
        let result = execute(&mut self.test, data);
        self.process(result)
    }

    /// Run exactly `values`, bypassing the cache.
    fn execute_choices(&mut self, values: &[ChoiceValue]) -> EngineResult<ConjectureResult> {
        let data = ConjectureData::for_choices(values).with_deadline(self.deadline());
        let result = execute(&mut self.test, data);
        self.process(result)
    }

    /// Run exactly `values`, reusing a known outcome where there is one.
    fn replay(&mut self, values: &[ChoiceValue]) -> EngineResult<ConjectureResult> {
        let key = values.to_vec();
        if let Some(result) = self.cache.get(&key) {
            return Ok(result.clone());
        }
        if let Some(status) = self.tree.simulate(values) {
            // Failures have to run for real so their choices are known.
            if !status.is_interesting() {
                return Ok(simulated(status));
            }
        }
        let result = self.execute_choices(values)?;
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    /// `replay` for searches that cannot propagate errors. The first error
    /// is parked in `failure` and every later call is a no-op overrun.
    fn replay_for_search(&mut self, values: &[ChoiceValue], failure: &mut Option<EngineError>) -> ConjectureResult {
        if failure.is_some() {
            return simulated(Status::Overrun);
        }
        match self.replay(values) {
            Ok(result) => result,
            Err(e) => {
                *failure = Some(e);
                simulated(Status::Overrun)
            }
        }
    }

    /// Account for one execution that actually ran.
    fn process(&mut self, result: ConjectureResult) -> EngineResult<ConjectureResult> {
        self.call_count += 1;
        self.statistics.record(self.phase, &result);
        log::debug!("test case {}: {} after {} choices", self.call_count, result.status, result.len());

        if let Some(err) = &result.invalid_argument {
            return Err(EngineError::InvalidArgument(err.clone()));
        }
        if let Err(flaky) = self.tree.record(&result.nodes, &result.status) {
            self.handle_flaky(&result, flaky)?;
        }

        match &result.status {
            Status::Valid => self.valid_examples += 1,
            Status::Invalid => self.invalid_examples += 1,
            Status::Overrun => self.overrun_examples += 1,
            Status::Interesting(origin) => self.record_failure(origin.clone(), &result),
            Status::Flaky => {}
        }
        if !matches!(result.status, Status::Invalid | Status::Overrun) {
            self.update_targets(&result);
        }
        if self.phase == Phase::Generate {
            self.health.observe(&result).map_err(EngineError::FailedHealthCheck)?;
        }
        Ok(result)
    }

    fn handle_flaky(&mut self, result: &ConjectureResult, flaky: FlakyReplay) -> EngineResult<()> {
        let deadline = InterestingOrigin::DeadlineExceeded;
        let previous = match &flaky {
            FlakyReplay::ContinuedPastConclusion { previous, .. } | FlakyReplay::StatusChanged { previous, .. } => {
                previous.origin()
            }
            _ => None,
        };
        if result.origin() == Some(&deadline) || previous == Some(&deadline) {
            self.health.deadline_flaky(&deadline, &flaky);
            self.exit_reason = Some(ExitReason::Flaky);
            return Err(EngineError::Flaky(format!("unreliable test timings: {}", flaky)));
        }
        log::warn!("inconsistent replay: {}", flaky);
        self.exit_reason = Some(ExitReason::Flaky);
        Err(EngineError::Flaky(flaky.to_string()))
    }

    fn record_failure(&mut self, origin: InterestingOrigin, result: &ConjectureResult) {
        // Variants tried while explaining must not replace the minimal example.
        if self.phase == Phase::Explain {
            return;
        }
        let superseded = match self.interesting.get(&origin) {
            Some(existing) if existing.sort_key() <= result.sort_key() => return,
            Some(existing) => Some(existing.values()),
            None => {
                log::info!("found failure: {} (test case {})", origin, self.call_count);
                self.statistics.record_new_failure(self.phase);
                self.first_failure_at.get_or_insert(self.call_count);
                None
            }
        };
        let key = self.key.clone();
        let bytes = choices_to_bytes(&result.values());
        self.write_database("save", |db| db.save(&key, &bytes));
        if let Some(previous) = superseded {
            let previous = choices_to_bytes(&previous);
            let secondary = key.with_sub_key(SECONDARY);
            self.write_database("move", |db| db.move_value(&key, &secondary, &previous));
        }
        self.interesting.insert(origin, result.clone());
    }

    fn update_targets(&mut self, result: &ConjectureResult) {
        for (label, &score) in &result.target_observations {
            let best = self.best_targets.get(label).and_then(|best| best.target_observations.get(label).copied());
            if best.map_or(true, |best| score > best) {
                self.best_targets.insert(label.clone(), result.clone());
            }
        }
    }

    // === DATABASE ===

    fn write_database<W>(&mut self, what: &str, write: W)
    where
        W: FnOnce(&mut dyn ExampleDatabase) -> DatabaseResult<()>,
    {
        if let Some(db) = self.database.as_mut() {
            if let Err(e) = write(&mut **db) {
                log::warn!("could not {} example database entry: {}", what, e);
            }
        }
    }

    fn fetch(&self, key: &DatabaseKey) -> Vec<Vec<u8>> {
        let Some(db) = &self.database else {
            return Vec::new();
        };
        db.fetch(key).unwrap_or_else(|e| {
            log::warn!("could not read example database entries for {}: {}", key, e);
            Vec::new()
        })
    }

    // === PHASES ===

    fn reuse_existing_examples(&mut self) -> EngineResult<()> {
        if self.database.is_none() {
            return Ok(());
        }
        let primary = self.key.clone();
        let secondary = self.key.with_sub_key(SECONDARY);
        let pareto = self.key.with_sub_key(PARETO);

        let mut entries: Vec<(DatabaseKey, Vec<u8>)> =
            shortlex(self.fetch(&primary)).into_iter().map(|bytes| (primary.clone(), bytes)).collect();
        let desired = MIN_REUSE.max((self.settings.max_examples + 9) / 10);
        if entries.len() < desired {
            let mut extra = self.fetch(&secondary);
            extra.shuffle(&mut self.rng);
            extra.truncate(desired - entries.len());
            entries.extend(shortlex(extra).into_iter().map(|bytes| (secondary.clone(), bytes)));
        }
        if self.settings.has_phase(Phase::Target) {
            entries.extend(self.fetch(&pareto).into_iter().map(|bytes| (pareto.clone(), bytes)));
        }
        log::info!("replaying {} saved examples", entries.len());

        for (key, bytes) in entries {
            let values = match choices_from_bytes(&bytes) {
                Ok(values) => values,
                Err(e) => {
                    log::warn!("discarding unreadable saved example under {}: {}", key, e);
                    self.write_database("delete", |db| db.delete(&key, &bytes));
                    continue;
                }
            };
            let result = self.replay(&values)?;
            let still_useful = if key == pareto {
                !matches!(result.status, Status::Invalid | Status::Overrun)
            } else {
                result.status.is_interesting()
            };
            if !still_useful {
                // The test has changed since this was saved; that is not an error.
                log::debug!("saved example under {} is now {}; removing it", key, result.status);
                self.write_database("delete", |db| db.delete(&key, &bytes));
            } else if key == primary {
                let best = result.origin().and_then(|origin| self.interesting.get(origin)).map(|best| best.values());
                if best.map_or(false, |best| best != values) {
                    self.write_database("move", |db| db.move_value(&key, &secondary, &bytes));
                }
            }
        }
        Ok(())
    }

    /// Run the example made entirely of simplest choices.
    fn run_base_example(&mut self) -> EngineResult<ConjectureResult> {
        let data = ConjectureData::new(Box::new(SimplestProvider), self.settings.max_choices)
            .with_deadline(self.deadline());
        let result = execute(&mut self.test, data);
        self.process(result)
    }

    fn generate_new_examples(&mut self) -> EngineResult<()> {
        let base = self.run_base_example()?;
        self.health.check_base_example(&base).map_err(EngineError::FailedHealthCheck)?;

        let started = Instant::now();
        while !self.should_stop_generating(started) {
            let Some(prefix) = self.tree.generate_novel_prefix(&mut *self.prefix_provider) else {
                self.exit_reason = Some(ExitReason::SearchExhausted);
                break;
            };
            self.generate_from(prefix)?;
        }
        Ok(())
    }

    fn should_stop_generating(&mut self, started: Instant) -> bool {
        let settings = &self.settings;
        let reason = match self.first_failure_at {
            Some(first)
                if !settings.report_multiple_bugs
                    || self.call_count >= first + settings.extra_examples_after_failure =>
            {
                Some(ExitReason::FailureFound)
            }
            _ if self.valid_examples >= settings.max_examples => Some(ExitReason::MaxExamples),
            _ if self.invalid_examples + self.overrun_examples >= settings.max_examples * INVALID_PER_EXAMPLE => {
                Some(ExitReason::MaxIterations)
            }
            _ if settings.max_generate_time.map_or(false, |limit| started.elapsed() >= limit) => {
                Some(ExitReason::GenerateTimeLimit)
            }
            _ if self.tree.is_fully_exhausted() => Some(ExitReason::SearchExhausted),
            _ => None,
        };
        match reason {
            Some(reason) => {
                log::info!("stopping generation: {}", reason.description(settings));
                self.exit_reason = Some(reason);
                true
            }
            None => false,
        }
    }

    fn optimise_targets(&mut self) -> EngineResult<()> {
        let labels: Vec<String> = self.best_targets.keys().cloned().collect();
        if labels.is_empty() {
            return Ok(());
        }
        let budget = (self.settings.max_examples / 2 / labels.len()).max(10);
        for label in labels {
            if !self.interesting.is_empty() && !self.settings.report_multiple_bugs {
                break;
            }
            let Some(initial) = self.best_targets.get(&label).cloned() else {
                continue;
            };
            let seed = self.rng.gen();
            let mut failure = None;
            let outcome = Optimiser::new(
                initial,
                &label,
                |values: &[ChoiceValue]| self.replay_for_search(values, &mut failure),
                budget,
                seed,
            )
            .map(Optimiser::run);
            if let Some(e) = failure {
                return Err(e);
            }
            if let Some(outcome) = outcome {
                log::info!(
                    "target {:?}: best score {} after {} test cases ({} improvements)",
                    label,
                    outcome.score,
                    outcome.calls,
                    outcome.improvements
                );
            }
        }
        Ok(())
    }

    /// The origins that will be reported.
    fn reported_origins(&self) -> Vec<InterestingOrigin> {
        if self.settings.report_multiple_bugs {
            return self.interesting.keys().cloned().collect();
        }
        self.interesting
            .iter()
            .min_by_key(|(_, result)| result.sort_key())
            .map(|(origin, _)| vec![origin.clone()])
            .unwrap_or_default()
    }

    fn shrink_interesting_examples(&mut self) -> EngineResult<()> {
        let give_up_at = Instant::now() + self.settings.max_shrink_time;
        let mut shrunk: BTreeSet<InterestingOrigin> = BTreeSet::new();
        // Shrinking can turn up new failures, so keep going until every
        // reported one has had its turn.
        while let Some(origin) = self.reported_origins().into_iter().find(|origin| !shrunk.contains(origin)) {
            shrunk.insert(origin.clone());
            let Some(initial) = self.interesting.get(&origin).cloned() else {
                continue;
            };
            log::info!("shrinking {} from {} choices", origin, initial.len());
            let config = ShrinkConfig {
                max_shrinks: self.settings.max_shrinks,
                time_limit: Some(give_up_at.saturating_duration_since(Instant::now())),
                seed: self.rng.gen(),
            };
            let mut failure = None;
            let outcome =
                Shrinker::new(initial, |values: &[ChoiceValue]| self.replay_for_search(values, &mut failure), config)
                    .shrink();
            if let Some(e) = failure {
                return Err(e);
            }
            self.statistics.record_shrinks(outcome.shrinks);
            log::info!(
                "shrunk {} to {} choices in {} test cases ({} shrinks, {})",
                origin,
                outcome.result.len(),
                outcome.calls,
                outcome.shrinks,
                outcome.exit
            );
            if outcome.possibly_non_minimal() {
                self.possibly_non_minimal.insert(origin);
                self.exit_reason = Some(match outcome.exit {
                    ShrinkExit::TimeLimit => ExitReason::ShrinkTimeLimit,
                    _ => ExitReason::MaxShrinks,
                });
            }
        }
        Ok(())
    }

    /// Replay each reported failure once more, uncached and held to the
    /// exact deadline, so that a test that does not fail reliably is
    /// reported as flaky.
    fn verify_failures(&mut self) -> EngineResult<()> {
        self.exact_deadline = true;
        for origin in self.reported_origins() {
            let Some(expected) = self.interesting.get(&origin).cloned() else {
                continue;
            };
            let data = ConjectureData::for_choices(&expected.values()).with_deadline(self.deadline());
            let replayed = execute(&mut self.test, data);
            if origin == InterestingOrigin::DeadlineExceeded {
                self.health.compare_runtimes(&origin, expected.runtime, replayed.runtime);
                if replayed.origin() != Some(&origin) {
                    let message = format!(
                        "unreliable test timings: the first run took {:?} but the replay took {:?}, under the {:?} deadline",
                        expected.runtime,
                        replayed.runtime,
                        self.settings.deadline.unwrap_or_default()
                    );
                    self.health.deadline_flaky(&origin, &message);
                    self.exit_reason = Some(ExitReason::Flaky);
                    return Err(EngineError::Flaky(message));
                }
            }
            let replayed = self.process(replayed)?;
            if replayed.origin() != Some(&origin) {
                // The tree normally catches this; a changed draw count can slip past it.
                log::warn!("{} did not reproduce: replay was {}", origin, replayed.status);
                self.exit_reason = Some(ExitReason::Flaky);
                return Err(EngineError::Flaky(format!(
                    "{} failed once but replaying the same choices gave {}",
                    origin, replayed.status
                )));
            }
        }
        self.exact_deadline = false;
        Ok(())
    }

    fn save_results(&mut self) {
        if self.database.is_none() {
            return;
        }
        let pareto = self.key.with_sub_key(PARETO);
        let best: BTreeSet<Vec<u8>> = self.best_targets.values().map(|result| choices_to_bytes(&result.values())).collect();
        for stale in self.fetch(&pareto) {
            if !best.contains(&stale) {
                self.write_database("delete", |db| db.delete(&pareto, &stale));
            }
        }
        for bytes in &best {
            self.write_database("save", |db| db.save(&pareto, bytes));
        }

        let protected: HashSet<Vec<u8>> =
            self.interesting.values().map(|result| choices_to_bytes(&result.values())).collect();
        let max_entries = self.settings.max_database_entries;
        for key in [self.key.clone(), self.key.with_sub_key(SECONDARY), pareto] {
            self.write_database("evict", |db| {
                let removed = evict_excess(db, &key, max_entries, &protected)?;
                if removed > 0 {
                    log::debug!("evicted {} examples from {}", removed, key);
                }
                Ok(())
            });
        }
    }

    fn explain_failures(&mut self) -> EngineResult<()> {
        for origin in self.reported_origins() {
            let Some(result) = self.interesting.get(&origin).cloned() else {
                continue;
            };
            let spans: Vec<Span> = result.inner_spans().filter(|span| !span.is_empty()).cloned().collect();
            let mut free: Vec<FreeSpan> = Vec::new();
            for span in spans {
                if free.iter().any(|outer| outer.start <= span.start && span.end <= outer.end) {
                    continue;
                }
                if self.span_is_free(&result, &origin, &span)? {
                    log::debug!("{}: span {} at {}..{} is free", origin, span.label, span.start, span.end);
                    free.push(FreeSpan { label: span.label.clone(), start: span.start, end: span.end });
                }
            }
            self.free_spans.insert(origin, free);
        }
        Ok(())
    }

    /// Whether every random variation of `span` still fails the same way.
    fn span_is_free(&mut self, result: &ConjectureResult, origin: &InterestingOrigin, span: &Span) -> EngineResult<bool> {
        let original = result.values();
        let mut provider = self.new_provider();
        let mut varied = false;
        for _ in 0..self.settings.explain_iterations {
            let mut values = original.clone();
            for (i, node) in result.nodes.iter().enumerate().take(span.end).skip(span.start) {
                if !node.was_forced {
                    values[i] = provider.draw_choice(&node.constraints);
                }
            }
            if values == original {
                continue;
            }
            varied = true;
            if self.replay(&values)?.origin() != Some(origin) {
                return Ok(false);
            }
        }
        Ok(varied)
    }

    fn report(&mut self) -> RunReport {
        let (hits, misses) = self.cache.stats();
        log::debug!("execution cache: {} hits, {} misses", hits, misses);
        let failures = self
            .reported_origins()
            .into_iter()
            .filter_map(|origin| {
                let result = self.interesting.get(&origin)?;
                Some(FailureReport {
                    choices: result.values(),
                    notes: result.notes.clone(),
                    possibly_non_minimal: self.possibly_non_minimal.contains(&origin),
                    free_spans: self.free_spans.get(&origin).cloned().unwrap_or_default(),
                    origin,
                })
            })
            .collect();
        let exit_reason = self.exit_reason.unwrap_or(ExitReason::Finished);
        let mut statistics = std::mem::take(&mut self.statistics);
        statistics.finish(exit_reason.description(&self.settings));
        RunReport { failures, statistics, health: self.health.warnings().to_vec(), exit_reason }
    }
}
