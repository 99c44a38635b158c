//! Run configuration.
//!
//! A [`Settings`] value is built once by the host, validated, and then
//! borrowed by the runner for the whole run. Nothing in the engine reads
//! configuration from anywhere else.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::choice::InvalidArgument;

/// Default location of the on-disk example database.
pub const DEFAULT_DATABASE_DIR: &str = ".hypothesis/examples";

/// Ordered phases of a run. Each can be switched off independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Reuse,
    Generate,
    Target,
    Shrink,
    Explain,
}

impl Phase {
    pub fn all() -> BTreeSet<Phase> {
        [Phase::Reuse, Phase::Generate, Phase::Target, Phase::Shrink, Phase::Explain].into_iter().collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Reuse => "reuse",
            Phase::Generate => "generate",
            Phase::Target => "target",
            Phase::Shrink => "shrink",
            Phase::Explain => "explain",
        };
        f.write_str(name)
    }
}

/// Diagnostics raised about pathological test behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheck {
    /// The simplest possible input is already very large.
    LargeBaseExample,
    /// Most generated inputs are rejected by `assume`.
    FilterTooMuch,
    /// Generating inputs takes too long.
    TooSlow,
    /// Most generated inputs run out of choices.
    DataTooLarge,
    /// Execution time varies enough to make deadline failures unreliable.
    DeadlineFlaky,
}

impl fmt::Display for HealthCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HealthCheck::LargeBaseExample => "large_base_example",
            HealthCheck::FilterTooMuch => "filter_too_much",
            HealthCheck::TooSlow => "too_slow",
            HealthCheck::DataTooLarge => "data_too_large",
            HealthCheck::DeadlineFlaky => "deadline_flaky",
        };
        f.write_str(name)
    }
}

/// Where examples are persisted between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseSetting {
    /// A directory database under [`DEFAULT_DATABASE_DIR`].
    #[default]
    Default,
    Directory(PathBuf),
    /// A fresh in-memory database, discarded at the end of the run.
    InMemory,
    None,
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Valid examples to try before declaring success.
    pub max_examples: usize,
    /// Per-execution wall clock limit, in milliseconds when serialized.
    #[serde(with = "opt_millis")]
    pub deadline: Option<Duration>,
    /// Derive the seed from the test identity and never write to the database.
    pub derandomize: bool,
    pub phases: BTreeSet<Phase>,
    pub database: DatabaseSetting,
    pub seed: Option<u64>,
    #[serde(with = "millis")]
    pub max_shrink_time: Duration,
    /// Successful shrinks allowed per failure.
    pub max_shrinks: usize,
    /// Choices one execution may make before it overruns.
    pub max_choices: usize,
    #[serde(with = "opt_millis")]
    pub max_generate_time: Option<Duration>,
    /// Keep looking for distinct failures after the first one.
    pub report_multiple_bugs: bool,
    /// Generate iterations allowed after the first failure to look for others.
    pub extra_examples_after_failure: usize,
    /// Name of the generation backend in the provider registry.
    pub backend: String,
    pub suppress_health_check: BTreeSet<HealthCheck>,
    pub max_database_entries: usize,
    /// Random variants tried per span when explaining a failure.
    pub explain_iterations: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            max_examples: 100,
            deadline: Some(Duration::from_millis(200)),
            derandomize: false,
            phases: Phase::all(),
            database: DatabaseSetting::Default,
            seed: None,
            max_shrink_time: Duration::from_secs(300),
            max_shrinks: 500,
            max_choices: 8 * 1024,
            max_generate_time: None,
            report_multiple_bugs: true,
            extra_examples_after_failure: 10,
            backend: "hypothesis".to_string(),
            suppress_health_check: BTreeSet::new(),
            max_database_entries: 200,
            explain_iterations: 10,
        }
    }
}

impl Settings {
    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_derandomize(mut self, derandomize: bool) -> Self {
        self.derandomize = derandomize;
        self
    }

    pub fn with_phases<I: IntoIterator<Item = Phase>>(mut self, phases: I) -> Self {
        self.phases = phases.into_iter().collect();
        self
    }

    pub fn with_database(mut self, database: DatabaseSetting) -> Self {
        self.database = database;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_shrink_time(mut self, max_shrink_time: Duration) -> Self {
        self.max_shrink_time = max_shrink_time;
        self
    }

    pub fn with_max_shrinks(mut self, max_shrinks: usize) -> Self {
        self.max_shrinks = max_shrinks;
        self
    }

    pub fn with_max_choices(mut self, max_choices: usize) -> Self {
        self.max_choices = max_choices;
        self
    }

    pub fn with_max_generate_time(mut self, max_generate_time: Option<Duration>) -> Self {
        self.max_generate_time = max_generate_time;
        self
    }

    pub fn with_report_multiple_bugs(mut self, report_multiple_bugs: bool) -> Self {
        self.report_multiple_bugs = report_multiple_bugs;
        self
    }

    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = backend.into();
        self
    }

    pub fn suppressing(mut self, check: HealthCheck) -> Self {
        self.suppress_health_check.insert(check);
        self
    }

    pub fn with_max_database_entries(mut self, max_database_entries: usize) -> Self {
        self.max_database_entries = max_database_entries;
        self
    }

    pub fn has_phase(&self, phase: Phase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn is_suppressed(&self, check: HealthCheck) -> bool {
        self.suppress_health_check.contains(&check)
    }

    pub fn validate(&self) -> Result<(), InvalidArgument> {
        if self.max_examples == 0 {
            return Err(InvalidArgument::new("max_examples must be at least 1"));
        }
        if self.max_choices == 0 {
            return Err(InvalidArgument::new("max_choices must be at least 1"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(InvalidArgument::new("deadline must be positive, or None to disable it"));
        }
        if self.max_database_entries == 0 {
            return Err(InvalidArgument::new("max_database_entries must be at least 1"));
        }
        if self.backend.is_empty() {
            return Err(InvalidArgument::new("backend must not be empty"));
        }
        if let DatabaseSetting::Directory(path) = &self.database {
            if path.as_os_str().is_empty() {
                return Err(InvalidArgument::new("database directory must not be empty"));
            }
        }
        Ok(())
    }

    /// Parse settings from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, InvalidArgument> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| InvalidArgument::new(format!("malformed settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }
}
