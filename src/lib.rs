//! # Conjecture engine
//!
//! The core of a property-based testing library. A test draws typed choices
//! from a [`ConjectureData`]; the engine generates choice sequences, records
//! them in a novelty tree so nothing is run twice, shrinks failures to a
//! minimal sequence and saves them to an example database so the next run
//! replays them first.
//!
//! ```no_run
//! use conjecture_engine::{ConjectureData, ConjectureRunner, Settings, TestFailure};
//!
//! let runner = ConjectureRunner::new(
//!     "sum_is_small",
//!     |data: &mut ConjectureData<'_>| {
//!         let x = data.draw_integer(Some(0), Some(100))?;
//!         let y = data.draw_integer(Some(0), Some(100))?;
//!         if x + y > 150 {
//!             return Err(TestFailure::failed("sum too large"));
//!         }
//!         Ok(())
//!     },
//!     Settings::default(),
//! )?;
//! let report = runner.run()?;
//! for failure in &report.failures {
//!     println!("{}", failure);
//! }
//! # Ok::<(), conjecture_engine::EngineError>(())
//! ```

pub mod cache;
pub mod choice;
pub mod data;
pub mod database;
pub mod datatree;
pub mod engine;
pub mod execution;
pub mod health;
pub mod optimiser;
pub mod providers;
pub mod settings;
pub mod shrinker;
pub mod statistics;

pub use choice::{ChoiceNode, ChoiceType, ChoiceValue, Constraints, IntervalSet, InvalidArgument};
pub use data::{ConjectureData, ConjectureResult, InterestingOrigin, Span, Status, StopTest};
pub use database::{DatabaseError, DatabaseKey, DirectoryDatabase, ExampleDatabase, InMemoryDatabase};
pub use datatree::{DataTree, FlakyReplay};
pub use engine::{ConjectureRunner, EngineError, EngineResult, ExitReason, FailureReport, FreeSpan, RunReport};
pub use execution::{TestFailure, TestResult};
pub use health::HealthDiagnostic;
pub use providers::{HypothesisProvider, PrimitiveProvider, ProviderRegistry, RandomProvider};
pub use settings::{DatabaseSetting, HealthCheck, Phase, Settings};
pub use shrinker::{ShrinkConfig, ShrinkOutcome, Shrinker};
pub use statistics::Statistics;
