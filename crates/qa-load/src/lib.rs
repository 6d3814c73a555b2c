//! Concurrent load engine.
//!
//! A [`LoadPlan`] is a set of named scenarios, each with a virtual-user
//! [`Schedule`] and a weighted [`TrafficMix`]. The [`LoadEngine`] seeds a
//! shared [`TargetCache`], drives every scenario against a [`LoadTarget`]
//! and returns a [`LoadRunReport`] with the aggregated metrics.

pub mod cache;
pub mod catalog;
pub mod engine;
pub mod mix;
pub mod outcome;
pub mod schedule;
pub mod target;
mod worker;

pub use cache::TargetCache;
pub use catalog::{OperationCatalog, OperationDef};
pub use engine::{EngineSettings, LoadEngine, LoadPlan, LoadRunReport, PopulationSample, ScenarioRun, ScenarioSpec};
pub use mix::{TrafficMix, WeightedTable};
pub use outcome::OutcomeClassifier;
pub use schedule::{Schedule, Stage};
pub use target::{HttpTarget, LoadTarget, TargetRequest};
