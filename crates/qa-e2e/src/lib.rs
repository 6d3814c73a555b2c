//! Workflow end-to-end executor.
//!
//! A [`Scenario`] is an ordered list of [`Step`]s. Each step issues calls
//! and poll-until checks against the target services, asserting on status
//! and response shape and extracting identifiers for later steps.

pub mod catalog;
pub mod executor;
pub mod expect;
pub mod poll;
pub mod step;
pub mod template;

pub use catalog::listing_pipeline;
pub use executor::{ExecutorSettings, StepResult, WorkflowExecutor, WorkflowReport};
pub use expect::Expect;
pub use poll::{PollState, PollUntil};
pub use step::{Action, Call, OnExhausted, Poll, Scenario, Step};
pub use template::Vars;
