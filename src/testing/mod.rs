//! Scenario-based testing infrastructure.
//!
//! Unlike golden-file fixtures that replay frozen LLM output, these fixtures
//! drive a real temp-directory `Repository` through hand-built event
//! batches, exercising the same crash-atomicity, snapshot, and concurrency
//! behavior the orchestrator would produce without depending on network
//! access.

pub mod fixture;
pub mod runner;

pub use fixture::ScenarioFixture;
pub use runner::{ScenarioReport, run_scenario};
