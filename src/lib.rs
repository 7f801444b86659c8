//! Event-sourced specification editor driven by LLM-generated structured
//! edits.
//!
//! The changelog (`events`) is the source of truth; the specification
//! (`model`) is a materialized projection of it, rebuilt by folding events
//! onto the latest snapshot (`snapshot`). Writes go through a copy-on-write
//! transaction (`txn`) coordinated by an advisory process lock (`lock`).
//! `orchestrator` turns a user prompt into a batch of events via a five-stage
//! LLM pipeline built on `task_runner` and `llm`.
pub mod cancel;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod llm;
pub mod lock;
pub mod model;
pub mod orchestrator;
pub mod repository;
pub mod snapshot;
pub mod style;
pub mod task_runner;
pub mod templates;
pub mod testing;
pub mod txn;

pub use cancel::CancellationToken;
pub use config::XddConfig;
pub use error::{Result, XddError};
pub use repository::Repository;
