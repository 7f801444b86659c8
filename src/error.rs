use thiserror::Error;

#[derive(Debug, Error)]
pub enum XddError {
   #[error("validation failed: {field}: {reason}")]
   Validation { field: String, reason: String },

   #[error("ambiguous edit: {clarification}")]
   AmbiguousEdit { clarification: String, possible_targets: Vec<String> },

   #[error("network error: {0}")]
   Network(#[from] reqwest::Error),

   #[error("API request failed (HTTP {status}): {body}")]
   Api { status: u16, body: String },

   #[error("failed to parse LLM response as {expected}: {reason}")]
   Parse { expected: String, reason: String },

   #[error("exhausted {retries} retries: {source}")]
   BudgetExceeded {
      retries: u32,
      #[source]
      source:  Box<Self>,
   },

   #[error("repository is locked by {owner} (pid {pid}) since {since}")]
   LockHeld { owner: String, pid: u32, since: String },

   #[error("lock at {path} appears stale (owner pid {pid} not running); use `unlock --force`")]
   LockStale { path: String, pid: u32 },

   #[error("transaction I/O failed: {0}")]
   TxIo(#[from] std::io::Error),

   #[error("conflict: {0}")]
   Conflict(String),

   #[error("codec error: {0}")]
   Codec(#[from] serde_yaml::Error),

   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   #[error("invalid version {version}: {reason}")]
   InvalidVersion { version: String, reason: String },

   #[error("operation cancelled")]
   Cancelled,

   #[error("{0}")]
   Other(String),
}

pub type Result<T> = std::result::Result<T, XddError>;
