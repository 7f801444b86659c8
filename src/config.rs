use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, XddError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct XddConfig {
   pub api_base_url: String,

   /// Optional API key for authentication (overridden by `XDD_API_KEY` env
   /// var)
   pub api_key: Option<String>,

   /// HTTP request timeout in seconds
   pub request_timeout_secs: u64,

   /// HTTP connection timeout in seconds
   pub connect_timeout_secs: u64,

   pub max_retries:        u32,
   pub initial_backoff_ms: u64,
   pub temperature:        f32,

   /// Default model identifier, used when a stage has no override
   pub model: String,

   /// Per-stage model overrides; blank means "use `model`"
   pub metadata_model:       String,
   pub requirements_model:   String,
   pub categorization_model: String,
   pub generation_model:     String,
   pub version_bump_model:   String,

   /// Events since last snapshot that triggers a new snapshot
   pub snapshot_event_threshold: usize,

   /// Replay cost budget (events) before a snapshot is forced regardless of
   /// the event threshold
   pub snapshot_replay_budget: usize,

   /// Lock is considered stale after this many seconds with no refresh
   pub lock_stale_secs: u64,

   /// Leftover `*.tmp.*` staging directories older than this are swept on
   /// startup
   pub tmp_sweep_age_secs: u64,

   /// Prompt variant selecting which embedded template set to render
   #[serde(default = "default_prompt_variant")]
   pub prompt_variant: String,
}

fn default_prompt_variant() -> String {
   "default".to_string()
}

impl Default for XddConfig {
   fn default() -> Self {
      Self {
         api_base_url:            "http://localhost:4000".to_string(),
         api_key:                 None,
         request_timeout_secs:    120,
         connect_timeout_secs:    30,
         max_retries:             3,
         initial_backoff_ms:      1000,
         temperature:             0.2,
         model:                   "claude-sonnet-4.5".to_string(),
         metadata_model:          String::new(),
         requirements_model:      String::new(),
         categorization_model:    String::new(),
         generation_model:        String::new(),
         version_bump_model:      String::new(),
         snapshot_event_threshold: 100,
         snapshot_replay_budget:  500,
         lock_stale_secs:         1800,
         tmp_sweep_age_secs:      3600,
         prompt_variant:          default_prompt_variant(),
      }
   }
}

impl XddConfig {
   /// Load config from default location (~/.config/xdd/config.toml).
   /// Falls back to `Default` if the file doesn't exist or home can't be
   /// determined. Environment variables override config file values:
   /// - `XDD_API_URL` overrides `api_base_url`
   /// - `XDD_API_KEY` overrides `api_key`
   /// - `XDD_LOCK_STALE_SECS` overrides `lock_stale_secs`
   pub fn load() -> Result<Self> {
      let config_path = if let Ok(custom_path) = std::env::var("XDD_CONFIG") {
         PathBuf::from(custom_path)
      } else {
         Self::default_config_path().unwrap_or_default()
      };

      let mut config = if config_path.exists() { Self::from_file(&config_path)? } else { Self::default() };

      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   fn apply_env_overrides(config: &mut Self) {
      if let Ok(api_url) = std::env::var("XDD_API_URL") {
         config.api_base_url = api_url;
      }
      if let Ok(api_key) = std::env::var("XDD_API_KEY") {
         config.api_key = Some(api_key);
      }
      if let Ok(secs) = std::env::var("XDD_LOCK_STALE_SECS")
         && let Ok(secs) = secs.parse()
      {
         config.lock_stale_secs = secs;
      }
   }

   pub fn from_file(path: &Path) -> Result<Self> {
      let contents =
         std::fs::read_to_string(path).map_err(|e| XddError::Other(format!("failed to read config: {e}")))?;
      let mut config: Self =
         toml::from_str(&contents).map_err(|e| XddError::Other(format!("failed to parse config: {e}")))?;

      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   /// Resolve the model identifier for a named pipeline stage, falling back
   /// to `model` when the stage has no override configured.
   pub fn model_for_stage(&self, stage_override: &str) -> &str {
      if stage_override.is_empty() { &self.model } else { stage_override }
   }

   pub fn default_config_path() -> Result<PathBuf> {
      if let Ok(home) = std::env::var("HOME") {
         return Ok(PathBuf::from(home).join(".config/xdd/config.toml"));
      }
      if let Ok(home) = std::env::var("USERPROFILE") {
         return Ok(PathBuf::from(home).join(".config/xdd/config.toml"));
      }
      Err(XddError::Other("no home directory found (tried HOME and USERPROFILE)".to_string()))
   }
}
