//! Advisory process lock guarding a repository directory.
//!
//! One lock file, `.xdd/.lock`, carries both the OS-level advisory lock (via
//! `fs2`) and a small metadata blob identifying the owner. A normal
//! `acquire()` never breaks a lock silently; a stale owner is reported as
//! `LockStale` and must be cleared with an explicit `force_unlock`.

use std::{
   fs::{File, OpenOptions},
   path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::{
   config::XddConfig,
   error::{Result, XddError},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockMetadata {
   pid:        u32,
   hostname:   String,
   started_at: DateTime<Utc>,
   /// Identifies what acquired the lock (e.g. `"cli"`, `"test"`), for
   /// diagnosing contention across different kinds of callers.
   interface:  String,
}

impl LockMetadata {
   fn current(interface: &str) -> Self {
      Self {
         pid:        std::process::id(),
         hostname:   hostname_or_unknown(),
         started_at: Utc::now(),
         interface:  interface.to_string(),
      }
   }
}

fn hostname_or_unknown() -> String {
   std::env::var("HOSTNAME").or_else(|_| std::env::var("COMPUTERNAME")).unwrap_or_else(|_| "unknown".to_string())
}

#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
   Path::new(&format!("/proc/{pid}")).exists()
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
   // No portable liveness check without extra dependencies; treat as alive
   // so only the staleness-by-age rule can break the lock.
   true
}

fn lock_path(base_dir: &Path) -> PathBuf {
   base_dir.join(".xdd").join(".lock")
}

/// An acquired advisory lock on a repository. Dropping it releases the OS
/// lock and removes the metadata file; callers that want to observe release
/// errors should call `release()` explicitly.
pub struct ProcessLock {
   file: File,
   path: PathBuf,
}

impl ProcessLock {
   /// `interface` identifies what kind of caller is acquiring the lock (the
   /// CLI, a test harness, etc.) and is recorded in the lock metadata.
   pub fn acquire(base_dir: &Path, config: &XddConfig, interface: &str) -> Result<Self> {
      let path = lock_path(base_dir);
      if let Some(parent) = path.parent() {
         std::fs::create_dir_all(parent)?;
      }
      let file = OpenOptions::new().create(true).read(true).write(true).open(&path)?;

      match file.try_lock_exclusive() {
         Ok(()) => {
            let metadata = LockMetadata::current(interface);
            let encoded = toml::to_string(&metadata).map_err(|e| XddError::Other(e.to_string()))?;
            std::fs::write(&path, encoded)?;
            Ok(Self { file, path })
         },
         Err(_) => {
            let owner = read_metadata(&path);
            match owner {
               Some(owner) if !process_is_alive(owner.pid) => {
                  Err(XddError::LockStale { path: path.display().to_string(), pid: owner.pid })
               },
               Some(owner) => {
                  let age_secs = (Utc::now() - owner.started_at).num_seconds().max(0) as u64;
                  if age_secs > config.lock_stale_secs {
                     Err(XddError::LockStale { path: path.display().to_string(), pid: owner.pid })
                  } else {
                     Err(XddError::LockHeld {
                        owner: format!("{} ({})", owner.hostname, owner.interface),
                        pid:   owner.pid,
                        since: owner.started_at.to_rfc3339(),
                     })
                  }
               },
               None => Err(XddError::LockHeld { owner: "unknown".to_string(), pid: 0, since: String::new() }),
            }
         },
      }
   }

   /// Breaks a lock unconditionally, regardless of staleness. Used only by
   /// the explicit `unlock --force` command.
   pub fn force_unlock(base_dir: &Path) -> Result<()> {
      let path = lock_path(base_dir);
      if path.exists() {
         let file = OpenOptions::new().read(true).write(true).open(&path)?;
         let _ = FileExt::unlock(&file);
         std::fs::remove_file(&path)?;
      }
      Ok(())
   }

   pub fn release(self) -> Result<()> {
      FileExt::unlock(&self.file)?;
      if self.path.exists() {
         std::fs::remove_file(&self.path)?;
      }
      Ok(())
   }
}

impl Drop for ProcessLock {
   fn drop(&mut self) {
      let _ = FileExt::unlock(&self.file);
      let _ = std::fs::remove_file(&self.path);
   }
}

fn read_metadata(path: &Path) -> Option<LockMetadata> {
   let contents = std::fs::read_to_string(path).ok()?;
   toml::from_str(&contents).ok()
}
