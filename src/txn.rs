//! Copy-on-write, rename-atomic multi-file transactions.
//!
//! A transaction mirrors `base` into a sibling `<base>.tmp.<ts>` directory
//! using hard links (falling back to a byte copy across filesystem
//! boundaries), applies writes there, then commits by renaming `base` aside
//! to `<base>.backup.<ts>` and renaming the staging directory into `base`'s
//! place. `write_file` always unlinks the existing path before writing: the
//! mirror shares inodes with `base` via hard links, so writing through the
//! existing path would mutate the committed tree.

use std::{
   fs,
   io::ErrorKind,
   path::{Path, PathBuf},
   time::SystemTime,
};

use chrono::Utc;

use crate::error::Result;

const EXDEV: i32 = 18;

fn timestamp_suffix() -> String {
   Utc::now().format("%Y%m%dT%H%M%S%.f").to_string()
}

fn mirror_dir(src: &Path, dst: &Path) -> Result<()> {
   fs::create_dir_all(dst)?;
   for entry in fs::read_dir(src)? {
      let entry = entry?;
      let file_type = entry.file_type()?;
      let dst_path = dst.join(entry.file_name());
      if file_type.is_dir() {
         mirror_dir(&entry.path(), &dst_path)?;
      } else {
         match fs::hard_link(entry.path(), &dst_path) {
            Ok(()) => {},
            Err(e) if e.kind() == ErrorKind::NotFound || e.raw_os_error() == Some(EXDEV) => {
               fs::copy(entry.path(), &dst_path)?;
            },
            Err(e) => return Err(e.into()),
         }
      }
   }
   Ok(())
}

pub struct CopyOnWriteTx {
   base:    PathBuf,
   staging: PathBuf,
}

impl CopyOnWriteTx {
   /// Stages a mirror of `base` (creating `base` if it doesn't exist yet) in
   /// a fresh sibling directory.
   pub fn begin(base: &Path) -> Result<Self> {
      let staging = sibling(base, "tmp");
      if base.exists() {
         mirror_dir(base, &staging)?;
      } else {
         fs::create_dir_all(&staging)?;
      }
      Ok(Self { base: base.to_path_buf(), staging })
   }

   pub fn write_file(&self, rel_path: impl AsRef<Path>, bytes: &[u8]) -> Result<()> {
      let path = self.staging.join(rel_path);
      if let Some(parent) = path.parent() {
         fs::create_dir_all(parent)?;
      }
      if path.exists() {
         fs::remove_file(&path)?;
      }
      fs::write(&path, bytes)?;
      Ok(())
   }

   pub fn read_file(&self, rel_path: impl AsRef<Path>) -> Result<Vec<u8>> {
      Ok(fs::read(self.staging.join(rel_path))?)
   }

   pub fn read_to_string(&self, rel_path: impl AsRef<Path>) -> Result<String> {
      Ok(fs::read_to_string(self.staging.join(rel_path))?)
   }

   pub fn exists(&self, rel_path: impl AsRef<Path>) -> bool {
      self.staging.join(rel_path).exists()
   }

   /// Installs the staged tree in place of `base` via rename. If the second
   /// rename fails, the pre-existing `base` is restored from the backup
   /// before the error is returned.
   pub fn commit(self) -> Result<()> {
      let backup = sibling(&self.base, "backup");
      let had_base = self.base.exists();
      if had_base {
         fs::rename(&self.base, &backup)?;
      }
      match fs::rename(&self.staging, &self.base) {
         Ok(()) => {
            if had_base {
               fs::remove_dir_all(&backup)?;
            }
            Ok(())
         },
         Err(e) => {
            if had_base {
               let _ = fs::rename(&backup, &self.base);
            }
            Err(e.into())
         },
      }
   }

   pub fn rollback(self) -> Result<()> {
      Ok(fs::remove_dir_all(&self.staging)?)
   }
}

fn sibling(base: &Path, kind: &str) -> PathBuf {
   let file_name = base.file_name().and_then(|n| n.to_str()).unwrap_or("repo");
   let parent = base.parent().unwrap_or_else(|| Path::new("."));
   parent.join(format!("{file_name}.{kind}.{}", timestamp_suffix()))
}

/// Startup recovery: removes leftover `*.tmp.*` staging directories older
/// than `max_age_secs`, and if `base` is missing but a `*.backup.*` sibling
/// exists, restores the newest one.
pub fn recover(base: &Path, max_age_secs: u64) -> Result<()> {
   let parent = base.parent().unwrap_or_else(|| Path::new("."));
   let file_name = base.file_name().and_then(|n| n.to_str()).unwrap_or("repo").to_string();
   if !parent.exists() {
      return Ok(());
   }

   let mut newest_backup: Option<(SystemTime, PathBuf)> = None;
   for entry in fs::read_dir(parent)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(name) = name.to_str() else { continue };

      if let Some(rest) = name.strip_prefix(&format!("{file_name}.tmp.")) {
         let _ = rest;
         let age_ok = entry
            .metadata()
            .and_then(|m| m.modified())
            .map(|m| m.elapsed().map(|e| e.as_secs() > max_age_secs).unwrap_or(false))
            .unwrap_or(false);
         if age_ok {
            fs::remove_dir_all(entry.path())?;
         }
      } else if name.starts_with(&format!("{file_name}.backup.")) {
         let modified = entry.metadata().and_then(|m| m.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
         if newest_backup.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest_backup = Some((modified, entry.path()));
         }
      }
   }

   if !base.exists()
      && let Some((_, backup_path)) = newest_backup
   {
      fs::rename(backup_path, base)?;
   }

   Ok(())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn commit_installs_written_files_atomically() {
      let dir = tempfile::tempdir().unwrap();
      let base = dir.path().join("repo");
      fs::create_dir_all(&base).unwrap();
      fs::write(base.join("a.txt"), b"old").unwrap();

      let tx = CopyOnWriteTx::begin(&base).unwrap();
      tx.write_file("a.txt", b"new").unwrap();
      tx.write_file("b.txt", b"added").unwrap();
      tx.commit().unwrap();

      assert_eq!(fs::read(base.join("a.txt")).unwrap(), b"new");
      assert_eq!(fs::read(base.join("b.txt")).unwrap(), b"added");
   }

   #[test]
   fn rollback_leaves_base_untouched() {
      let dir = tempfile::tempdir().unwrap();
      let base = dir.path().join("repo");
      fs::create_dir_all(&base).unwrap();
      fs::write(base.join("a.txt"), b"old").unwrap();

      let tx = CopyOnWriteTx::begin(&base).unwrap();
      tx.write_file("a.txt", b"new").unwrap();
      tx.rollback().unwrap();

      assert_eq!(fs::read(base.join("a.txt")).unwrap(), b"old");
   }

   #[test]
   fn write_through_a_hard_linked_mirror_does_not_mutate_the_original() {
      let dir = tempfile::tempdir().unwrap();
      let base = dir.path().join("repo");
      fs::create_dir_all(&base).unwrap();
      fs::write(base.join("a.txt"), b"old").unwrap();

      let tx = CopyOnWriteTx::begin(&base).unwrap();
      tx.write_file("a.txt", b"new").unwrap();

      assert_eq!(fs::read(base.join("a.txt")).unwrap(), b"old");
      tx.rollback().unwrap();
   }

   #[test]
   fn recover_restores_from_backup_when_base_is_missing() {
      let dir = tempfile::tempdir().unwrap();
      let base = dir.path().join("repo");
      fs::create_dir_all(&base).unwrap();
      fs::write(base.join("a.txt"), b"content").unwrap();

      let backup = sibling(&base, "backup");
      fs::rename(&base, &backup).unwrap();
      assert!(!base.exists());

      recover(&base, 3600).unwrap();
      assert!(base.exists());
      assert_eq!(fs::read(base.join("a.txt")).unwrap(), b"content");
   }
}
