//! Top-level read/write API over the on-disk `.xdd/` tree: load via
//! snapshot + tail replay, commit via one copy-on-write transaction that
//! writes the specification, appends the changelog, and snapshots when due.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::{
   cancel::CancellationToken,
   codec,
   config::XddConfig,
   error::Result,
   events::{Changelog, ChangelogEvent, apply_event, replay_onto},
   model::Specification,
   snapshot::{parse_snapshot_name, should_snapshot, snapshot_name, tail_events},
   txn::{self, CopyOnWriteTx},
};

const SPEC_DIR: &str = "01-specs";
const SPEC_FILE: &str = "specification.yaml";
const CHANGELOG_FILE: &str = "changelog.yaml";
const SNAPSHOTS_DIR: &str = "snapshots";

pub struct Repository {
   root: PathBuf,
}

impl Repository {
   /// `root` is the repository base directory; the managed tree lives at
   /// `root/.xdd`.
   pub fn new(root: impl Into<PathBuf>) -> Self {
      Self { root: root.into() }
   }

   fn xdd_dir(&self) -> PathBuf {
      self.root.join(".xdd")
   }

   fn spec_rel(&self) -> PathBuf {
      Path::new(SPEC_DIR).join(SPEC_FILE)
   }

   fn changelog_rel(&self) -> PathBuf {
      Path::new(SPEC_DIR).join(CHANGELOG_FILE)
   }

   fn snapshot_rel(&self, name: &str) -> PathBuf {
      Path::new(SPEC_DIR).join(SNAPSHOTS_DIR).join(format!("{name}.yaml"))
   }

   /// Initializes an empty `.xdd/` skeleton. Idempotent.
   pub fn init(&self) -> Result<()> {
      std::fs::create_dir_all(self.xdd_dir().join(SPEC_DIR).join(SNAPSHOTS_DIR))?;
      Ok(())
   }

   /// Runs the crash-recovery sweep (stale `.tmp.*` removal, `.backup.*`
   /// restoration) for the managed tree. Should be called once per process
   /// before the first `load`/`commit`.
   pub fn recover(&self, config: &XddConfig) -> Result<()> {
      txn::recover(&self.xdd_dir(), config.tmp_sweep_age_secs)
   }

   /// Loads the current specification by replaying the latest snapshot (if
   /// any) plus the changelog tail. Returns an empty specification for a
   /// fresh repository.
   pub fn load(&self) -> Result<Specification> {
      let changelog_path = self.xdd_dir().join(self.changelog_rel());
      if !changelog_path.exists() {
         return Ok(Specification::empty());
      }
      let changelog = codec::decode_changelog(&std::fs::read_to_string(&changelog_path)?)?;

      let (base, snapshot_ts) = match &changelog.last_snapshot {
         Some(name) => {
            let snapshot_path = self.xdd_dir().join(self.snapshot_rel(name));
            let base = codec::decode_snapshot(&std::fs::read_to_string(&snapshot_path)?)?;
            (base, parse_snapshot_name(name))
         },
         None => (Specification::empty(), None),
      };

      let tail: Vec<ChangelogEvent> = tail_events(&changelog.events, snapshot_ts).into_iter().cloned().collect();
      replay_onto(base, &tail)
   }

   /// Commits `new_events` as the next batch. `new_spec` must equal the
   /// result of folding `new_events` onto the current specification — the
   /// caller (the orchestrator / session driver) builds it by applying each
   /// event in turn and passes the final state through.
   ///
   /// `cancel` is checked between write steps; if signalled mid-commit, the
   /// staged transaction is rolled back (leaving the on-disk tree untouched)
   /// and `Err(XddError::Cancelled)` is returned instead of installing a
   /// partial commit.
   pub fn commit(
      &self,
      new_spec: &Specification,
      new_events: &[ChangelogEvent],
      config: &XddConfig,
      cancel: &CancellationToken,
   ) -> Result<()> {
      new_spec.validate()?;

      let tx = CopyOnWriteTx::begin(&self.xdd_dir())?;
      std::fs::create_dir_all(self.xdd_dir().join(SPEC_DIR).join(SNAPSHOTS_DIR))?;

      if let Err(e) = self.stage_commit(&tx, new_spec, new_events, config, cancel) {
         tx.rollback()?;
         return Err(e);
      }

      tx.commit()
   }

   fn stage_commit(
      &self,
      tx: &CopyOnWriteTx,
      new_spec: &Specification,
      new_events: &[ChangelogEvent],
      config: &XddConfig,
      cancel: &CancellationToken,
   ) -> Result<()> {
      let changelog_rel = self.changelog_rel();
      let mut changelog = if tx.exists(&changelog_rel) {
         codec::decode_changelog(&tx.read_to_string(&changelog_rel)?)?
      } else {
         Changelog::default()
      };

      let snapshot_needed = should_snapshot(&changelog, new_events.len(), config);
      changelog.events.extend(new_events.iter().cloned());

      cancel.check()?;
      let spec_rel = self.spec_rel();
      tx.write_file(&spec_rel, codec::encode_specification(new_spec)?.as_bytes())?;

      if snapshot_needed {
         let name = snapshot_name(Utc::now());
         tx.write_file(self.snapshot_rel(&name), codec::encode_snapshot(new_spec)?.as_bytes())?;
         changelog.last_snapshot = Some(name);
         changelog.events_since_snapshot = 0;
      } else {
         changelog.events_since_snapshot += new_events.len();
      }

      cancel.check()?;
      tx.write_file(&changelog_rel, codec::encode_changelog(&changelog)?.as_bytes())
   }

   /// Appends events without rewriting the materialized specification file;
   /// used when only the event log (not its projection) needs updating.
   pub fn append_changelog(&self, new_events: &[ChangelogEvent]) -> Result<()> {
      let current = self.load()?;
      let mut folded = current.clone();
      for event in new_events {
         apply_event(&mut folded, event)?;
      }
      self.commit(&folded, new_events, &XddConfig::default(), &CancellationToken::new())
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::model::{EarsType, Priority};

   fn requirement_added(id: &str, category: &str) -> ChangelogEvent {
      ChangelogEvent::RequirementAdded {
         event_id:    crate::ids::event_id(),
         timestamp:   Utc::now(),
         requirement: crate::model::Requirement {
            id:          id.to_string(),
            ears_type:   EarsType::Event,
            category:    category.to_string(),
            description: "The system shall do a thing.".to_string(),
            rationale:   "Because users need it.".to_string(),
            priority:    Priority::Medium,
            created_at:  Utc::now(),
            criteria:    vec![crate::model::AcceptanceCriterion::Assertion {
               id:        crate::ids::criterion_id(),
               statement: "the thing happens".to_string(),
            }],
         },
      }
   }

   #[test]
   fn load_on_fresh_repository_is_empty() {
      let dir = tempfile::tempdir().unwrap();
      let repo = Repository::new(dir.path());
      repo.init().unwrap();
      assert_eq!(repo.load().unwrap(), Specification::empty());
   }

   #[test]
   fn commit_then_load_round_trips() {
      let dir = tempfile::tempdir().unwrap();
      let repo = Repository::new(dir.path());
      repo.init().unwrap();
      let config = XddConfig::default();

      let event = requirement_added("REQ-AUTH-1", "AUTH");
      let mut spec = Specification::empty();
      apply_event(&mut spec, &event).unwrap();

      repo.commit(&spec, &[event], &config, &CancellationToken::new()).unwrap();
      let loaded = repo.load().unwrap();
      assert_eq!(loaded, spec);
   }

   #[test]
   fn commit_past_snapshot_threshold_creates_a_snapshot() {
      let dir = tempfile::tempdir().unwrap();
      let repo = Repository::new(dir.path());
      repo.init().unwrap();
      let config = XddConfig { snapshot_event_threshold: 1, ..XddConfig::default() };

      let event = requirement_added("REQ-AUTH-1", "AUTH");
      let mut spec = Specification::empty();
      apply_event(&mut spec, &event).unwrap();
      repo.commit(&spec, &[event], &config, &CancellationToken::new()).unwrap();

      let changelog_path = dir.path().join(".xdd/01-specs/changelog.yaml");
      let changelog = codec::decode_changelog(&std::fs::read_to_string(changelog_path).unwrap()).unwrap();
      assert!(changelog.last_snapshot.is_some());
      assert_eq!(changelog.events_since_snapshot, 0);
   }

   #[test]
   fn commit_rolls_back_and_leaves_the_tree_untouched_when_cancelled() {
      let dir = tempfile::tempdir().unwrap();
      let repo = Repository::new(dir.path());
      repo.init().unwrap();
      let config = XddConfig::default();

      let event = requirement_added("REQ-AUTH-1", "AUTH");
      let mut spec = Specification::empty();
      apply_event(&mut spec, &event).unwrap();

      let cancel = CancellationToken::new();
      cancel.cancel();
      let result = repo.commit(&spec, &[event], &config, &cancel);

      assert!(matches!(result, Err(crate::error::XddError::Cancelled)));
      assert_eq!(repo.load().unwrap(), Specification::empty());
      let leftovers: Vec<_> = std::fs::read_dir(dir.path())
         .unwrap()
         .filter_map(|e| e.ok())
         .map(|e| e.file_name().to_string_lossy().to_string())
         .filter(|name| name.contains(".tmp.") || name.contains(".backup."))
         .collect();
      assert!(leftovers.is_empty(), "staging/backup directories left behind: {leftovers:?}");
   }
}
