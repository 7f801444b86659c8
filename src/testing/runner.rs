//! Drives a `ScenarioFixture` against a real temp-directory repository.

use tempfile::TempDir;

use super::fixture::ScenarioFixture;
use crate::{
   cancel::CancellationToken,
   error::Result,
   events::{apply_event, replay},
   model::Specification,
   repository::Repository,
};

pub struct ScenarioReport {
   /// Kept alive so the directory isn't cleaned up before assertions run.
   pub repo_dir: TempDir,
   pub spec:     Specification,
}

pub fn run_scenario(fixture: &ScenarioFixture) -> Result<ScenarioReport> {
   let repo_dir = tempfile::tempdir()?;
   let repo = Repository::new(repo_dir.path());
   repo.init()?;
   repo.recover(&fixture.config)?;

   let cancel = CancellationToken::new();
   let mut spec = Specification::empty();
   for batch in &fixture.commits {
      for event in batch {
         apply_event(&mut spec, event)?;
      }
      repo.commit(&spec, batch, &fixture.config, &cancel)?;
   }

   let reloaded = repo.load()?;
   debug_assert_eq!(reloaded, spec, "scenario '{}': load() diverged from the folded state", fixture.name);

   Ok(ScenarioReport { repo_dir, spec: reloaded })
}

/// Replays every event ever committed from scratch and checks it matches
/// the fixture's final folded state — the universal "full replay equals
/// current state" invariant.
pub fn assert_full_replay_matches(fixture: &ScenarioFixture, report: &ScenarioReport) -> Result<()> {
   let all_events: Vec<_> = fixture.commits.iter().flatten().cloned().collect();
   let replayed = replay(&all_events)?;
   assert_eq!(replayed, report.spec, "full replay diverged from snapshot+tail load for '{}'", fixture.name);
   Ok(())
}

#[cfg(test)]
mod tests {
   use chrono::Utc;

   use super::*;
   use crate::{
      events::ChangelogEvent,
      ids,
      model::{AcceptanceCriterion, EarsType, Priority, ProjectMetadata, Requirement},
   };

   fn requirement(category: &str) -> Requirement {
      Requirement {
         id:          ids::requirement_id(category),
         ears_type:   EarsType::Event,
         category:    category.to_string(),
         description: "The system shall support this feature.".to_string(),
         rationale:   "Users asked for it directly.".to_string(),
         priority:    Priority::Medium,
         created_at:  Utc::now(),
         criteria:    vec![AcceptanceCriterion::Assertion {
            id:        ids::criterion_id(),
            statement: "the feature behaves as described".to_string(),
         }],
      }
   }

   #[test]
   fn new_project_scenario_yields_metadata_and_two_requirements() {
      let auth = requirement("AUTH");
      let tasks = requirement("TASKS");
      let fixture = ScenarioFixture::new("new_project").then_commit(vec![
         ChangelogEvent::ProjectMetadataUpdated {
            event_id:     ids::event_id(),
            timestamp:    Utc::now(),
            old_metadata: None,
            new_metadata: ProjectMetadata {
               name:        "TaskMaster".to_string(),
               description: "A task manager with OAuth login.".to_string(),
               version:     semver::Version::new(0, 0, 0),
               created_at:  Utc::now(),
               updated_at:  Utc::now(),
            },
         },
         ChangelogEvent::RequirementAdded { event_id: ids::event_id(), timestamp: Utc::now(), requirement: auth },
         ChangelogEvent::RequirementAdded { event_id: ids::event_id(), timestamp: Utc::now(), requirement: tasks },
         ChangelogEvent::VersionBumped {
            event_id:    ids::event_id(),
            timestamp:   Utc::now(),
            old_version: semver::Version::new(0, 0, 0),
            new_version: semver::Version::new(0, 1, 0),
            bump_type:   crate::model::BumpType::Minor,
            reasoning:   "new feature set".to_string(),
         },
      ]);

      let report = run_scenario(&fixture).unwrap();
      assert_eq!(report.spec.requirements.len(), 2);
      assert_eq!(report.spec.categories, vec!["AUTH".to_string(), "TASKS".to_string()]);
      assert_eq!(report.spec.metadata.as_ref().unwrap().version, semver::Version::new(0, 1, 0));
      assert_full_replay_matches(&fixture, &report).unwrap();
   }

   #[test]
   fn add_then_remove_scenario_drops_the_category() {
      let auth = requirement("AUTH");
      let auth_id = auth.id.clone();
      let fixture = ScenarioFixture::new("add_then_remove")
         .then_commit(vec![ChangelogEvent::RequirementAdded {
            event_id:    ids::event_id(),
            timestamp:   Utc::now(),
            requirement: auth.clone(),
         }])
         .then_commit(vec![ChangelogEvent::RequirementDeleted {
            event_id:       ids::event_id(),
            timestamp:      Utc::now(),
            requirement_id: auth_id,
            removed:        auth,
         }]);

      let report = run_scenario(&fixture).unwrap();
      assert!(report.spec.requirements.is_empty());
      assert!(report.spec.categories.is_empty());
   }

   #[test]
   fn snapshot_trigger_scenario_cuts_a_snapshot_after_threshold() {
      let config = crate::config::XddConfig { snapshot_event_threshold: 5, ..crate::config::XddConfig::default() };
      let mut fixture = ScenarioFixture::new("snapshot_trigger").with_config(config);
      for i in 0..5 {
         fixture = fixture.then_commit(vec![ChangelogEvent::RequirementAdded {
            event_id:    ids::event_id(),
            timestamp:   Utc::now(),
            requirement: requirement(&format!("CAT{i}")),
         }]);
      }

      let report = run_scenario(&fixture).unwrap();
      let changelog_path = report.repo_dir.path().join(".xdd/01-specs/changelog.yaml");
      let changelog =
         crate::codec::decode_changelog(&std::fs::read_to_string(changelog_path).unwrap()).unwrap();
      assert!(changelog.last_snapshot.is_some());
      assert_eq!(changelog.events_since_snapshot, 0);
   }
}
