//! The changelog event sum and the pure fold that applies events to a
//! specification.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::{
   error::{Result, XddError},
   model::{AcceptanceCriterion, ProjectMetadata, Requirement, Specification},
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ChangelogEvent {
   RequirementAdded {
      event_id:    String,
      timestamp:   DateTime<Utc>,
      requirement: Requirement,
   },
   RequirementDeleted {
      event_id:       String,
      timestamp:      DateTime<Utc>,
      requirement_id: String,
      removed:        Requirement,
   },
   AcceptanceCriterionAdded {
      event_id:       String,
      timestamp:      DateTime<Utc>,
      requirement_id: String,
      criterion:      AcceptanceCriterion,
   },
   AcceptanceCriterionDeleted {
      event_id:       String,
      timestamp:      DateTime<Utc>,
      requirement_id: String,
      criterion_id:   String,
      removed:        AcceptanceCriterion,
   },
   CategoryAdded {
      event_id:  String,
      timestamp: DateTime<Utc>,
      name:      String,
   },
   CategoryDeleted {
      event_id:  String,
      timestamp: DateTime<Utc>,
      name:      String,
   },
   CategoryRenamed {
      event_id:  String,
      timestamp: DateTime<Utc>,
      old_name:  String,
      new_name:  String,
   },
   ProjectMetadataUpdated {
      event_id:     String,
      timestamp:    DateTime<Utc>,
      old_metadata: Option<ProjectMetadata>,
      new_metadata: ProjectMetadata,
   },
   VersionBumped {
      event_id:    String,
      timestamp:   DateTime<Utc>,
      old_version: Version,
      new_version: Version,
      bump_type:   crate::model::BumpType,
      reasoning:   String,
   },
}

impl ChangelogEvent {
   pub const fn event_id(&self) -> &str {
      match self {
         Self::RequirementAdded { event_id, .. }
         | Self::RequirementDeleted { event_id, .. }
         | Self::AcceptanceCriterionAdded { event_id, .. }
         | Self::AcceptanceCriterionDeleted { event_id, .. }
         | Self::CategoryAdded { event_id, .. }
         | Self::CategoryDeleted { event_id, .. }
         | Self::CategoryRenamed { event_id, .. }
         | Self::ProjectMetadataUpdated { event_id, .. }
         | Self::VersionBumped { event_id, .. } => event_id,
      }
   }

   pub const fn timestamp(&self) -> DateTime<Utc> {
      match self {
         Self::RequirementAdded { timestamp, .. }
         | Self::RequirementDeleted { timestamp, .. }
         | Self::AcceptanceCriterionAdded { timestamp, .. }
         | Self::AcceptanceCriterionDeleted { timestamp, .. }
         | Self::CategoryAdded { timestamp, .. }
         | Self::CategoryDeleted { timestamp, .. }
         | Self::CategoryRenamed { timestamp, .. }
         | Self::ProjectMetadataUpdated { timestamp, .. }
         | Self::VersionBumped { timestamp, .. } => *timestamp,
      }
   }
}

/// Categories currently present that no requirement references — these were
/// added proactively (via `CategoryAdded`, or survived a rename) and must
/// not be dropped by an unrelated requirement fold.
fn proactive_categories(spec: &Specification) -> Vec<String> {
   spec.categories.iter().filter(|c| !spec.requirements.iter().any(|r| &r.category == *c)).cloned().collect()
}

/// Applies one event to `spec` in place, enforcing the invariant that event
/// maintains. Returns `Conflict` if the event targets state that does not
/// exist, or state that already exists and shouldn't.
pub fn apply_event(spec: &mut Specification, event: &ChangelogEvent) -> Result<()> {
   match event {
      ChangelogEvent::RequirementAdded { requirement, .. } => {
         if spec.find_requirement(&requirement.id).is_some() {
            return Err(XddError::Conflict(format!("requirement {} already exists", requirement.id)));
         }
         let proactive = proactive_categories(spec);
         spec.requirements.push(requirement.clone());
         spec.recompute_categories(&proactive);
      },
      ChangelogEvent::RequirementDeleted { requirement_id, .. } => {
         let proactive = proactive_categories(spec);
         let before = spec.requirements.len();
         spec.requirements.retain(|r| &r.id != requirement_id);
         if spec.requirements.len() == before {
            return Err(XddError::Conflict(format!("requirement {requirement_id} not found")));
         }
         spec.recompute_categories(&proactive);
      },
      ChangelogEvent::AcceptanceCriterionAdded { requirement_id, criterion, .. } => {
         let req = spec
            .find_requirement_mut(requirement_id)
            .ok_or_else(|| XddError::Conflict(format!("requirement {requirement_id} not found")))?;
         if req.criteria.iter().any(|c| c.id() == criterion.id()) {
            return Err(XddError::Conflict(format!("criterion {} already exists", criterion.id())));
         }
         req.criteria.push(criterion.clone());
      },
      ChangelogEvent::AcceptanceCriterionDeleted { requirement_id, criterion_id, .. } => {
         let req = spec
            .find_requirement_mut(requirement_id)
            .ok_or_else(|| XddError::Conflict(format!("requirement {requirement_id} not found")))?;
         let before = req.criteria.len();
         req.criteria.retain(|c| c.id() != criterion_id);
         if req.criteria.len() == before {
            return Err(XddError::Conflict(format!("criterion {criterion_id} not found")));
         }
      },
      ChangelogEvent::CategoryAdded { name, .. } => {
         if !spec.categories.contains(name) {
            spec.categories.push(name.clone());
         }
      },
      ChangelogEvent::CategoryDeleted { name, .. } => {
         spec.categories.retain(|c| c != name);
      },
      ChangelogEvent::CategoryRenamed { old_name, new_name, .. } => {
         let mut proactive = proactive_categories(spec);
         for cat in &mut proactive {
            if cat == old_name {
               cat.clone_from(new_name);
            }
         }
         for req in &mut spec.requirements {
            if req.category == *old_name {
               req.category = new_name.clone();
            }
         }
         spec.recompute_categories(&proactive);
      },
      ChangelogEvent::ProjectMetadataUpdated { new_metadata, .. } => {
         spec.metadata = Some(new_metadata.clone());
      },
      ChangelogEvent::VersionBumped { new_version, .. } => {
         let metadata =
            spec.metadata.as_mut().ok_or_else(|| XddError::Conflict("no metadata to bump version on".to_string()))?;
         metadata.version = new_version.clone();
      },
   }
   Ok(())
}

/// Folds `events` onto an empty specification, in timestamp order (stable
/// ties broken by event id), returning the materialized result.
pub fn replay(events: &[ChangelogEvent]) -> Result<Specification> {
   replay_onto(Specification::empty(), events)
}

/// Folds `events` onto `base`, in timestamp order (stable ties broken by
/// event id).
pub fn replay_onto(mut base: Specification, events: &[ChangelogEvent]) -> Result<Specification> {
   let mut ordered: Vec<&ChangelogEvent> = events.iter().collect();
   ordered.sort_by(|a, b| a.timestamp().cmp(&b.timestamp()).then_with(|| a.event_id().cmp(b.event_id())));
   for event in ordered {
      apply_event(&mut base, event)?;
   }
   Ok(base)
}

/// The on-disk changelog document: event log plus snapshot bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Changelog {
   pub version:               String,
   pub last_snapshot:         Option<String>,
   pub events_since_snapshot: usize,
   pub events:                Vec<ChangelogEvent>,
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::model::{EarsType, Priority};

   fn requirement(id: &str, category: &str) -> Requirement {
      Requirement {
         id:          id.to_string(),
         ears_type:   EarsType::Event,
         category:    category.to_string(),
         description: "The system shall do a thing.".to_string(),
         rationale:   "Because users need it.".to_string(),
         priority:    Priority::Medium,
         created_at:  Utc::now(),
         criteria:    vec![AcceptanceCriterion::Assertion {
            id:        "AC-1".into(),
            statement: "the thing happens".into(),
         }],
      }
   }

   #[test]
   fn replay_of_empty_log_is_empty_spec() {
      let spec = replay(&[]).unwrap();
      assert_eq!(spec, Specification::empty());
   }

   #[test]
   fn adding_then_deleting_a_requirement_removes_its_sole_category() {
      let events = vec![
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-1".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
         ChangelogEvent::RequirementDeleted {
            event_id:       "EVT-2".into(),
            timestamp:      Utc::now(),
            requirement_id: "REQ-AUTH-1".into(),
            removed:        requirement("REQ-AUTH-1", "AUTH"),
         },
      ];
      let spec = replay(&events).unwrap();
      assert!(spec.requirements.is_empty());
      assert!(spec.categories.is_empty());
   }

   #[test]
   fn duplicate_requirement_added_is_a_conflict() {
      let events = vec![
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-1".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-2".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
      ];
      assert!(matches!(replay(&events), Err(XddError::Conflict(_))));
   }

   #[test]
   fn category_renamed_updates_every_requirement_with_the_old_category() {
      let events = vec![
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-1".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
         ChangelogEvent::CategoryRenamed {
            event_id:  "EVT-2".into(),
            timestamp: Utc::now(),
            old_name:  "AUTH".into(),
            new_name:  "SECURITY".into(),
         },
      ];
      let spec = replay(&events).unwrap();
      assert_eq!(spec.requirements[0].category, "SECURITY");
      assert_eq!(spec.categories, vec!["SECURITY".to_string()]);
   }

   #[test]
   fn proactively_added_category_survives_unrelated_requirement_events() {
      let events = vec![
         ChangelogEvent::CategoryAdded { event_id: "EVT-1".into(), timestamp: Utc::now(), name: "BILLING".into() },
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-2".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
      ];
      let spec = replay(&events).unwrap();
      assert!(spec.categories.contains(&"BILLING".to_string()));
      assert!(spec.categories.contains(&"AUTH".to_string()));
   }

   #[test]
   fn proactive_category_is_pruned_only_by_explicit_category_deleted() {
      let events = vec![
         ChangelogEvent::CategoryAdded { event_id: "EVT-1".into(), timestamp: Utc::now(), name: "BILLING".into() },
         ChangelogEvent::RequirementAdded {
            event_id:    "EVT-2".into(),
            timestamp:   Utc::now(),
            requirement: requirement("REQ-AUTH-1", "AUTH"),
         },
         ChangelogEvent::CategoryDeleted { event_id: "EVT-3".into(), timestamp: Utc::now(), name: "BILLING".into() },
      ];
      let spec = replay(&events).unwrap();
      assert!(!spec.categories.contains(&"BILLING".to_string()));
      assert!(spec.categories.contains(&"AUTH".to_string()));
   }
}
