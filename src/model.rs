//! Entity types and structural validation for the specification document.

use chrono::{DateTime, Utc};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::error::{Result, XddError};

fn validation(field: &str, reason: impl Into<String>) -> XddError {
   XddError::Validation { field: field.to_string(), reason: reason.into() }
}

fn check_len(field: &str, s: &str, min: usize, max: usize) -> Result<()> {
   let len = s.chars().count();
   if len < min || len > max {
      return Err(validation(field, format!("length {len} not in [{min}, {max}]")));
   }
   Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarsType {
   Ubiquitous,
   Event,
   State,
   Optional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
   Critical,
   High,
   Medium,
   Low,
}

impl Priority {
   pub const fn as_str(self) -> &'static str {
      match self {
         Self::Critical => "critical",
         Self::High => "high",
         Self::Medium => "medium",
         Self::Low => "low",
      }
   }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BumpType {
   Major,
   Minor,
   Patch,
}

/// An acceptance criterion attached to a requirement: either a
/// given/when/then behavioral triple, or a single assertion statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AcceptanceCriterion {
   Behavioral { id: String, given: String, when: String, then: String },
   Assertion { id: String, statement: String },
}

impl AcceptanceCriterion {
   pub fn id(&self) -> &str {
      match self {
         Self::Behavioral { id, .. } | Self::Assertion { id, .. } => id,
      }
   }

   pub fn validate(&self) -> Result<()> {
      match self {
         Self::Behavioral { given, when, then, .. } => {
            check_len("given", given, 1, 200)?;
            check_len("when", when, 1, 200)?;
            check_len("then", then, 1, 200)?;
         },
         Self::Assertion { statement, .. } => {
            check_len("statement", statement, 1, 200)?;
         },
      }
      Ok(())
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
   pub id:          String,
   pub ears_type:   EarsType,
   pub category:    String,
   pub description: String,
   pub rationale:   String,
   pub priority:    Priority,
   pub created_at:  DateTime<Utc>,
   pub criteria:    Vec<AcceptanceCriterion>,
}

impl Requirement {
   pub fn validate(&self) -> Result<()> {
      if self.category.is_empty()
         || self.category.len() > 20
         || !self.category.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
      {
         return Err(validation("category", format!("'{}' must be 1-20 uppercase alphanumeric chars", self.category)));
      }
      check_len("description", &self.description, 10, 500)?;
      check_len("rationale", &self.rationale, 10, 500)?;
      if self.criteria.is_empty() || self.criteria.len() > 10 {
         return Err(validation("criteria", format!("{} criteria not in [1, 10]", self.criteria.len())));
      }
      for criterion in &self.criteria {
         criterion.validate()?;
      }
      Ok(())
   }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMetadata {
   pub name:        String,
   pub description: String,
   pub version:     Version,
   pub created_at:  DateTime<Utc>,
   pub updated_at:  DateTime<Utc>,
}

impl ProjectMetadata {
   pub fn validate(&self) -> Result<()> {
      check_len("name", &self.name, 1, 100)?;
      check_len("description", &self.description, 10, 1000)?;
      Ok(())
   }
}

/// The materialized specification: project metadata, the ordered list of
/// requirements, and the set of categories currently in use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Specification {
   pub metadata:     Option<ProjectMetadata>,
   pub requirements: Vec<Requirement>,
   pub categories:   Vec<String>,
}

impl Specification {
   pub fn empty() -> Self {
      Self::default()
   }

   pub fn find_requirement(&self, id: &str) -> Option<&Requirement> {
      self.requirements.iter().find(|r| r.id == id)
   }

   pub fn find_requirement_mut(&mut self, id: &str) -> Option<&mut Requirement> {
      self.requirements.iter_mut().find(|r| r.id == id)
   }

   /// Re-derives `categories` from the categories actually referenced by
   /// `requirements`, preserving the first-seen order, then appends any
   /// categories in `proactive` not already present.
   pub fn recompute_categories(&mut self, proactive: &[String]) {
      let mut seen: Vec<String> = Vec::new();
      for req in &self.requirements {
         if !seen.contains(&req.category) {
            seen.push(req.category.clone());
         }
      }
      for cat in proactive {
         if !seen.contains(cat) {
            seen.push(cat.clone());
         }
      }
      self.categories = seen;
   }

   pub fn validate(&self) -> Result<()> {
      if let Some(metadata) = &self.metadata {
         metadata.validate()?;
      }
      let mut ids = std::collections::HashSet::new();
      for req in &self.requirements {
         req.validate()?;
         if !ids.insert(req.id.clone()) {
            return Err(XddError::Conflict(format!("duplicate requirement id {}", req.id)));
         }
         let mut criterion_ids = std::collections::HashSet::new();
         for criterion in &req.criteria {
            if !criterion_ids.insert(criterion.id().to_string()) {
               return Err(XddError::Conflict(format!("duplicate criterion id {}", criterion.id())));
            }
         }
      }
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   fn sample_criterion() -> AcceptanceCriterion {
      AcceptanceCriterion::Behavioral {
         id:    "AC-1".into(),
         given: "a logged-out user".into(),
         when:  "they submit valid credentials".into(),
         then:  "they are redirected to the dashboard".into(),
      }
   }

   fn sample_requirement(id: &str, category: &str) -> Requirement {
      Requirement {
         id:          id.to_string(),
         ears_type:   EarsType::Event,
         category:    category.to_string(),
         description: "The system shall authenticate users.".to_string(),
         rationale:   "Needed to protect user data.".to_string(),
         priority:    Priority::High,
         created_at:  Utc::now(),
         criteria:    vec![sample_criterion()],
      }
   }

   #[test]
   fn requirement_with_too_short_description_fails() {
      let mut req = sample_requirement("REQ-AUTH-1", "AUTH");
      req.description = "short".to_string();
      assert!(req.validate().is_err());
   }

   #[test]
   fn requirement_needs_at_least_one_criterion() {
      let mut req = sample_requirement("REQ-AUTH-1", "AUTH");
      req.criteria.clear();
      assert!(req.validate().is_err());
   }

   #[test]
   fn duplicate_requirement_ids_are_rejected() {
      let mut spec = Specification::empty();
      spec.requirements.push(sample_requirement("REQ-AUTH-1", "AUTH"));
      spec.requirements.push(sample_requirement("REQ-AUTH-1", "AUTH"));
      assert!(matches!(spec.validate(), Err(XddError::Conflict(_))));
   }

   #[test]
   fn recompute_categories_keeps_insertion_order_and_drops_unused() {
      let mut spec = Specification::empty();
      spec.requirements.push(sample_requirement("REQ-TASKS-1", "TASKS"));
      spec.requirements.push(sample_requirement("REQ-AUTH-1", "AUTH"));
      spec.recompute_categories(&[]);
      assert_eq!(spec.categories, vec!["TASKS".to_string(), "AUTH".to_string()]);
   }
}
