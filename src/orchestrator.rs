//! The five-stage LLM pipeline: Metadata → RequirementsDelta →
//! Categorization → RequirementGeneration → VersionBump. Runs strictly in
//! order, since each stage's prompt depends on the previous stage's output,
//! and accumulates a batch of changelog events.

use chrono::Utc;
use indexmap::IndexMap;
use rayon::prelude::*;
use semver::Version;
use serde::Deserialize;
use tera::Context;

use crate::{
   cancel::CancellationToken,
   config::XddConfig,
   error::{Result, XddError},
   events::ChangelogEvent,
   ids,
   llm::LlmClient,
   model::{AcceptanceCriterion, BumpType, EarsType, Priority, ProjectMetadata, Requirement, Specification},
   task_runner::run_task,
   templates::render_prompt,
};

pub struct OrchestrationResult {
   pub events:   Vec<ChangelogEvent>,
   pub spec:     Specification,
}

pub fn run(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   user_prompt: &str,
   cancel: &CancellationToken,
) -> Result<OrchestrationResult> {
   let mut working = spec.clone();
   let mut events = Vec::new();

   if let Some(metadata_event) = run_metadata_stage(client, config, &working, user_prompt, cancel)? {
      apply(&mut working, &metadata_event)?;
      events.push(metadata_event);
   }

   let delta = run_requirements_delta_stage(client, config, &working, user_prompt, cancel)?;

   for removal in &delta.to_remove {
      cancel.check()?;
      let Some(requirement) = working.find_requirement(&removal.id).cloned() else {
         continue;
      };
      let event = ChangelogEvent::RequirementDeleted {
         event_id:       ids::event_id(),
         timestamp:      Utc::now(),
         requirement_id: removal.id.clone(),
         removed:        requirement,
      };
      apply(&mut working, &event)?;
      events.push(event);
   }

   if !delta.to_add.is_empty() {
      let assignments = run_categorization_stage(client, config, &working, &delta.to_add, cancel)?;
      let generated = run_requirement_generation_stage(client, config, &working, &delta.to_add, &assignments, cancel)?;
      for event in generated {
         apply(&mut working, &event)?;
         events.push(event);
      }
   }

   if !events.is_empty() {
      let version_event =
         run_version_bump_stage(client, config, &working, &delta, events.iter().any(is_metadata_update), cancel)?;
      apply(&mut working, &version_event)?;
      events.push(version_event);
   }

   Ok(OrchestrationResult { events, spec: working })
}

fn is_metadata_update(event: &ChangelogEvent) -> bool {
   matches!(event, ChangelogEvent::ProjectMetadataUpdated { .. })
}

fn apply(spec: &mut Specification, event: &ChangelogEvent) -> Result<()> {
   crate::events::apply_event(spec, event)
}

#[derive(Debug, Deserialize)]
struct MetadataStageOutput {
   name:        String,
   description: String,
   changed:     MetadataChanged,
   #[allow(dead_code, reason = "surfaced for user-facing preview, not structurally required")]
   reasoning:   String,
}

#[derive(Debug, Deserialize)]
struct MetadataChanged {
   name:        bool,
   description: bool,
}

fn run_metadata_stage(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   user_prompt: &str,
   cancel: &CancellationToken,
) -> Result<Option<ChangelogEvent>> {
   let current = spec.metadata.clone().unwrap_or_else(|| ProjectMetadata {
      name:        String::new(),
      description: String::new(),
      version:     Version::new(0, 0, 0),
      created_at:  Utc::now(),
      updated_at:  Utc::now(),
   });

   let mut ctx = Context::new();
   ctx.insert("current_name", &current.name);
   ctx.insert("current_description", &current.description);
   ctx.insert("user_prompt", user_prompt);
   let prompt = render_prompt("metadata", &config.prompt_variant, &ctx)?;

   let model = config.model_for_stage(&config.metadata_model);
   let output: MetadataStageOutput = run_task(client, config, model, &prompt, cancel, |out: &MetadataStageOutput| {
      if out.name.is_empty() || out.name.chars().count() > 100 {
         return Err(XddError::Validation { field: "name".to_string(), reason: "must be 1-100 chars".to_string() });
      }
      if out.description.chars().count() < 10 || out.description.chars().count() > 1000 {
         return Err(XddError::Validation {
            field:  "description".to_string(),
            reason: "must be 10-1000 chars".to_string(),
         });
      }
      Ok(())
   })?;

   if !output.changed.name && !output.changed.description && spec.metadata.is_some() {
      return Ok(None);
   }

   let now = Utc::now();
   let new_metadata = ProjectMetadata {
      name:        output.name,
      description: output.description,
      version:     current.version.clone(),
      created_at:  if spec.metadata.is_some() { current.created_at } else { now },
      updated_at:  now,
   };

   Ok(Some(ChangelogEvent::ProjectMetadataUpdated {
      event_id:     ids::event_id(),
      timestamp:    now,
      old_metadata: spec.metadata.clone(),
      new_metadata,
   }))
}

#[derive(Debug, Deserialize)]
struct RemovalCandidate {
   id:        String,
   #[allow(dead_code, reason = "surfaced for user-facing preview, not structurally required")]
   reasoning: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdditionCandidate {
   pub category:           String,
   pub brief_description:  String,
   pub ears_type:           EarsType,
   pub estimated_priority: Priority,
   #[allow(dead_code, reason = "surfaced for user-facing preview, not structurally required")]
   pub reasoning:          String,
}

#[derive(Debug, Deserialize)]
struct AmbiguousModification {
   possible_targets: Vec<String>,
   clarification:    String,
}

#[derive(Debug, Deserialize)]
struct RequirementsDeltaOutput {
   to_remove:               Vec<RemovalCandidate>,
   to_add:                  Vec<AdditionCandidate>,
   ambiguous_modifications: Vec<AmbiguousModification>,
}

struct RequirementsDelta {
   to_remove: Vec<RemovalCandidate>,
   to_add:    Vec<AdditionCandidate>,
}

fn run_requirements_delta_stage(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   user_prompt: &str,
   cancel: &CancellationToken,
) -> Result<RequirementsDelta> {
   let requirements_desc = spec
      .requirements
      .iter()
      .map(|r| format!("- {} [{}]: {}", r.id, r.category, r.description))
      .collect::<Vec<_>>()
      .join("\n");

   let mut ctx = Context::new();
   ctx.insert("categories", &spec.categories.join(", "));
   ctx.insert("requirements", &requirements_desc);
   ctx.insert("user_prompt", user_prompt);
   let prompt = render_prompt("requirements_delta", &config.prompt_variant, &ctx)?;

   let model = config.model_for_stage(&config.requirements_model);
   let output: RequirementsDeltaOutput = run_task(client, config, model, &prompt, cancel, |out: &RequirementsDeltaOutput| {
      for add in &out.to_add {
         if add.category.is_empty()
            || add.category.len() > 20
            || !add.category.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
         {
            return Err(XddError::Validation {
               field:  "to_add.category".to_string(),
               reason: format!("'{}' must be 1-20 uppercase alphanumeric chars", add.category),
            });
         }
      }
      Ok(())
   })?;

   if let Some(first) = output.ambiguous_modifications.into_iter().next() {
      return Err(XddError::AmbiguousEdit {
         clarification:    first.clarification,
         possible_targets: first.possible_targets,
      });
   }

   Ok(RequirementsDelta { to_remove: output.to_remove, to_add: output.to_add })
}

#[derive(Debug, Deserialize)]
struct CategorizationOutput {
   #[allow(dead_code, reason = "category descriptions are for prompt context only; not persisted directly")]
   categories:  Vec<CategoryInfo>,
   assignments: IndexMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CategoryInfo {
   name:  String,
   #[allow(dead_code, reason = "not persisted; informs the model's own consistency check")]
   description: String,
   #[allow(dead_code, reason = "not persisted; informs the model's own consistency check")]
   count: usize,
}

fn run_categorization_stage(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   to_add: &[AdditionCandidate],
   cancel: &CancellationToken,
) -> Result<IndexMap<String, String>> {
   let briefs = to_add.iter().map(|c| format!("- {}", c.brief_description)).collect::<Vec<_>>().join("\n");
   let (project_name, project_description) = spec
      .metadata
      .as_ref()
      .map(|m| (m.name.clone(), m.description.clone()))
      .unwrap_or_default();

   let mut ctx = Context::new();
   ctx.insert("project_name", &project_name);
   ctx.insert("project_description", &project_description);
   ctx.insert("briefs", &briefs);
   let prompt = render_prompt("categorization", &config.prompt_variant, &ctx)?;

   let model = config.model_for_stage(&config.categorization_model);
   let briefs_owned: Vec<String> = to_add.iter().map(|c| c.brief_description.clone()).collect();
   let output: CategorizationOutput = run_task(client, config, model, &prompt, cancel, |out: &CategorizationOutput| {
      let known_categories: Vec<&str> = out.categories.iter().map(|c| c.name.as_str()).collect();
      for brief in &briefs_owned {
         let Some(category) = out.assignments.get(brief) else {
            return Err(XddError::Validation {
               field:  "assignments".to_string(),
               reason: format!("missing assignment for brief '{brief}'"),
            });
         };
         if !known_categories.contains(&category.as_str()) {
            return Err(XddError::Validation {
               field:  "assignments".to_string(),
               reason: format!("category '{category}' not declared in categories"),
            });
         }
      }
      Ok(())
   })?;

   Ok(output.assignments)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GeneratedCriterion {
   Behavioral { given: String, when: String, then: String },
   Assertion { statement: String },
}

#[derive(Debug, Deserialize)]
struct GeneratedRequirement {
   description: String,
   rationale:   String,
   priority:    Priority,
   criteria:    Vec<GeneratedCriterion>,
}

fn run_requirement_generation_stage(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   to_add: &[AdditionCandidate],
   assignments: &IndexMap<String, String>,
   cancel: &CancellationToken,
) -> Result<Vec<ChangelogEvent>> {
   let (project_name, project_description) = spec
      .metadata
      .as_ref()
      .map(|m| (m.name.clone(), m.description.clone()))
      .unwrap_or_default();
   let model = config.model_for_stage(&config.generation_model).to_string();

   let results: Vec<Result<ChangelogEvent>> = to_add
      .par_iter()
      .map(|candidate| {
         cancel.check()?;
         let category = assignments.get(&candidate.brief_description).cloned().unwrap_or_else(|| candidate.category.clone());

         let mut ctx = Context::new();
         ctx.insert("project_name", &project_name);
         ctx.insert("project_description", &project_description);
         ctx.insert("category", &category);
         ctx.insert("ears_type", &format!("{:?}", candidate.ears_type).to_lowercase());
         ctx.insert("brief_description", &candidate.brief_description);
         ctx.insert("estimated_priority", candidate.estimated_priority.as_str());
         let prompt = render_prompt("requirement_generation", &config.prompt_variant, &ctx)?;

         let generated: GeneratedRequirement = run_task(client, config, &model, &prompt, cancel, |out: &GeneratedRequirement| {
            if out.description.chars().count() < 10 || out.description.chars().count() > 500 {
               return Err(XddError::Validation {
                  field:  "description".to_string(),
                  reason: "must be 10-500 chars".to_string(),
               });
            }
            if out.criteria.is_empty() || out.criteria.len() > 10 {
               return Err(XddError::Validation {
                  field:  "criteria".to_string(),
                  reason: format!("{} criteria not in [1, 10]", out.criteria.len()),
               });
            }
            Ok(())
         })?;

         let criteria = generated
            .criteria
            .into_iter()
            .map(|c| match c {
               GeneratedCriterion::Behavioral { given, when, then } => {
                  AcceptanceCriterion::Behavioral { id: ids::criterion_id(), given, when, then }
               },
               GeneratedCriterion::Assertion { statement } => {
                  AcceptanceCriterion::Assertion { id: ids::criterion_id(), statement }
               },
            })
            .collect();

         let requirement = Requirement {
            id:          ids::requirement_id(&category),
            ears_type:   candidate.ears_type,
            category,
            description: generated.description,
            rationale:   generated.rationale,
            priority:    generated.priority,
            created_at:  Utc::now(),
            criteria,
         };

         Ok(ChangelogEvent::RequirementAdded { event_id: ids::event_id(), timestamp: Utc::now(), requirement })
      })
      .collect();

   results.into_iter().collect()
}

#[derive(Debug, Deserialize)]
struct VersionBumpOutput {
   new_version: String,
   bump_type:   BumpType,
   reasoning:   String,
}

fn run_version_bump_stage(
   client: &LlmClient,
   config: &XddConfig,
   spec: &Specification,
   delta: &RequirementsDelta,
   metadata_changed: bool,
   cancel: &CancellationToken,
) -> Result<ChangelogEvent> {
   let current_version =
      spec.metadata.as_ref().map(|m| m.version.clone()).unwrap_or_else(|| Version::new(0, 0, 0));

   let mut ctx = Context::new();
   ctx.insert("current_version", &current_version.to_string());
   ctx.insert("added_count", &delta.to_add.len());
   ctx.insert("removed_count", &delta.to_remove.len());
   ctx.insert("metadata_changed", &metadata_changed);
   let prompt = render_prompt("version_bump", &config.prompt_variant, &ctx)?;

   let model = config.model_for_stage(&config.version_bump_model);
   let current_for_validation = current_version.clone();
   let output: VersionBumpOutput = run_task(client, config, model, &prompt, cancel, move |out: &VersionBumpOutput| {
      let parsed = Version::parse(&out.new_version)
         .map_err(|e| XddError::InvalidVersion { version: out.new_version.clone(), reason: e.to_string() })?;
      if parsed <= current_for_validation {
         return Err(XddError::InvalidVersion {
            version: out.new_version.clone(),
            reason:  "must be strictly greater than the current version".to_string(),
         });
      }
      Ok(())
   })?;

   let new_version = Version::parse(&output.new_version)
      .map_err(|e| XddError::InvalidVersion { version: output.new_version.clone(), reason: e.to_string() })?;

   Ok(ChangelogEvent::VersionBumped {
      event_id: ids::event_id(),
      timestamp: Utc::now(),
      old_version: current_version,
      new_version,
      bump_type: output.bump_type,
      reasoning: output.reasoning,
   })
}
