//! YAML encoding and decoding for the specification, changelog, and
//! snapshots.
//!
//! The polymorphic `AcceptanceCriterion` and `ChangelogEvent` sums carry an
//! explicit `type`/`event_type` discriminator at rest (see their `Serialize`
//! derives in `model` and `events`); an unrecognized discriminator surfaces
//! as a decode error rather than being silently dropped.

use crate::{
   error::{Result, XddError},
   events::Changelog,
   model::Specification,
};

pub fn encode_specification(spec: &Specification) -> Result<String> {
   serde_yaml::to_string(spec).map_err(XddError::from)
}

pub fn decode_specification(text: &str) -> Result<Specification> {
   serde_yaml::from_str(text).map_err(XddError::from)
}

pub fn encode_changelog(changelog: &Changelog) -> Result<String> {
   serde_yaml::to_string(changelog).map_err(XddError::from)
}

pub fn decode_changelog(text: &str) -> Result<Changelog> {
   serde_yaml::from_str(text).map_err(XddError::from)
}

/// Snapshots are materialized specifications; the wire shape is identical.
pub fn encode_snapshot(spec: &Specification) -> Result<String> {
   encode_specification(spec)
}

pub fn decode_snapshot(text: &str) -> Result<Specification> {
   decode_specification(text)
}
