//! Scenario fixture definitions: named batches of events to commit in
//! sequence, against a fresh repository.

use crate::{config::XddConfig, events::ChangelogEvent};

pub struct ScenarioFixture {
   pub name:    &'static str,
   /// Each element is one commit's worth of events, applied in order.
   pub commits: Vec<Vec<ChangelogEvent>>,
   pub config:  XddConfig,
}

impl ScenarioFixture {
   pub fn new(name: &'static str) -> Self {
      Self { name, commits: Vec::new(), config: XddConfig::default() }
   }

   pub fn with_config(mut self, config: XddConfig) -> Self {
      self.config = config;
      self
   }

   pub fn then_commit(mut self, events: Vec<ChangelogEvent>) -> Self {
      self.commits.push(events);
      self
   }
}
