//! Snapshot policy: when to cut a new snapshot, and how to select the tail
//! of events that still need replaying on top of one.

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::{
   config::XddConfig,
   events::{Changelog, ChangelogEvent},
};

pub const SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

/// Names a snapshot file (without extension) for `at`.
pub fn snapshot_name(at: DateTime<Utc>) -> String {
   at.format(SNAPSHOT_TIMESTAMP_FORMAT).to_string()
}

/// Parses a snapshot name back into its timestamp.
pub fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
   NaiveDateTime::parse_from_str(name, SNAPSHOT_TIMESTAMP_FORMAT).ok().map(|naive| naive.and_utc())
}

/// True when, after committing one more batch of events, a new snapshot
/// should be cut: either the event-count threshold is reached, or a full
/// replay would exceed the configured budget.
pub fn should_snapshot(changelog: &Changelog, events_in_commit: usize, config: &XddConfig) -> bool {
   let events_since_snapshot = changelog.events_since_snapshot + events_in_commit;
   let total_events = changelog.events.len() + events_in_commit;
   events_since_snapshot >= config.snapshot_event_threshold || total_events > config.snapshot_replay_budget
}

/// Selects the events that still need replaying on top of a snapshot taken
/// at `snapshot_timestamp` (or the entire log, if there is no snapshot).
pub fn tail_events<'a>(
   events: &'a [ChangelogEvent],
   snapshot_timestamp: Option<DateTime<Utc>>,
) -> Vec<&'a ChangelogEvent> {
   match snapshot_timestamp {
      Some(ts) => events.iter().filter(|e| e.timestamp() > ts).collect(),
      None => events.iter().collect(),
   }
}

#[cfg(test)]
mod tests {
   use chrono::Timelike;

   use super::*;

   #[test]
   fn snapshot_name_round_trips() {
      let now = Utc::now().with_nanosecond(0).unwrap();
      let name = snapshot_name(now);
      assert_eq!(parse_snapshot_name(&name), Some(now));
   }

   #[test]
   fn threshold_triggers_snapshot() {
      let mut changelog = Changelog::default();
      changelog.events_since_snapshot = 4;
      let config = XddConfig { snapshot_event_threshold: 5, snapshot_replay_budget: 1000, ..XddConfig::default() };
      assert!(should_snapshot(&changelog, 1, &config));
      assert!(!should_snapshot(&changelog, 0, &config));
   }

   #[test]
   fn replay_budget_triggers_snapshot_even_under_threshold() {
      let mut changelog = Changelog::default();
      changelog.events_since_snapshot = 0;
      changelog.events = vec![]; // length check uses events.len(), padded below
      let config = XddConfig { snapshot_event_threshold: 1000, snapshot_replay_budget: 2, ..XddConfig::default() };
      assert!(should_snapshot(&changelog, 3, &config));
   }
}
