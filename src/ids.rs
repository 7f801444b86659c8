//! Random identifier generation for requirements, criteria, and events.

use rand::{Rng, distributions::Alphanumeric};

const TOKEN_LEN: usize = 10;

fn token() -> String {
   rand::thread_rng().sample_iter(&Alphanumeric).take(TOKEN_LEN).map(char::from).collect()
}

/// `REQ-<CATEGORY>-<token>`
pub fn requirement_id(category: &str) -> String {
   format!("REQ-{}-{}", category.to_uppercase(), token())
}

/// `AC-<token>`
pub fn criterion_id() -> String {
   format!("AC-{}", token())
}

/// `EVT-<token>`
pub fn event_id() -> String {
   format!("EVT-{}", token())
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn requirement_ids_carry_the_category() {
      let id = requirement_id("auth");
      assert!(id.starts_with("REQ-AUTH-"));
      assert_eq!(id.len(), "REQ-AUTH-".len() + TOKEN_LEN);
   }

   #[test]
   fn ids_are_not_reused_across_many_calls() {
      let mut seen = std::collections::HashSet::new();
      for _ in 0..10_000 {
         assert!(seen.insert(event_id()));
      }
   }

   #[test]
   fn criterion_and_event_ids_have_distinct_prefixes() {
      assert!(criterion_id().starts_with("AC-"));
      assert!(event_id().starts_with("EVT-"));
   }
}
