//! Cooperative cancellation signal threaded through long-running operations
//! (LLM calls, task retries, commits).
//!
//! Mirrors the out-of-band signaling `style::with_spinner` already uses (a
//! side channel telling a running operation to stop) but as a cheaply
//! clonable flag that deep call chains can poll without owning a receiver.

use std::sync::{
   Arc,
   atomic::{AtomicBool, Ordering},
};

use crate::error::{Result, XddError};

#[derive(Clone, Default)]
pub struct CancellationToken {
   flag: Arc<AtomicBool>,
}

impl CancellationToken {
   pub fn new() -> Self {
      Self::default()
   }

   pub fn cancel(&self) {
      self.flag.store(true, Ordering::SeqCst);
   }

   pub fn is_cancelled(&self) -> bool {
      self.flag.load(Ordering::SeqCst)
   }

   /// Returns `Err(Cancelled)` if the token has been signalled, `Ok(())`
   /// otherwise. Call at suspension points (before an LLM request, between
   /// retry attempts, between commit steps).
   pub fn check(&self) -> Result<()> {
      if self.is_cancelled() { Err(XddError::Cancelled) } else { Ok(()) }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn fresh_token_is_not_cancelled() {
      let token = CancellationToken::new();
      assert!(!token.is_cancelled());
      assert!(token.check().is_ok());
   }

   #[test]
   fn cancel_is_visible_through_clones() {
      let token = CancellationToken::new();
      let clone = token.clone();
      clone.cancel();
      assert!(token.is_cancelled());
      assert!(matches!(token.check(), Err(XddError::Cancelled)));
   }
}
