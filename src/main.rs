use std::{
   io::{self, BufRead, Write},
   path::PathBuf,
   process::ExitCode,
};

use clap::{Parser, Subcommand};
use xdd::{CancellationToken, Result, XddConfig, XddError, llm::LlmClient, lock::ProcessLock, orchestrator, repository::Repository, style};

#[derive(Parser)]
#[command(name = "xdd", about = "Event-sourced specification editor driven by LLM-generated structured edits")]
struct Cli {
   #[command(subcommand)]
   command: Command,
}

#[derive(Subcommand)]
enum Command {
   /// Create the .xdd/ directory skeleton in a fresh repository.
   Init {
      #[arg(long)]
      dir: Option<PathBuf>,
   },
   /// Run one editing session: turn a prompt into a reviewed batch of events.
   Specify {
      prompt: Vec<String>,
      #[arg(long)]
      dir:    Option<PathBuf>,
      /// Skip the confirmation prompt and commit immediately.
      #[arg(long)]
      yes:    bool,
   },
   /// Break a stale lock after explicit confirmation.
   Unlock {
      #[arg(long)]
      force: bool,
      #[arg(long)]
      dir:   Option<PathBuf>,
   },
}

fn resolve_dir(dir: Option<PathBuf>) -> PathBuf {
   dir.unwrap_or_else(|| PathBuf::from("."))
}

fn run_init(dir: Option<PathBuf>) -> Result<()> {
   let dir = resolve_dir(dir);
   let repo = Repository::new(&dir);
   repo.init()?;
   println!("{} initialized .xdd/ in {}", style::success("✓"), dir.display());
   Ok(())
}

fn run_unlock(force: bool, dir: Option<PathBuf>) -> Result<()> {
   let dir = resolve_dir(dir);
   if !force {
      style::warn("refusing to unlock without --force");
      return Err(XddError::Other("unlock requires --force".to_string()));
   }
   ProcessLock::force_unlock(&dir)?;
   println!("{} lock cleared in {}", style::success("✓"), dir.display());
   Ok(())
}

/// The full acquire -> recover -> load -> orchestrate -> preview -> confirm
/// -> commit -> release sequence. The lock is released on every exit path,
/// including early returns on error, via `ProcessLock`'s `Drop` impl.
fn run_specify(prompt: Vec<String>, dir: Option<PathBuf>, yes: bool, config: &XddConfig) -> Result<()> {
   let dir = resolve_dir(dir);
   let user_prompt = prompt.join(" ");
   if user_prompt.trim().is_empty() {
      return Err(XddError::Validation { field: "prompt".to_string(), reason: "must not be empty".to_string() });
   }

   let lock = ProcessLock::acquire(&dir, config, "cli")?;
   let cancel = CancellationToken::new();

   let result = (|| -> Result<()> {
      let repo = Repository::new(&dir);
      repo.recover(config)?;
      let spec = repo.load()?;

      println!("{}", style::dim("Contacting model..."));
      let client = LlmClient::new(config);
      let outcome = orchestrator::run(&client, config, &spec, &user_prompt, &cancel)?;

      if outcome.events.is_empty() {
         println!("{} no changes proposed", style::info("i"));
         return Ok(());
      }

      let preview = describe_events(&outcome.events);
      println!("\n{}", style::boxed_message("Proposed changes", &preview, style::term_width()));

      if !yes && !confirm("Apply these changes?")? {
         println!("{} aborted, nothing committed", style::warning("i"));
         return Ok(());
      }

      repo.commit(&outcome.spec, &outcome.events, config, &cancel)?;
      println!("{} committed {} event(s)", style::success("✓"), outcome.events.len());
      Ok(())
   })();

   lock.release()?;
   result
}

fn describe_events(events: &[xdd::events::ChangelogEvent]) -> String {
   events.iter().map(describe_event).collect::<Vec<_>>().join("\n")
}

fn describe_event(event: &xdd::events::ChangelogEvent) -> String {
   use xdd::events::ChangelogEvent::*;
   match event {
      RequirementAdded { requirement, .. } => {
         format!("+ requirement {} ({})", requirement.id, requirement.category)
      },
      RequirementDeleted { requirement_id, .. } => format!("- requirement {requirement_id}"),
      AcceptanceCriterionAdded { requirement_id, criterion, .. } => {
         format!("  + criterion {} on {requirement_id}", criterion.id())
      },
      AcceptanceCriterionDeleted { requirement_id, criterion_id, .. } => {
         format!("  - criterion {criterion_id} on {requirement_id}")
      },
      CategoryAdded { name, .. } => format!("+ category {name}"),
      CategoryDeleted { name, .. } => format!("- category {name}"),
      CategoryRenamed { old_name, new_name, .. } => format!("~ category {old_name} -> {new_name}"),
      ProjectMetadataUpdated { new_metadata, .. } => {
         format!("~ metadata: {} v{}", new_metadata.name, new_metadata.version)
      },
      VersionBumped { old_version, new_version, .. } => format!("~ version {old_version} -> {new_version}"),
   }
}

fn confirm(prompt: &str) -> Result<bool> {
   print!("{prompt} [y/N] ");
   io::stdout().flush().ok();
   let mut line = String::new();
   io::stdin().lock().read_line(&mut line)?;
   Ok(matches!(line.trim().to_lowercase().as_str(), "y" | "yes"))
}

/// Maps the error taxonomy to a distinct process exit code, so scripted
/// callers can distinguish lock contention from validation or I/O failure.
fn exit_code_for(err: &XddError) -> u8 {
   match err {
      XddError::LockHeld { .. } | XddError::LockStale { .. } => 2,
      XddError::Validation { .. } | XddError::Conflict(_) | XddError::InvalidVersion { .. } => 3,
      XddError::AmbiguousEdit { .. } => 4,
      XddError::Network(_) | XddError::Api { .. } | XddError::Parse { .. } | XddError::BudgetExceeded { .. } => 5,
      XddError::Cancelled => 130,
      XddError::TxIo(_) | XddError::Codec(_) | XddError::Json(_) | XddError::Other(_) => 1,
   }
}

fn main() -> ExitCode {
   let cli = Cli::parse();

   let config = match XddConfig::load() {
      Ok(config) => config,
      Err(err) => {
         eprintln!("{} {err}", style::error("✗"));
         return ExitCode::from(1);
      },
   };

   let outcome = match cli.command {
      Command::Init { dir } => run_init(dir),
      Command::Specify { prompt, dir, yes } => run_specify(prompt, dir, yes, &config),
      Command::Unlock { force, dir } => run_unlock(force, dir),
   };

   match outcome {
      Ok(()) => ExitCode::SUCCESS,
      Err(err) => {
         eprintln!("{} {err}", style::error("✗"));
         ExitCode::from(exit_code_for(&err))
      },
   }
}

#[cfg(test)]
mod tests {
   use chrono::Utc;
   use xdd::{
      events::ChangelogEvent,
      ids,
      model::{AcceptanceCriterion, EarsType, Priority, Requirement},
   };

   use super::*;

   #[test]
   fn describe_event_formats_requirement_added() {
      let event = ChangelogEvent::RequirementAdded {
         event_id:    ids::event_id(),
         timestamp:   Utc::now(),
         requirement: Requirement {
            id:          "REQ-AUTH-abc123".to_string(),
            ears_type:   EarsType::Event,
            category:    "AUTH".to_string(),
            description: "The system shall do a thing.".to_string(),
            rationale:   "Because users need it.".to_string(),
            priority:    Priority::Medium,
            created_at:  Utc::now(),
            criteria:    vec![AcceptanceCriterion::Assertion {
               id:        ids::criterion_id(),
               statement: "the thing happens".to_string(),
            }],
         },
      };
      assert_eq!(describe_event(&event), "+ requirement REQ-AUTH-abc123 (AUTH)");
   }

   #[test]
   fn exit_code_distinguishes_lock_and_validation_failures() {
      assert_eq!(exit_code_for(&XddError::LockHeld { owner: "h".into(), pid: 1, since: String::new() }), 2);
      assert_eq!(exit_code_for(&XddError::Validation { field: "x".into(), reason: "y".into() }), 3);
   }

   #[test]
   fn exit_code_for_cancellation_matches_the_signal_convention() {
      assert_eq!(exit_code_for(&XddError::Cancelled), 130);
   }
}
