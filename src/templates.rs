use std::{
   path::{Path, PathBuf},
   sync::LazyLock,
};

use parking_lot::Mutex;
use rust_embed::RustEmbed;
use tera::{Context, Tera};

use crate::error::{Result, XddError};

/// Embedded prompts folder (compiled into the binary)
#[derive(RustEmbed)]
#[folder = "prompts/"]
struct Prompts;

/// Global Tera instance for template rendering (wrapped in a mutex for
/// mutable access to the template registry).
static TERA: LazyLock<Mutex<Tera>> = LazyLock::new(|| {
   let mut tera = Tera::default();

   if let Some(user_dir) = user_prompts_dir() {
      for stage in STAGES {
         if let Err(e) = register_directory_templates(&mut tera, &user_dir.join(stage), stage) {
            eprintln!("Warning: {e}");
         }
      }
   }

   for file in Prompts::iter() {
      if tera.get_template_names().any(|name| name == file.as_ref()) {
         continue;
      }
      if let Some(embedded) = Prompts::get(file.as_ref())
         && let Ok(content) = std::str::from_utf8(embedded.data.as_ref())
         && let Err(e) = tera.add_raw_template(file.as_ref(), content)
      {
         eprintln!("Warning: failed to register embedded template {}: {}", file.as_ref(), e);
      }
   }

   tera.autoescape_on(vec![]);
   Mutex::new(tera)
});

const STAGES: &[&str] = &["metadata", "requirements_delta", "categorization", "requirement_generation", "version_bump"];

fn user_prompts_dir() -> Option<PathBuf> {
   std::env::var("HOME")
      .or_else(|_| std::env::var("USERPROFILE"))
      .ok()
      .map(|home| PathBuf::from(home).join(".xdd").join("prompts"))
}

fn register_directory_templates(tera: &mut Tera, directory: &Path, category: &str) -> Result<()> {
   if !directory.exists() {
      return Ok(());
   }
   for entry in std::fs::read_dir(directory).map_err(|e| XddError::Other(e.to_string()))? {
      let entry = match entry {
         Ok(entry) => entry,
         Err(e) => {
            eprintln!("Warning: failed to iterate template entry in {}: {}", directory.display(), e);
            continue;
         },
      };
      let path = entry.path();
      if path.extension().and_then(|s| s.to_str()) != Some("md") {
         continue;
      }
      let template_name = format!("{}/{}", category, path.file_name().and_then(|s| s.to_str()).unwrap_or_default());
      if let Err(e) = tera.add_template_file(&path, Some(&template_name)) {
         eprintln!("Warning: failed to load template file {}: {}", path.display(), e);
      }
   }
   Ok(())
}

/// Renders the `<stage>/<variant>.md` prompt template with `context`.
pub fn render_prompt(stage: &str, variant: &str, context: &Context) -> Result<String> {
   let template_name = format!("{stage}/{variant}.md");
   let mut tera = TERA.lock();
   if !tera.get_template_names().any(|name| name == template_name) {
      return Err(XddError::Other(format!(
         "template '{template_name}' not found as user override or embedded default"
      )));
   }
   tera
      .render(&template_name, context)
      .map_err(|e| XddError::Other(format!("failed to render prompt '{template_name}': {e}")))
}
