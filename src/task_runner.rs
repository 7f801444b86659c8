//! Generic structured-output task: one LLM call, decoded and validated, with
//! bounded retry-with-feedback on decode or validation failure.
//!
//! Network and non-2xx HTTP errors are not retried here; they propagate to
//! the caller immediately. Each retry re-sends the *original* prompt with a
//! diagnostic block appended, never the previously-augmented prompt, so
//! retry text does not accumulate across attempts.

use serde::de::DeserializeOwned;

use crate::{
   cancel::CancellationToken,
   config::XddConfig,
   error::{Result, XddError},
   llm::{LlmClient, strip_code_fence},
};

pub fn run_task<T, V>(
   client: &LlmClient,
   config: &XddConfig,
   model: &str,
   base_prompt: &str,
   cancel: &CancellationToken,
   validate: V,
) -> Result<T>
where
   T: DeserializeOwned,
   V: Fn(&T) -> Result<()>,
{
   let mut attempt = 0;
   let mut last_failure: Option<String> = None;

   loop {
      cancel.check()?;
      attempt += 1;

      let prompt = match &last_failure {
         Some(reason) => format!(
            "{base_prompt}\n\n---\nYour previous response was rejected: {reason}\nRespond again with corrected JSON \
             only, no commentary."
         ),
         None => base_prompt.to_string(),
      };

      let raw = client.complete(model, &prompt, cancel)?;
      let candidate = decode_and_validate(&raw, &validate);

      match candidate {
         Ok(value) => return Ok(value),
         Err(e) if attempt < config.max_retries => {
            last_failure = Some(e.to_string());
         },
         Err(e) => {
            return Err(XddError::BudgetExceeded { retries: config.max_retries, source: Box::new(e) });
         },
      }
   }
}

fn decode_and_validate<T, V>(raw: &str, validate: &V) -> Result<T>
where
   T: DeserializeOwned,
   V: Fn(&T) -> Result<()>,
{
   let json_text = strip_code_fence(raw);
   let value: T = serde_json::from_str(json_text)
      .map_err(|e| XddError::Parse { expected: std::any::type_name::<T>().to_string(), reason: e.to_string() })?;
   validate(&value)?;
   Ok(value)
}
