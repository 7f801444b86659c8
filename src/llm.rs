//! Minimal OpenAI-compatible chat-completions client. One request per call;
//! retry-with-feedback lives in `task_runner`, not here.

use std::{sync::mpsc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
   cancel::CancellationToken,
   config::XddConfig,
   error::{Result, XddError},
};

/// How often the request-waiting loop wakes up to check for cancellation.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Serialize)]
struct Message<'a> {
   role:    &'a str,
   content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
   model:    &'a str,
   messages: Vec<Message<'a>>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
   #[serde(default)]
   choices: Vec<Choice>,
   #[serde(default)]
   error:   Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct Choice {
   message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
   #[serde(default)]
   content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
   message: String,
}

pub struct LlmClient {
   client: reqwest::blocking::Client,
   base_url: String,
   api_key: Option<String>,
}

impl LlmClient {
   pub fn new(config: &XddConfig) -> Self {
      let client = reqwest::blocking::Client::builder()
         .timeout(Duration::from_secs(config.request_timeout_secs))
         .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
         .build()
         .expect("failed to build HTTP client");
      Self { client, base_url: config.api_base_url.clone(), api_key: config.api_key.clone() }
   }

   /// Sends a single-message conversation and returns the assistant's raw
   /// text content. `cancel` is checked before the request starts and, while
   /// waiting for the response, every `CANCEL_POLL_INTERVAL` — a blocking
   /// request can't be aborted mid-flight without an async runtime, so on
   /// cancellation this stops waiting on the in-flight request and returns
   /// immediately rather than joining it.
   pub fn complete(&self, model: &str, prompt: &str, cancel: &CancellationToken) -> Result<String> {
      cancel.check()?;

      let body = ChatRequest { model, messages: vec![Message { role: "user", content: prompt }] };
      let mut request = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
      if let Some(key) = &self.api_key {
         request = request.bearer_auth(key);
      }

      let (tx, rx) = mpsc::channel();
      std::thread::spawn(move || {
         let outcome = request.send().and_then(|response| {
            let status = response.status();
            response.text().map(|text| (status, text))
         });
         let _ = tx.send(outcome);
      });

      loop {
         match rx.recv_timeout(CANCEL_POLL_INTERVAL) {
            Ok(outcome) => {
               let (status, text) = outcome?;
               return Self::parse_response(status, &text);
            },
            Err(mpsc::RecvTimeoutError::Timeout) => cancel.check()?,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
               return Err(XddError::Other("LLM request thread terminated without a response".to_string()));
            },
         }
      }
   }

   fn parse_response(status: reqwest::StatusCode, text: &str) -> Result<String> {
      if !status.is_success() {
         return Err(XddError::Api { status: status.as_u16(), body: text.to_string() });
      }

      let parsed: ChatResponse =
         serde_json::from_str(text).map_err(|e| XddError::Parse { expected: "ChatResponse".to_string(), reason: e.to_string() })?;

      if let Some(err) = parsed.error {
         return Err(XddError::Api { status: status.as_u16(), body: err.message });
      }

      parsed
         .choices
         .into_iter()
         .next()
         .and_then(|c| c.message.content)
         .ok_or_else(|| XddError::Parse { expected: "ChatResponse".to_string(), reason: "no content in response".to_string() })
   }
}

/// Strips a single leading/trailing triple-backtick fence (optionally tagged
/// `json`) from model output, a common wrapping that a bare JSON decode
/// would otherwise choke on.
pub fn strip_code_fence(text: &str) -> &str {
   let trimmed = text.trim();
   let Some(inner) = trimmed.strip_prefix("```") else { return trimmed };
   let inner = inner.strip_prefix("json").unwrap_or(inner);
   let inner = inner.strip_prefix('\n').unwrap_or(inner);
   inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn strips_plain_fence() {
      assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
   }

   #[test]
   fn strips_json_tagged_fence() {
      assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
   }

   #[test]
   fn complete_checks_cancellation_before_sending_a_request() {
      let client = LlmClient::new(&XddConfig::default());
      let cancel = crate::cancel::CancellationToken::new();
      cancel.cancel();
      let result = client.complete("any-model", "any prompt", &cancel);
      assert!(matches!(result, Err(XddError::Cancelled)));
   }

   #[test]
   fn leaves_unfenced_text_alone() {
      assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
   }
}
