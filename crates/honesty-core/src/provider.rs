//! Mock generation provider.
//!
//! Deterministic and credential-free, for smoke runs and tests:
//!
//! ```text
//! MockProvider
//!     +-- canned prompt     -> next entry of its response list (cycled)
//!     +-- any other prompt  -> "mock response to: <prompt>"
//! ```
//!
//! Cycling through several responses for one prompt makes the provider
//! useful for exercising flaky classification without a real model.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::capability::{GenerationError, Generator};

/// Mock generation provider.
#[derive(Debug, Default)]
pub struct MockProvider {
    canned: HashMap<String, Vec<Value>>,
    cursors: Mutex<HashMap<String, usize>>,
    calls: AtomicU64,
}

impl MockProvider {
    /// Creates a provider with no canned responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers `prompt` with `response` every time.
    #[must_use]
    pub fn with_response(self, prompt: impl Into<String>, response: Value) -> Self {
        self.with_responses(prompt, vec![response])
    }

    /// Answers `prompt` with `responses` in turn, wrapping around.
    ///
    /// An empty list removes the canned entry.
    #[must_use]
    pub fn with_responses(mut self, prompt: impl Into<String>, responses: Vec<Value>) -> Self {
        let prompt = prompt.into();
        if responses.is_empty() {
            self.canned.remove(&prompt);
        } else {
            self.canned.insert(prompt, responses);
        }
        self
    }

    /// Total number of `generate` calls served.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_canned(&self, prompt: &str) -> Result<Option<Value>, GenerationError> {
        let Some(responses) = self.canned.get(prompt) else {
            return Ok(None);
        };
        let mut cursors = self
            .cursors
            .lock()
            .map_err(|_| GenerationError::request("mock provider state poisoned"))?;
        let cursor = cursors.entry(prompt.to_string()).or_insert(0);
        let response = responses[*cursor % responses.len()].clone();
        *cursor += 1;
        Ok(Some(response))
    }
}

#[async_trait]
impl Generator for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, prompt: &str) -> Result<Value, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_canned(prompt)? {
            Some(response) => Ok(response),
            None => Ok(Value::String(format!("mock response to: {prompt}"))),
        }
    }
}
