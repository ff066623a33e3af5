//! Completion client trait and the built-in implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{AiError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────────────────

/// A single completion request from a plugin command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    /// Prompt text.
    pub prompt: String,
    /// Sampling temperature, provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion length limit, provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Client Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for AI completion providers handed to plugin commands.
#[async_trait]
pub trait AiClient: Send + Sync {
    /// Produce a completion for the request.
    async fn generate(&self, request: GenerateRequest) -> Result<String>;

    /// Get the name of this client.
    fn name(&self) -> &str;
}

/// A client that can be shared across invocations.
pub type SharedAiClient = Arc<dyn AiClient>;

/// Build the client for a configured provider name.
pub fn build_client(provider: &str, model: Option<&str>) -> Result<SharedAiClient> {
    match provider {
        "stub" => Ok(Arc::new(StubClient::new(model))),
        other => Err(AiError::Config(format!(
            "unknown AI provider '{other}' (available: stub)"
        ))),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stub Client
// ─────────────────────────────────────────────────────────────────────────────

/// Offline client that answers every prompt with a canned completion.
#[derive(Debug, Clone)]
pub struct StubClient {
    model: String,
}

impl StubClient {
    pub fn new(model: Option<&str>) -> Self {
        Self {
            model: model.unwrap_or("stub").to_string(),
        }
    }
}

#[async_trait]
impl AiClient for StubClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        if request.prompt.trim().is_empty() {
            return Err(AiError::InvalidRequest("prompt is empty".to_string()));
        }
        tracing::debug!(
            model = %self.model,
            prompt_len = request.prompt.len(),
            "stub completion"
        );
        let first_line = request.prompt.lines().next().unwrap_or_default().trim();
        Ok(format!("stub completion: {first_line}"))
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Mock Client
// ─────────────────────────────────────────────────────────────────────────────

/// A mock client for tests.
///
/// Returns pre-configured responses in order and records every request.
#[cfg(any(test, feature = "testing"))]
#[derive(Debug, Default)]
pub struct MockClient {
    responses: parking_lot::Mutex<Vec<String>>,
    request_log: parking_lot::Mutex<Vec<GenerateRequest>>,
}

#[cfg(any(test, feature = "testing"))]
impl MockClient {
    /// Create a mock returning the given responses in order.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses),
            request_log: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Create a mock with a single response.
    pub fn with_text(text: impl Into<String>) -> Self {
        Self::new(vec![text.into()])
    }

    /// Get all requests that were made to this client.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.request_log.lock().clone()
    }

    /// Get the number of requests made.
    pub fn request_count(&self) -> usize {
        self.request_log.lock().len()
    }
}

#[cfg(any(test, feature = "testing"))]
#[async_trait]
impl AiClient for MockClient {
    async fn generate(&self, request: GenerateRequest) -> Result<String> {
        self.request_log.lock().push(request);

        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Err(AiError::Backend(
                "MockClient: no more responses available".to_string(),
            ));
        }
        Ok(responses.remove(0))
    }

    fn name(&self) -> &str {
        "mock"
    }
}
