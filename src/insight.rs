//! Insight Service adapter: free-text suggestions for dispute reviewers.
//!
//! Calls are blocking; async callers run them on `spawn_blocking`.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::InsightConfig;

/// Stored in place of a suggestion when the service is off or unreachable.
pub const FALLBACK_SUGGESTION: &str =
    "AI analysis unavailable. Please review the dispute details and the referenced record manually.";

const SYSTEM_PROMPT: &str = "You assist administrators of a clinical document exchange. \
Suggest concrete next steps for reviewing a patient dispute in at most three sentences. \
Do not repeat identifiers.";

#[derive(Debug, thiserror::Error)]
pub enum InsightError {
    #[error("Insight Service unavailable: {0}")]
    Unavailable(String),

    #[error("Insight Service returned {status}")]
    Upstream { status: u16, body: String },

    #[error("Insight response parsing failed: {0}")]
    ResponseParsing(String),

    #[error("Insight Service returned an empty suggestion")]
    EmptyResponse,

    #[error("HTTP client error: {0}")]
    HttpClient(String),
}

impl InsightError {
    /// Disabled, unreachable or answering 5xx. Callers substitute the
    /// fallback text.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A 5xx means the service is down or overloaded; anything else is a
/// request the service understood and refused.
fn status_error(status: reqwest::StatusCode, body: String) -> InsightError {
    if status.is_server_error() {
        InsightError::Unavailable(format!("service answered {status}"))
    } else {
        InsightError::Upstream {
            status: status.as_u16(),
            body,
        }
    }
}

pub trait InsightService: Send + Sync {
    fn generate(&self, prompt: &str) -> Result<String, InsightError>;
}

// ═══════════════════════════════════════════════════════════
// Ollama-compatible HTTP service
// ═══════════════════════════════════════════════════════════

/// The blocking client is built per call, on the blocking worker, so it is
/// never created or dropped inside the async runtime.
pub struct OllamaInsight {
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl OllamaInsight {
    pub fn new(config: &InsightConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout_secs: config.timeout_secs,
        }
    }

    fn client(&self) -> Result<reqwest::blocking::Client, InsightError> {
        reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| InsightError::HttpClient(e.to_string()))
    }
}

/// Request body for /api/generate
#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from /api/generate
#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

impl InsightService for OllamaInsight {
    fn generate(&self, prompt: &str) -> Result<String, InsightError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            system: SYSTEM_PROMPT,
            stream: false,
        };

        let response = self.client()?.post(&url).json(&body).send().map_err(|e| {
            if e.is_connect() {
                InsightError::Unavailable(format!("cannot connect to {}", self.base_url))
            } else if e.is_timeout() {
                InsightError::Unavailable(format!("timed out after {}s", self.timeout_secs))
            } else {
                InsightError::HttpClient(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(status_error(status, body));
        }

        let parsed: GenerateResponse = response
            .json()
            .map_err(|e| InsightError::ResponseParsing(e.to_string()))?;

        let text = parsed.response.trim();
        if text.is_empty() {
            return Err(InsightError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Used when no service URL is configured.
pub struct DisabledInsight;

impl InsightService for DisabledInsight {
    fn generate(&self, _prompt: &str) -> Result<String, InsightError> {
        Err(InsightError::Unavailable("not configured".into()))
    }
}

/// Fixed response, or a fixed failure. Test double.
pub struct StaticInsight {
    response: Result<String, fn() -> InsightError>,
}

impl StaticInsight {
    pub fn new(response: &str) -> Self {
        Self {
            response: Ok(response.to_string()),
        }
    }

    pub fn failing(make_error: fn() -> InsightError) -> Self {
        Self {
            response: Err(make_error),
        }
    }
}

impl InsightService for StaticInsight {
    fn generate(&self, _prompt: &str) -> Result<String, InsightError> {
        match &self.response {
            Ok(text) => Ok(text.clone()),
            Err(make_error) => Err(make_error()),
        }
    }
}

/// Build the configured service, or the disabled one.
pub fn from_config(config: Option<&InsightConfig>) -> Arc<dyn InsightService> {
    match config {
        Some(config) => Arc::new(OllamaInsight::new(config)),
        None => Arc::new(DisabledInsight),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_reports_unavailable() {
        let err = DisabledInsight.generate("anything").unwrap_err();
        assert!(err.is_unavailable());
    }

    #[test]
    fn static_returns_configured_text() {
        let insight = StaticInsight::new("Check the upload source.");
        assert_eq!(insight.generate("p").unwrap(), "Check the upload source.");
    }

    #[test]
    fn static_failure_is_reproducible() {
        let insight = StaticInsight::failing(|| InsightError::EmptyResponse);
        assert!(matches!(insight.generate("p"), Err(InsightError::EmptyResponse)));
        assert!(matches!(insight.generate("p"), Err(InsightError::EmptyResponse)));
    }

    #[test]
    fn only_unavailable_triggers_fallback() {
        assert!(InsightError::Unavailable("x".into()).is_unavailable());
        assert!(!InsightError::EmptyResponse.is_unavailable());
        assert!(!InsightError::Upstream { status: 404, body: String::new() }.is_unavailable());
    }

    #[test]
    fn server_errors_count_as_unavailable() {
        use reqwest::StatusCode;
        for status in [StatusCode::INTERNAL_SERVER_ERROR, StatusCode::BAD_GATEWAY, StatusCode::SERVICE_UNAVAILABLE] {
            assert!(status_error(status, String::new()).is_unavailable(), "{status}");
        }
        let err = status_error(StatusCode::NOT_FOUND, "model not found".into());
        assert!(matches!(err, InsightError::Upstream { status: 404, .. }));
    }

    #[test]
    fn unreachable_service_is_unavailable() {
        // Port 9 (discard) on localhost is closed on test machines.
        let insight = OllamaInsight::new(&InsightConfig {
            base_url: "http://127.0.0.1:9/".into(),
            model: "medgemma".into(),
            timeout_secs: 2,
        });
        let err = insight.generate("prompt").unwrap_err();
        assert!(err.is_unavailable(), "{err}");
    }

    #[test]
    fn from_config_without_url_is_disabled() {
        let service = from_config(None);
        assert!(service.generate("p").unwrap_err().is_unavailable());
    }
}
