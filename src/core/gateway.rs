//! Completion gateway: turns a message history into one provider call and a
//! classified outcome.
//!
//! Provider-side failures never surface as transport errors. Each one is
//! folded into a [`CompletionOutcome::Failure`] carrying displayable text, so
//! a conversation always ends the turn with exactly one assistant entry. The
//! only genuine rejection is a request-shape violation ([`RequestRejected`]).

use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::api::{ChatMessage, ChatRequest, ChatResponse};
use crate::core::config::RuntimeConfig;
use crate::core::message::Message;
use crate::utils::text::truncate_with_ellipsis;
use crate::utils::url::construct_api_url;

pub const SAMPLING_TEMPERATURE: f32 = 0.7;
pub const MAX_COMPLETION_TOKENS: u32 = 1000;

/// Client-level deadline. The transport would otherwise wait indefinitely;
/// there is no retry after this fires.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Longest prefix of the user's message echoed back by mock replies.
const MOCK_ECHO_CHARS: usize = 30;

const UNEXPECTED_SHAPE_MESSAGE: &str =
    "The API response was not in the expected format. Check the logs for details.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    Auth,
    EndpointNotFound,
    RateLimited,
    Provider,
    MalformedResponse,
    MalformedRequest,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Network => "network",
            FailureKind::Auth => "auth",
            FailureKind::EndpointNotFound => "endpoint-not-found",
            FailureKind::RateLimited => "rate-limited",
            FailureKind::Provider => "provider",
            FailureKind::MalformedResponse => "malformed-response",
            FailureKind::MalformedRequest => "malformed-request",
        }
    }
}

/// Result of one completion attempt. `Failure` text is already user-safe and
/// ready to display as an assistant turn.
#[derive(Clone, Debug, PartialEq)]
pub enum CompletionOutcome {
    Reply(String),
    Failure { kind: FailureKind, message: String },
}

impl CompletionOutcome {
    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        CompletionOutcome::Failure {
            kind,
            message: message.into(),
        }
    }

    /// The text a conversation thread should display for this outcome.
    pub fn into_display_text(self) -> String {
        match self {
            CompletionOutcome::Reply(text) => text,
            CompletionOutcome::Failure { message, .. } => message,
        }
    }
}

/// A request-shape violation. Unlike provider failures this is a real error:
/// the call never left the client, and there is no provider text to show.
#[derive(Debug)]
pub struct RequestRejected {
    kind: FailureKind,
    reason: String,
}

impl RequestRejected {
    pub(crate) fn empty_history() -> Self {
        Self {
            kind: FailureKind::MalformedRequest,
            reason: "the conversation contains no messages to send".to_string(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl fmt::Display for RequestRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl StdError for RequestRejected {}

/// Seam the session store calls completions through. The live implementation
/// is [`Gateway`]; tests substitute scripted fakes.
#[async_trait]
pub trait CompletionPort {
    async fn complete(&self, history: &[Message]) -> Result<CompletionOutcome, RequestRejected>;
}

/// Live gateway over an OpenAI-compatible chat-completions endpoint.
///
/// Stateless per invocation: one POST per call, no retry, no streaming. In
/// mock mode (or with no API key configured) nothing touches the network.
pub struct Gateway {
    client: reqwest::Client,
    config: RuntimeConfig,
}

impl Gateway {
    pub fn new(config: RuntimeConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl CompletionPort for Gateway {
    async fn complete(&self, history: &[Message]) -> Result<CompletionOutcome, RequestRejected> {
        let messages = wire_messages(history);
        if messages.is_empty() {
            return Err(RequestRejected::empty_history());
        }

        if self.config.mock_only() {
            debug!("mock mode active, synthesizing completion locally");
            return Ok(CompletionOutcome::Reply(mock_reply(history)));
        }

        let endpoint = construct_api_url(&self.config.base_url, "chat/completions");
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: SAMPLING_TEMPERATURE,
            max_tokens: MAX_COMPLETION_TOKENS,
        };

        let mut http_request = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json");
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.bearer_auth(api_key);
        }
        if let Some(org_id) = &self.config.org_id {
            http_request = http_request.header("OpenAI-Organization", org_id);
        }

        debug!(%endpoint, model = %self.config.model, turns = history.len(), "requesting completion");

        match http_request.json(&request).send().await {
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                debug!(status = status.as_u16(), "completion response received");
                Ok(classify_response(status, &body, &endpoint))
            }
            Err(err) => Ok(CompletionOutcome::failure(
                FailureKind::Network,
                format!(
                    "API call failed: {err}\nPossible fixes: 1) check your API key \
                     2) verify the API endpoint 3) check network connectivity"
                ),
            )),
        }
    }
}

/// Strip a history down to ordered `{role, content}` pairs. No reordering,
/// no deduplication, no truncation.
fn wire_messages(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|message| ChatMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        })
        .collect()
}

fn classify_response(status: StatusCode, body: &str, endpoint: &str) -> CompletionOutcome {
    if status.is_success() {
        return decode_reply(body);
    }

    let detail = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => CompletionOutcome::failure(
            FailureKind::Auth,
            format!(
                "API authentication failed ({}). Check your API key and endpoint.",
                status.as_u16()
            ),
        ),
        404 => CompletionOutcome::failure(
            FailureKind::EndpointNotFound,
            format!("API endpoint not found (404). Current endpoint: {endpoint}"),
        ),
        429 => CompletionOutcome::failure(
            FailureKind::RateLimited,
            format!("API rate limit exceeded (429). Try again shortly. Details: {detail}"),
        ),
        code => CompletionOutcome::failure(
            FailureKind::Provider,
            format!("API call failed ({code}). Error message: {detail}"),
        ),
    }
}

/// Decode a success-status body. The provider returned 2xx, so anything that
/// is not a well-formed first choice with message content is a
/// `MalformedResponse`, never a panic on field access.
fn decode_reply(body: &str) -> CompletionOutcome {
    let Ok(response) = serde_json::from_str::<ChatResponse>(body) else {
        warn!(body = %truncate_with_ellipsis(body, 200), "completion body is not valid response JSON");
        return CompletionOutcome::failure(FailureKind::MalformedResponse, UNEXPECTED_SHAPE_MESSAGE);
    };

    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content);

    match content {
        Some(content) => CompletionOutcome::Reply(content),
        None => {
            warn!("completion response carried no first-choice message content");
            CompletionOutcome::failure(FailureKind::MalformedResponse, UNEXPECTED_SHAPE_MESSAGE)
        }
    }
}

/// Pull a human-readable message out of a structured error body, preferring
/// `error` as a bare string, then `error.message`, then `error.type`, then a
/// top-level `message`, and finally the raw body text.
fn extract_error_message(body: &str) -> String {
    let trimmed = body.trim();

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let summary = match value.get("error") {
            Some(serde_json::Value::String(text)) => Some(text.clone()),
            Some(serde_json::Value::Object(map)) => map
                .get("message")
                .and_then(|v| v.as_str())
                .or_else(|| map.get("type").and_then(|v| v.as_str()))
                .map(str::to_owned),
            _ => None,
        }
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

        if let Some(summary) = summary {
            if !summary.trim().is_empty() {
                return summary;
            }
        }
    }

    if trimmed.is_empty() {
        "unknown error".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Synthesize a placeholder reply without touching the network. The template
/// is picked deterministically from the last user message, and at most a
/// short prefix of that message is echoed back.
fn mock_reply(history: &[Message]) -> String {
    let last_user = history
        .iter()
        .rev()
        .find(|message| message.is_user())
        .map(|message| message.content.as_str())
        .unwrap_or("");

    match last_user.chars().count() % 4 {
        0 => format!(
            "This is a mock reply to \"{}\". A valid API key is required for a real model response.",
            truncate_with_ellipsis(last_user, MOCK_ECHO_CHARS)
        ),
        1 => format!(
            "Hello! This is a test response. Your question: \"{}\"",
            truncate_with_ellipsis(last_user, 20)
        ),
        2 => "The chat client is running. This is a test response generated without an API key."
            .to_string(),
        _ => "Mock mode is active. Set a valid OpenAI API key to receive real model responses."
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    fn history(turns: &[(Role, &str)]) -> Vec<Message> {
        turns
            .iter()
            .map(|(role, content)| Message::new(*role, *content))
            .collect()
    }

    fn mock_gateway() -> Gateway {
        let config = RuntimeConfig::from_lookup(|key| match key {
            "OPENAI_USE_MOCK" => Some("true".to_string()),
            _ => None,
        });
        Gateway::new(config).unwrap()
    }

    #[test]
    fn wire_messages_preserve_order_and_roles() {
        let turns = history(&[
            (Role::User, "first"),
            (Role::Assistant, "second"),
            (Role::User, "third"),
        ]);
        let wire = wire_messages(&turns);
        let pairs: Vec<(&str, &str)> = wire
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("user", "first"), ("assistant", "second"), ("user", "third")]
        );
    }

    #[test]
    fn auth_statuses_classify_as_auth_failures() {
        for code in [401u16, 403] {
            let status = StatusCode::from_u16(code).unwrap();
            let outcome = classify_response(status, "{}", "https://example.com/v1/chat/completions");
            match outcome {
                CompletionOutcome::Failure { kind, message } => {
                    assert_eq!(kind, FailureKind::Auth);
                    assert!(message.contains(&code.to_string()));
                }
                other => panic!("expected auth failure, got {:?}", other),
            }
        }
    }

    #[test]
    fn missing_endpoint_names_the_configured_url() {
        let outcome = classify_response(
            StatusCode::NOT_FOUND,
            "",
            "https://example.com/v1/chat/completions",
        );
        match outcome {
            CompletionOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::EndpointNotFound);
                assert!(message.contains("https://example.com/v1/chat/completions"));
            }
            other => panic!("expected endpoint failure, got {:?}", other),
        }
    }

    #[test]
    fn rate_limit_detail_survives_classification() {
        let body = r#"{"error":{"message":"rate limit exceeded"}}"#;
        let outcome = classify_response(
            StatusCode::TOO_MANY_REQUESTS,
            body,
            "https://example.com/v1/chat/completions",
        );
        match outcome {
            CompletionOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::RateLimited);
                assert!(message.contains("rate limit exceeded"));
            }
            other => panic!("expected rate-limit failure, got {:?}", other),
        }
    }

    #[test]
    fn other_error_statuses_classify_as_provider_failures() {
        let outcome = classify_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"error":{"message":"model overloaded"}}"#,
            "https://example.com/v1/chat/completions",
        );
        match outcome {
            CompletionOutcome::Failure { kind, message } => {
                assert_eq!(kind, FailureKind::Provider);
                assert!(message.contains("500"));
                assert!(message.contains("model overloaded"));
            }
            other => panic!("expected provider failure, got {:?}", other),
        }
    }

    #[test]
    fn well_formed_success_bodies_yield_replies() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Bonjour!"}}]}"#;
        assert_eq!(
            classify_response(StatusCode::OK, body, "unused"),
            CompletionOutcome::Reply("Bonjour!".to_string())
        );
    }

    #[test]
    fn empty_choices_are_a_malformed_response_not_a_crash() {
        let outcome = classify_response(StatusCode::OK, r#"{"choices":[]}"#, "unused");
        match outcome {
            CompletionOutcome::Failure { kind, .. } => {
                assert_eq!(kind, FailureKind::MalformedResponse)
            }
            other => panic!("expected malformed-response failure, got {:?}", other),
        }
    }

    #[test]
    fn missing_message_content_is_a_malformed_response() {
        for body in [
            r#"{"choices":[{}]}"#,
            r#"{"choices":[{"message":{}}]}"#,
            r#"{"choices":[{"message":{"content":null}}]}"#,
            "not json at all",
            r#"{"id":"cmpl-1"}"#,
        ] {
            let outcome = classify_response(StatusCode::OK, body, "unused");
            assert!(
                matches!(
                    outcome,
                    CompletionOutcome::Failure {
                        kind: FailureKind::MalformedResponse,
                        ..
                    }
                ),
                "body {body:?} should classify as malformed"
            );
        }
    }

    #[test]
    fn error_extraction_prefers_fields_in_order() {
        assert_eq!(
            extract_error_message(r#"{"error":"plain string error"}"#),
            "plain string error"
        );
        assert_eq!(
            extract_error_message(r#"{"error":{"message":"from message","type":"from type"}}"#),
            "from message"
        );
        assert_eq!(
            extract_error_message(r#"{"error":{"type":"invalid_request_error"}}"#),
            "invalid_request_error"
        );
        assert_eq!(
            extract_error_message(r#"{"message":"top level"}"#),
            "top level"
        );
        assert_eq!(
            extract_error_message("<html>gateway timeout</html>"),
            "<html>gateway timeout</html>"
        );
        assert_eq!(extract_error_message("   "), "unknown error");
    }

    #[test]
    fn mock_replies_are_deterministic_and_non_blank() {
        let turns = history(&[(Role::User, "what is the weather like today?")]);
        let first = mock_reply(&turns);
        let second = mock_reply(&turns);
        assert_eq!(first, second);
        assert!(!first.trim().is_empty());

        assert!(!mock_reply(&[]).trim().is_empty());
    }

    #[test]
    fn mock_replies_echo_at_most_a_short_prefix() {
        let long = "s".repeat(400);
        let turns = history(&[(Role::User, &long)]);
        let reply = mock_reply(&turns);
        assert!(reply.len() < 200);
        assert!(!reply.contains(&long));
    }

    #[tokio::test]
    async fn mock_gateway_completes_without_a_network_call() {
        let gateway = mock_gateway();
        let turns = history(&[(Role::User, "ping")]);
        let outcome = gateway.complete(&turns).await.unwrap();
        match outcome {
            CompletionOutcome::Reply(text) => assert!(!text.trim().is_empty()),
            other => panic!("expected reply, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_histories_are_rejected_outright() {
        let gateway = mock_gateway();
        let rejected = gateway.complete(&[]).await.unwrap_err();
        assert_eq!(rejected.kind(), FailureKind::MalformedRequest);
    }
}
