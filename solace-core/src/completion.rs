//! Completion backends for Solace — remote chat model or offline canned replies
//!
//! Provides a `CompletionBackend` trait with implementations for:
//! - **Remote** — an OpenAI-compatible chat-completion endpoint
//! - **Offline** — the canned response generator, never fails
//!
//! Neither backend retries or writes to the conversation store. Retry and
//! fallback policy belong to the dispatcher.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canned::CannedResponder;
use crate::classifier::RiskClassifier;
use crate::credentials::ApiKey;
use crate::models::{Message, ResponseDraft, SafetyFlag, Sender};

/// Default chat-completion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Number of prior messages sent as context
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Request timeout for the remote endpoint
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Persona, safety protocol and behavioral rules sent as the system message.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Solace, a warm and supportive wellness companion inside a mental health app. \
You help people reflect on their feelings, manage everyday stress, anxiety and sleep trouble, \
and build small healthy habits.\n\n\
SAFETY PROTOCOL:\n\
- If the user mentions suicide, self-harm, wanting to die, or being in danger, respond with compassion, \
encourage them to contact the 988 Suicide & Crisis Lifeline (call or text 988 in the US), \
the Crisis Text Line (text HOME to 741741), or local emergency services, and do not attempt to counsel them through a crisis yourself.\n\
- Never provide information about methods of self-harm.\n\n\
RULES:\n\
- You are not a therapist and do not diagnose conditions or recommend medication.\n\
- Keep replies short: two to four sentences.\n\
- Validate feelings before offering a suggestion.\n\
- Suggest simple techniques such as breathing, grounding, journaling or a body scan when they fit.\n\
- Ask at most one gentle follow-up question.";

// ============================================================================
// CompletionBackend trait
// ============================================================================

/// Abstraction over reply producers.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Produce a reply for `text` given prior `history` (oldest first, not
    /// including `text` itself).
    async fn complete(
        &self,
        text: &str,
        history: &[Message],
        system_prompt: &str,
        api_key: Option<&ApiKey>,
    ) -> Result<ResponseDraft, ClientError>;

    /// Whether `complete` needs an API key. Backends that return true are not
    /// called at all when no key is available.
    fn requires_credential(&self) -> bool {
        true
    }

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("rate limited")]
    RateLimited,

    #[error("server error ({status})")]
    ServerError { status: u16 },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ClientError {
    /// Stable code for structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::NetworkError(_) => "network_error",
            ClientError::InvalidCredential => "invalid_credential",
            ClientError::RateLimited => "rate_limited",
            ClientError::ServerError { .. } => "server_error",
            ClientError::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Map a non-200 HTTP status to its error. Returns `None` for 200.
pub fn error_for_status(status: u16) -> Option<ClientError> {
    match status {
        200 => None,
        401 => Some(ClientError::InvalidCredential),
        429 => Some(ClientError::RateLimited),
        500..=599 => Some(ClientError::ServerError { status }),
        other => Some(ClientError::InvalidResponse(format!(
            "unexpected status {}",
            other
        ))),
    }
}

// ============================================================================
// Config types
// ============================================================================

/// Remote chat-completion client configuration
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub timeout_seconds: u64,
    pub history_window: usize,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }
}

/// Configuration union for the backend factory.
pub enum BackendConfig {
    Remote(CompletionConfig),
    Offline,
}

/// Create the appropriate backend from configuration.
pub fn create_backend(
    config: BackendConfig,
    classifier: RiskClassifier,
    responder: Arc<CannedResponder>,
) -> Result<Box<dyn CompletionBackend>, reqwest::Error> {
    match config {
        BackendConfig::Remote(c) => Ok(Box::new(ChatCompletionClient::new(c, classifier)?)),
        BackendConfig::Offline => Ok(Box::new(OfflineBackend::new(responder))),
    }
}

// ============================================================================
// Wire structs
// ============================================================================

/// One entry of the request `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

/// System message, then the last `window` history entries oldest first, then
/// the new user message.
pub fn build_messages(
    text: &str,
    history: &[Message],
    system_prompt: &str,
    window: usize,
) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    let mut messages = Vec::with_capacity(history.len() - start + 2);

    messages.push(ChatMessage {
        role: "system",
        content: system_prompt.to_string(),
    });
    messages.extend(history[start..].iter().map(|m| ChatMessage {
        role: match m.sender {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        },
        content: m.text.clone(),
    }));
    messages.push(ChatMessage {
        role: "user",
        content: text.to_string(),
    });

    messages
}

// ============================================================================
// ChatCompletionClient
// ============================================================================

/// Remote client — one POST per call, no retry.
#[derive(Debug, Clone)]
pub struct ChatCompletionClient {
    client: Client,
    config: CompletionConfig,
    classifier: RiskClassifier,
}

impl ChatCompletionClient {
    pub fn new(config: CompletionConfig, classifier: RiskClassifier) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            config,
            classifier,
        })
    }

    pub fn config(&self) -> &CompletionConfig {
        &self.config
    }

    async fn request(
        &self,
        text: &str,
        history: &[Message],
        system_prompt: &str,
        api_key: &ApiKey,
    ) -> Result<String, ClientError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages: build_messages(text, history, system_prompt, self.config.history_window),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .header(reqwest::header::AUTHORIZATION, api_key.bearer())
            .json(&request)
            .send()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let status = response.status().as_u16();
        if let Some(err) = error_for_status(status) {
            tracing::error!(status = status, kind = err.kind(), "Chat completion API error");
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::NetworkError(e.to_string()))?;

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ClientError::InvalidResponse("missing choices[0].message.content".to_string()))?;

        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidResponse("empty completion".to_string()));
        }

        Ok(trimmed.to_string())
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionClient {
    async fn complete(
        &self,
        text: &str,
        history: &[Message],
        system_prompt: &str,
        api_key: Option<&ApiKey>,
    ) -> Result<ResponseDraft, ClientError> {
        let api_key = api_key.ok_or(ClientError::InvalidCredential)?;
        let reply = self.request(text, history, system_prompt, api_key).await?;

        let mut draft = ResponseDraft::new(reply);
        if self.classifier.classify(&draft.text) {
            tracing::warn!("Model reply mentions crisis content, flagging");
            draft = draft.flagged(SafetyFlag::CrisisMentioned);
        }
        Ok(draft)
    }

    fn name(&self) -> &str {
        "remote"
    }
}

// ============================================================================
// OfflineBackend
// ============================================================================

/// Serves canned replies as the primary implementation when no remote model
/// is configured.
pub struct OfflineBackend {
    responder: Arc<CannedResponder>,
}

impl OfflineBackend {
    pub fn new(responder: Arc<CannedResponder>) -> Self {
        Self { responder }
    }
}

#[async_trait]
impl CompletionBackend for OfflineBackend {
    async fn complete(
        &self,
        text: &str,
        history: &[Message],
        _system_prompt: &str,
        _api_key: Option<&ApiKey>,
    ) -> Result<ResponseDraft, ClientError> {
        Ok(self.responder.generate(text, history))
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "offline"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canned::{is_canned_reply, CRISIS_RESPONSE};
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> CompletionConfig {
        CompletionConfig {
            endpoint: format!("{}/v1/chat/completions", server.uri()),
            model: "gpt-4o-mini".to_string(),
            max_tokens: 500,
            temperature: 0.7,
            timeout_seconds: 5,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    fn client(server: &MockServer) -> ChatCompletionClient {
        ChatCompletionClient::new(test_config(server), RiskClassifier::new())
            .expect("Failed to create client")
    }

    fn key() -> ApiKey {
        ApiKey::new("test-api-key")
    }

    fn completion(content: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [
                { "index": 0, "message": { "role": "assistant", "content": content } }
            ]
        })
    }

    fn msg(sender: Sender, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            sender,
            created_at: Utc::now(),
            text: text.to_string(),
            safety_flag: None,
        }
    }

    async fn complete_with_status(status: u16) -> Result<ResponseDraft, ClientError> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
                "error": { "message": "nope" }
            })))
            .mount(&mock_server)
            .await;
        client(&mock_server)
            .complete("hello", &[], DEFAULT_SYSTEM_PROMPT, Some(&key()))
            .await
    }

    #[test]
    fn test_build_messages_orders_system_history_user() {
        let history = vec![msg(Sender::User, "hi"), msg(Sender::Assistant, "hello!")];
        let messages = build_messages("how are you", &history, "SYS", 10);

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage { role: "system", content: "SYS".into() });
        assert_eq!(messages[1].role, "user");
        assert_eq!(messages[1].content, "hi");
        assert_eq!(messages[2].role, "assistant");
        assert_eq!(messages[3], ChatMessage { role: "user", content: "how are you".into() });
    }

    #[test]
    fn test_build_messages_keeps_last_ten_history_entries() {
        let history: Vec<Message> = (0..15)
            .map(|i| msg(Sender::User, &format!("m{}", i)))
            .collect();
        let messages = build_messages("now", &history, "SYS", 10);

        assert_eq!(messages.len(), 12);
        assert_eq!(messages[1].content, "m5");
        assert_eq!(messages[10].content, "m14");
        assert_eq!(messages[11].content, "now");
    }

    #[test]
    fn test_error_for_status_mapping() {
        assert_eq!(error_for_status(200), None);
        assert_eq!(error_for_status(401), Some(ClientError::InvalidCredential));
        assert_eq!(error_for_status(429), Some(ClientError::RateLimited));
        assert_eq!(error_for_status(500), Some(ClientError::ServerError { status: 500 }));
        assert_eq!(error_for_status(599), Some(ClientError::ServerError { status: 599 }));
        assert!(matches!(error_for_status(201), Some(ClientError::InvalidResponse(_))));
        assert!(matches!(error_for_status(404), Some(ClientError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_complete_sends_expected_request_and_trims_reply() {
        let mock_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer test-api-key"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "SYS" },
                    { "role": "user", "content": "earlier" },
                    { "role": "assistant", "content": "reply" },
                    { "role": "user", "content": "hello" }
                ],
                "max_tokens": 500,
                "temperature": 0.7
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(completion("  Hi, I'm here.  \n")),
            )
            .expect(1)
            .mount(&mock_server)
            .await;

        let history = vec![msg(Sender::User, "earlier"), msg(Sender::Assistant, "reply")];
        let draft = client(&mock_server)
            .complete("hello", &history, "SYS", Some(&key()))
            .await
            .expect("completion should succeed");

        assert_eq!(draft.text, "Hi, I'm here.");
        assert!(draft.safety_flag.is_none());
    }

    #[tokio::test]
    async fn test_status_401_is_invalid_credential() {
        assert_eq!(complete_with_status(401).await, Err(ClientError::InvalidCredential));
    }

    #[tokio::test]
    async fn test_status_429_is_rate_limited() {
        assert_eq!(complete_with_status(429).await, Err(ClientError::RateLimited));
    }

    #[tokio::test]
    async fn test_status_503_is_server_error() {
        assert_eq!(
            complete_with_status(503).await,
            Err(ClientError::ServerError { status: 503 })
        );
    }

    #[tokio::test]
    async fn test_status_400_is_invalid_response() {
        assert!(matches!(
            complete_with_status(400).await,
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_invalid_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": []
            })))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .complete("hello", &[], "SYS", Some(&key()))
            .await;
        assert!(matches!(result, Err(ClientError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_non_json_body_is_invalid_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&mock_server)
            .await;

        let result = client(&mock_server)
            .complete("hello", &[], "SYS", Some(&key()))
            .await;
        assert!(matches!(result, Err(ClientError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = CompletionConfig {
            endpoint: "http://127.0.0.1:9/v1/chat/completions".to_string(),
            timeout_seconds: 2,
            ..CompletionConfig::default()
        };
        let client = ChatCompletionClient::new(config, RiskClassifier::new()).unwrap();

        let result = client.complete("hello", &[], "SYS", Some(&key())).await;
        assert!(matches!(result, Err(ClientError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_timeout_is_network_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion("late"))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let config = CompletionConfig {
            timeout_seconds: 1,
            ..test_config(&mock_server)
        };
        let client = ChatCompletionClient::new(config, RiskClassifier::new()).unwrap();

        let result = client.complete("hello", &[], "SYS", Some(&key())).await;
        assert!(matches!(result, Err(ClientError::NetworkError(_))));
    }

    #[tokio::test]
    async fn test_reply_mentioning_crisis_is_flagged_but_kept() {
        let mock_server = MockServer::start().await;
        let reply = "If you ever think about suicide, please call 988.";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion(reply)))
            .mount(&mock_server)
            .await;

        let draft = client(&mock_server)
            .complete("I had a rough week", &[], "SYS", Some(&key()))
            .await
            .unwrap();

        assert_eq!(draft.text, reply);
        assert_eq!(draft.safety_flag, Some(SafetyFlag::CrisisMentioned));
    }

    #[tokio::test]
    async fn test_remote_backend_trait_object() {
        let mock_server = MockServer::start().await;
        let backend: Box<dyn CompletionBackend> = Box::new(client(&mock_server));
        assert!(backend.requires_credential());
        assert_eq!(backend.name(), "remote");

        // No key never reaches the network
        let result = backend.complete("hello", &[], "SYS", None).await;
        assert_eq!(result, Err(ClientError::InvalidCredential));
        assert!(mock_server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_offline_backend_always_answers_from_pools() {
        let responder = Arc::new(CannedResponder::seeded(RiskClassifier::new(), 9));
        let backend = create_backend(BackendConfig::Offline, RiskClassifier::new(), responder)
            .unwrap();

        assert!(!backend.requires_credential());
        assert_eq!(backend.name(), "offline");

        let draft = backend.complete("hello", &[], "SYS", None).await.unwrap();
        assert!(is_canned_reply(&draft.text));

        let crisis = backend.complete("I want to end my life", &[], "SYS", None).await.unwrap();
        assert_eq!(crisis.text, CRISIS_RESPONSE);
        assert_eq!(crisis.safety_flag, Some(SafetyFlag::CrisisDetected));
    }
}
