//! Dispatcher — the safety-gated path from a user message to a stored reply.
//!
//! Per call:
//!   Start → Classified → CrisisResolved
//!                      → Degraded (no credential)
//!                      → RemoteAttempted → RemoteResolved | Degraded
//!   → Persisted
//!
//! Classification always completes before the backend is touched. Backend
//! failures degrade to a canned reply and are never returned to the caller.
//! Calls for the same session run one at a time in arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use thiserror::Error;
use uuid::Uuid;

use crate::canned::{crisis_draft, CannedResponder};
use crate::classifier::RiskClassifier;
use crate::completion::{CompletionBackend, DEFAULT_SYSTEM_PROMPT};
use crate::credentials::CredentialProvider;
use crate::models::{Message, ResponseDraft, SafetyFlag, Sender, SuggestedTopic};
use crate::store::{ConversationStore, StoreError};

/// Prune dead per-session lock entries once the map grows past this.
const SESSION_LOCK_PRUNE_THRESHOLD: usize = 128;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a reply was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Crisis phrase in the user text; fixed resource message, no backend call.
    Crisis,
    /// The remote model answered.
    Remote,
    /// Answered locally: the offline backend, or a canned reply because the
    /// remote backend has no credential.
    Offline,
    /// The backend failed; canned reply.
    Fallback,
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchOutcome::Crisis => "crisis",
            DispatchOutcome::Remote => "remote",
            DispatchOutcome::Offline => "offline",
            DispatchOutcome::Fallback => "fallback",
        }
    }
}

/// Stored reply plus diagnostics that are not persisted.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub message: Message,
    pub outcome: DispatchOutcome,
    pub suggested_topic: Option<SuggestedTopic>,
}

#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Secret name of the remote API key
    pub credential_key: String,
    pub system_prompt: String,
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            credential_key: "OPENAI_API_KEY".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

pub struct Dispatcher {
    classifier: RiskClassifier,
    backend: Arc<dyn CompletionBackend>,
    responder: Arc<CannedResponder>,
    store: Arc<dyn ConversationStore>,
    credentials: Arc<dyn CredentialProvider>,
    options: DispatcherOptions,
    session_locks: Mutex<HashMap<Uuid, Weak<tokio::sync::Mutex<()>>>>,
}

impl Dispatcher {
    pub fn new(
        classifier: RiskClassifier,
        backend: Arc<dyn CompletionBackend>,
        responder: Arc<CannedResponder>,
        store: Arc<dyn ConversationStore>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            classifier,
            backend,
            responder,
            store,
            credentials,
            options: DispatcherOptions::default(),
            session_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: DispatcherOptions) -> Self {
        self.options = options;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConversationStore> {
        &self.store
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Answer `text` in `session_id` and return the stored assistant message.
    pub async fn send(&self, text: &str, session_id: Uuid) -> Result<Message, DispatchError> {
        Ok(self.dispatch(text, session_id).await?.message)
    }

    /// Like [`send`](Self::send) but also reports how the reply was produced.
    ///
    /// The user message is appended first; the history handed to the backend
    /// is everything stored before it.
    pub async fn dispatch(&self, text: &str, session_id: Uuid) -> Result<Dispatched, DispatchError> {
        let classification = self.classifier.assess(text);

        let lock = self.session_lock(session_id);
        let _guard = lock.lock().await;

        let user_flag = classification
            .is_crisis
            .then_some(SafetyFlag::CrisisDetected);
        let user_message = self
            .store
            .append(session_id, Sender::User, text, user_flag)
            .await?;

        let mut history = self.store.messages_for(session_id).await?;
        history.retain(|m| m.id != user_message.id);

        let (draft, outcome) = if classification.is_crisis {
            (crisis_draft(), DispatchOutcome::Crisis)
        } else {
            self.resolve(text, &history).await
        };

        let reply = self
            .store
            .append(session_id, Sender::Assistant, &draft.text, draft.safety_flag)
            .await?;

        tracing::info!(
            session_id = %session_id,
            outcome = outcome.as_str(),
            backend = self.backend.name(),
            flagged = reply.safety_flag.is_some(),
            reply_len = reply.text.len(),
            "Reply dispatched"
        );

        Ok(Dispatched {
            message: reply,
            outcome,
            suggested_topic: draft.suggested_topic,
        })
    }

    async fn resolve(&self, text: &str, history: &[Message]) -> (ResponseDraft, DispatchOutcome) {
        let api_key = if self.backend.requires_credential() {
            match self.credentials.api_key(&self.options.credential_key) {
                Some(key) => Some(key),
                None => {
                    tracing::info!(
                        backend = self.backend.name(),
                        "No credential available, answering offline"
                    );
                    return (
                        self.responder.generate(text, history),
                        DispatchOutcome::Offline,
                    );
                }
            }
        } else {
            None
        };

        match self
            .backend
            .complete(text, history, &self.options.system_prompt, api_key.as_ref())
            .await
        {
            Ok(draft) if !draft.text.trim().is_empty() => {
                let outcome = if self.backend.requires_credential() {
                    DispatchOutcome::Remote
                } else {
                    DispatchOutcome::Offline
                };
                (draft, outcome)
            }
            Ok(_) => {
                tracing::warn!(backend = self.backend.name(), "Backend returned an empty reply, falling back");
                (self.responder.generate(text, history), DispatchOutcome::Fallback)
            }
            Err(e) => {
                tracing::warn!(
                    backend = self.backend.name(),
                    kind = e.kind(),
                    error = %e,
                    "Completion failed, falling back to canned reply"
                );
                (self.responder.generate(text, history), DispatchOutcome::Fallback)
            }
        }
    }

    fn session_lock(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .session_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if locks.len() > SESSION_LOCK_PRUNE_THRESHOLD {
            locks.retain(|_, weak| weak.strong_count() > 0);
        }

        if let Some(existing) = locks.get(&session_id).and_then(Weak::upgrade) {
            return existing;
        }

        let lock = Arc::new(tokio::sync::Mutex::new(()));
        locks.insert(session_id, Arc::downgrade(&lock));
        lock
    }
}
