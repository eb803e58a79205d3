use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Sender::User),
            "assistant" => Some(Sender::Assistant),
            _ => None,
        }
    }
}

/// Safety annotation attached to a message at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyFlag {
    /// The user's text matched a crisis phrase.
    CrisisDetected,
    /// A model reply mentioned crisis content.
    CrisisMentioned,
}

impl SafetyFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyFlag::CrisisDetected => "crisis_detected",
            SafetyFlag::CrisisMentioned => "crisis_mentioned",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "crisis_detected" => Some(SafetyFlag::CrisisDetected),
            "crisis_mentioned" => Some(SafetyFlag::CrisisMentioned),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub session_id: Uuid,
    pub sender: Sender,
    pub created_at: DateTime<Utc>,
    pub text: String,
    pub safety_flag: Option<SafetyFlag>,
}
