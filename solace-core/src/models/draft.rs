use serde::{Deserialize, Serialize};

use super::SafetyFlag;

/// Follow-up activity the UI may offer next to a reply. Purely a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedTopic {
    Breathing,
    Grounding,
    SleepStory,
    Journaling,
    BodyScan,
    CrisisResources,
}

/// A reply that has been produced but not yet persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseDraft {
    pub text: String,
    pub safety_flag: Option<SafetyFlag>,
    pub suggested_topic: Option<SuggestedTopic>,
}

impl ResponseDraft {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            safety_flag: None,
            suggested_topic: None,
        }
    }

    pub fn with_topic(mut self, topic: Option<SuggestedTopic>) -> Self {
        self.suggested_topic = topic;
        self
    }

    pub fn flagged(mut self, flag: SafetyFlag) -> Self {
        self.safety_flag = Some(flag);
        self
    }
}
