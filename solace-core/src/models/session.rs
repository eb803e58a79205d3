use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SafetyFlag;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub crisis_flag: bool,
    pub crisis_reason: Option<String>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            ended_at: None,
            crisis_flag: false,
            crisis_reason: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Raise the crisis flag. The flag never clears and the first reason wins.
    pub(crate) fn mark_crisis(&mut self, reason: SafetyFlag) {
        self.crisis_flag = true;
        if self.crisis_reason.is_none() {
            self.crisis_reason = Some(reason.as_str().to_string());
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
