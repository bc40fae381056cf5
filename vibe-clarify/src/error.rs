use std::fmt;
use thiserror::Error;
use vibe_channels::UserId;

/// Where in the exchange the clarifier went quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Selection,
    Clarification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Selection => f.write_str("selection"),
            Stage::Clarification => f.write_str("clarification"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ClarifyError {
    #[error("tone analysis failed: {0}")]
    Analysis(String),

    #[error("invalid selection {input:?}: expected a number between 1 and {count}")]
    InvalidSelection { input: String, count: usize },

    #[error("{clarifier_id} did not respond during {stage}")]
    NoResponse { clarifier_id: UserId, stage: Stage },

    #[error("delivery to {user_id} failed: {reason}")]
    Delivery { user_id: UserId, reason: String },
}

impl ClarifyError {
    pub(crate) fn delivery(user_id: &UserId, e: &anyhow::Error) -> Self {
        Self::Delivery {
            user_id: user_id.clone(),
            reason: format!("{e:#}"),
        }
    }
}
