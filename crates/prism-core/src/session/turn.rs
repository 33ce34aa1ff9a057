//! Turn and session types

use crate::artifact::ArtifactRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// Task text submitted by the user
    User,
    /// Outcome of one specialist invocation
    SpecialistResult,
    /// Terminal answer for a task
    FinalAnswer,
}

/// Recorded failure of a specialist invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// `SpecialistTimeout`
    Timeout,
    /// `SpecialistError`
    InvocationError,
    /// `InvalidInput`
    InvalidInput,
}

impl FailureKind {
    /// Whether trying the same specialist again can help
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidInput)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::InvocationError => write!(f, "invocation error"),
            Self::InvalidInput => write!(f, "invalid input"),
        }
    }
}

/// One immutable entry in a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Position in the session, contiguous from 1
    pub seq: u64,
    /// Task this turn belongs to
    pub task_id: Uuid,
    /// Role
    pub role: TurnRole,
    /// Text content, or an error summary for failed invocations
    pub content: String,
    /// Artifact reference, never the bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    /// Specialist that produced a specialist-result turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub specialist_id: Option<String>,
    /// Failure recorded by a specialist-result turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// When the turn was appended
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Whether this is a successful specialist result
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.role == TurnRole::SpecialistResult && self.failure.is_none()
    }
}

/// A turn waiting to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewTurn {
    /// Task this turn belongs to
    pub task_id: Uuid,
    /// Role
    pub role: TurnRole,
    /// Content
    pub content: String,
    /// Artifact reference
    pub artifact: Option<ArtifactRef>,
    /// Producing specialist
    pub specialist_id: Option<String>,
    /// Recorded failure
    pub failure: Option<FailureKind>,
}

impl NewTurn {
    /// User task turn
    #[must_use]
    pub fn user(task_id: Uuid, content: impl Into<String>, artifact: Option<ArtifactRef>) -> Self {
        Self {
            task_id,
            role: TurnRole::User,
            content: content.into(),
            artifact,
            specialist_id: None,
            failure: None,
        }
    }

    /// Successful specialist-result turn
    #[must_use]
    pub fn specialist_success(
        task_id: Uuid,
        specialist_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            role: TurnRole::SpecialistResult,
            content: content.into(),
            artifact: None,
            specialist_id: Some(specialist_id.into()),
            failure: None,
        }
    }

    /// Failed specialist-result turn carrying an error summary
    #[must_use]
    pub fn specialist_failure(
        task_id: Uuid,
        specialist_id: impl Into<String>,
        failure: FailureKind,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            role: TurnRole::SpecialistResult,
            content: summary.into(),
            artifact: None,
            specialist_id: Some(specialist_id.into()),
            failure: Some(failure),
        }
    }

    /// Final-answer turn
    #[must_use]
    pub fn final_answer(task_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            task_id,
            role: TurnRole::FinalAnswer,
            content: content.into(),
            artifact: None,
            specialist_id: None,
            failure: None,
        }
    }

    pub(crate) fn into_turn(self, seq: u64) -> Turn {
        Turn {
            seq,
            task_id: self.task_id,
            role: self.role,
            content: self.content,
            artifact: self.artifact,
            specialist_id: self.specialist_id,
            failure: self.failure,
            created_at: Utc::now(),
        }
    }
}

/// Conversation state for one session identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier
    pub id: String,
    /// Ordered history
    pub turns: Vec<Turn>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last append or reset
    pub last_activity: DateTime<Utc>,
    /// Invocations made by the in-flight task
    pub step_counter: usize,
    /// Bumped on every reset
    pub epoch: u64,
}

impl Session {
    /// Create an empty session
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            turns: Vec::new(),
            created_at: now,
            last_activity: now,
            step_counter: 0,
            epoch: 0,
        }
    }

    /// Sequence number the next turn receives
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.turns.len() as u64 + 1
    }

    pub(crate) fn push(&mut self, turn: NewTurn) -> Turn {
        let turn = turn.into_turn(self.next_seq());
        self.turns.push(turn.clone());
        self.last_activity = turn.created_at;
        turn
    }

    pub(crate) fn clear(&mut self) {
        self.turns.clear();
        self.step_counter = 0;
        self.epoch += 1;
        self.last_activity = Utc::now();
    }
}
