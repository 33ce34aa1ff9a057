//! Router data types

use crate::artifact::ArtifactRef;
use crate::config::DispatchConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One planned specialist step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedStep {
    /// Specialist to invoke
    pub specialist_id: String,
    /// Instruction for this step
    pub instruction: String,
}

impl PlannedStep {
    /// Create a planned step
    #[must_use]
    pub fn new(specialist_id: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            specialist_id: specialist_id.into(),
            instruction: instruction.into(),
        }
    }
}

/// Outcome of classifying a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Answerable from prior turns
    Direct(String),
    /// Ask the user what they mean
    Clarify(String),
    /// Exactly one specialist
    Invoke(PlannedStep),
    /// A chain of specialists, each fed the previous output
    InvokeSequence(Vec<PlannedStep>),
}

impl Classification {
    /// Planned steps, empty for direct and clarifying answers
    #[must_use]
    pub fn steps(&self) -> &[PlannedStep] {
        match self {
            Self::Invoke(step) => std::slice::from_ref(step),
            Self::InvokeSequence(steps) => steps,
            Self::Direct(_) | Self::Clarify(_) => &[],
        }
    }
}

/// A classified task ready for the decision loop
#[derive(Debug, Clone)]
pub struct Plan {
    /// Task identifier
    pub task_id: Uuid,
    /// Steps in order
    pub steps: Vec<PlannedStep>,
    /// Artifact attached to the task
    pub artifact: Option<ArtifactRef>,
    /// Most recent final answer before this task, for standalone context consumers
    pub prior_answer: Option<String>,
}

/// Retry and budget policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Maximum invocations per task
    pub step_budget: usize,
    /// Attempts of one specialist per step
    pub max_attempts_per_step: usize,
    /// Whether to switch to another specialist of the same modality
    pub allow_fallback: bool,
}

impl From<&DispatchConfig> for RoutingPolicy {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            step_budget: config.step_budget,
            max_attempts_per_step: config.max_attempts_per_step,
            allow_fallback: config.allow_fallback,
        }
    }
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self::from(&DispatchConfig::default())
    }
}

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalStatus {
    /// Every planned step succeeded
    Completed,
    /// Answered from prior turns, no specialist invoked
    Direct,
    /// The router asked a clarifying question
    Clarification,
    /// A step failed for good; partial results only
    Degraded,
    /// The step budget ran out
    BudgetExhausted,
    /// The stream consumer went away
    Cancelled,
    /// An error ended the run
    Failed,
}

impl FinalStatus {
    /// Whether the task was fully answered
    #[must_use]
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed | Self::Direct)
    }
}

/// Terminal answer for a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// Task identifier
    pub task_id: Uuid,
    /// Answer text
    pub text: String,
    /// How the task ended
    pub status: FinalStatus,
    /// Specialists whose output contributed, in order
    pub specialists: Vec<String>,
    /// Number of specialist invocations made
    pub invocations: usize,
}

/// A decision to invoke one specialist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeStep {
    /// Index of the planned step, from 0
    pub step: usize,
    /// Attempt number for this step, from 1
    pub attempt: usize,
    /// Specialist to invoke
    pub specialist_id: String,
    /// Instruction plus forwarded context
    pub sub_task: String,
    /// Artifact to attach
    pub artifact: Option<ArtifactRef>,
}

/// One routing decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// End the task
    FinalAnswer(FinalAnswer),
    /// Invoke a specialist
    Invoke(InvokeStep),
}
