//! Next-step decision from the current task's recorded turns
//!
//! The decision loop is replayed from the task's specialist-result turns on
//! every cycle, so the router keeps no hidden progress state.

use super::routing::RoutingTable;
use super::types::{FinalAnswer, FinalStatus, InvokeStep, Plan, RoutingDecision, RoutingPolicy};
use crate::error::{Error, Result};
use crate::invoker::with_context;
use crate::registry::{ArtifactRequirement, CapabilityDescriptor, Modality, SpecialistRegistry};
use crate::session::{FailureKind, Turn, TurnRole};
use std::collections::HashSet;

/// Progress of a task rebuilt from its turns
#[derive(Debug, Default)]
pub struct Progress<'a> {
    /// Successful outputs, one per completed step: (specialist, text)
    pub outputs: Vec<(&'a str, &'a str)>,
    /// Failed attempts of the current step
    pub failures: Vec<&'a Turn>,
    /// Specialist-result turns recorded for the task
    pub invocations: usize,
}

impl<'a> Progress<'a> {
    /// Replay the specialist-result turns of one task
    #[must_use]
    pub fn replay(task_turns: &'a [Turn]) -> Self {
        let mut progress = Self::default();
        for turn in task_turns
            .iter()
            .filter(|t| t.role == TurnRole::SpecialistResult)
        {
            progress.invocations += 1;
            let specialist = turn.specialist_id.as_deref().unwrap_or_default();
            if turn.failure.is_none() {
                progress.outputs.push((specialist, turn.content.as_str()));
                progress.failures.clear();
            } else {
                progress.failures.push(turn);
            }
        }
        progress
    }

    /// Index of the step in progress
    #[must_use]
    pub fn step(&self) -> usize {
        self.outputs.len()
    }

    fn specialists(&self) -> Vec<String> {
        self.outputs.iter().map(|(id, _)| id.to_string()).collect()
    }

    fn partial_report(&self) -> String {
        let mut report = String::new();
        if !self.outputs.is_empty() {
            report.push_str("\n\nCompleted so far:");
            for (id, text) in &self.outputs {
                report.push_str(&format!("\n[{}]\n{}", id, text));
            }
        }
        if !self.failures.is_empty() {
            report.push_str("\n\nFailures:");
            for turn in &self.failures {
                report.push_str(&format!(
                    "\n- {} ({}): {}",
                    turn.specialist_id.as_deref().unwrap_or("unknown"),
                    turn.failure.map(|f| f.to_string()).unwrap_or_default(),
                    turn.content
                ));
            }
        }
        report
    }
}

fn answer(plan: &Plan, progress: &Progress<'_>, status: FinalStatus, text: String) -> FinalAnswer {
    FinalAnswer {
        task_id: plan.task_id,
        text,
        status,
        specialists: progress.specialists(),
        invocations: progress.invocations,
    }
}

fn final_answer(plan: &Plan, progress: &Progress<'_>, status: FinalStatus, text: String) -> RoutingDecision {
    RoutingDecision::FinalAnswer(answer(plan, progress, status, text))
}

/// Forced final answer once the step budget is spent
#[must_use]
pub fn budget_exhausted(plan: &Plan, task_turns: &[Turn], policy: &RoutingPolicy) -> FinalAnswer {
    let progress = Progress::replay(task_turns);
    let cause = Error::BudgetExhausted {
        budget: policy.step_budget,
    };
    let text = format!(
        "The task was not fully completed: {}.{}",
        cause,
        progress.partial_report()
    );
    answer(plan, &progress, FinalStatus::BudgetExhausted, text)
}

/// Final answer for a run stopped by its consumer
#[must_use]
pub fn cancelled(plan: &Plan, task_turns: &[Turn]) -> FinalAnswer {
    let progress = Progress::replay(task_turns);
    let text = format!(
        "The task was cancelled before it completed.{}",
        progress.partial_report()
    );
    answer(plan, &progress, FinalStatus::Cancelled, text)
}

fn step_modality(plan: &Plan, descriptor: &CapabilityDescriptor) -> Modality {
    plan.artifact
        .as_ref()
        .and_then(|a| a.modality())
        .filter(|m| descriptor.handles(*m))
        .unwrap_or_else(|| descriptor.primary_modality())
}

fn accepts(plan: &Plan, descriptor: &CapabilityDescriptor) -> bool {
    descriptor.artifact != ArtifactRequirement::Required || plan.artifact.is_some()
}

/// Decide the next routing step for a planned task
///
/// `task_turns` are the turns recorded so far for this task only. A failed
/// step falls back only to a specialist whose keywords in `table` match the
/// step's instruction.
///
/// # Errors
///
/// Returns `Error::UnknownSpecialist` if the plan names a specialist that is
/// not registered.
pub fn next_decision(
    plan: &Plan,
    task_turns: &[Turn],
    registry: &SpecialistRegistry,
    table: &RoutingTable,
    policy: &RoutingPolicy,
) -> Result<RoutingDecision> {
    let progress = Progress::replay(task_turns);
    let step = progress.step();

    let Some(planned) = plan.steps.get(step) else {
        let text = progress
            .outputs
            .last()
            .map(|(_, text)| text.to_string())
            .unwrap_or_default();
        return Ok(final_answer(plan, &progress, FinalStatus::Completed, text));
    };

    let planned_descriptor = registry.descriptor(&planned.specialist_id)?;

    let (specialist_id, attempt) = match progress.failures.last() {
        None => (planned.specialist_id.clone(), 1),
        Some(last) => {
            let failed_id = last.specialist_id.as_deref().unwrap_or(&planned.specialist_id);
            let failure = last.failure.unwrap_or(FailureKind::InvocationError);
            let tried: HashSet<&str> = progress
                .failures
                .iter()
                .filter_map(|t| t.specialist_id.as_deref())
                .collect();

            let modality = step_modality(plan, planned_descriptor);
            let fallback = policy
                .allow_fallback
                .then(|| {
                    registry.list().into_iter().find(|d| {
                        !tried.contains(d.id.as_str())
                            && d.handles(modality)
                            && accepts(plan, d)
                            && table.score(&d.id, &planned.instruction) > 0
                    })
                })
                .flatten();

            let same_attempts = progress
                .failures
                .iter()
                .filter(|t| t.specialist_id.as_deref() == Some(failed_id))
                .count();

            if let Some(descriptor) = fallback {
                (descriptor.id.clone(), 1)
            } else if failure.is_retryable() && same_attempts < policy.max_attempts_per_step {
                (failed_id.to_string(), same_attempts + 1)
            } else {
                let text = format!(
                    "The task was only partly completed: step {} of {} ({}) failed.{}",
                    step + 1,
                    plan.steps.len(),
                    planned.specialist_id,
                    progress.partial_report()
                );
                return Ok(final_answer(plan, &progress, FinalStatus::Degraded, text));
            }
        }
    };

    let descriptor = registry.descriptor(&specialist_id)?;
    let forbids = descriptor.artifact == ArtifactRequirement::Forbidden;

    let context = match progress.outputs.last() {
        Some((_, text)) => Some(*text),
        None if forbids => plan.prior_answer.as_deref(),
        None => None,
    };
    let sub_task = match context {
        Some(context) => with_context(&planned.instruction, context),
        None => planned.instruction.clone(),
    };

    Ok(RoutingDecision::Invoke(InvokeStep {
        step,
        attempt,
        specialist_id,
        sub_task,
        artifact: if forbids { None } else { plan.artifact.clone() },
    }))
}
