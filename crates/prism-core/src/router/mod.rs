//! Router - the supervisor state machine
//!
//! `Deciding → {Invoking → Deciding, Finalizing → Done}`. Classification and
//! the per-cycle decision are pure functions in [`routing`] and [`decision`];
//! [`Router::run`] drives them against a session lease.

/// Next-step decision replayed from recorded turns.
pub mod decision;
/// Task classification and the compiled routing table.
pub mod routing;
/// Router data types.
pub mod types;

pub use decision::next_decision;
pub use routing::{classify, RoutingTable};
pub use types::{
    Classification, FinalAnswer, FinalStatus, InvokeStep, Plan, PlannedStep, RoutingDecision,
    RoutingPolicy,
};

use crate::artifact::ArtifactRef;
use crate::emitter::{preview, DispatchEvent, Emitter};
use crate::error::Result;
use crate::invoker::{split_context, SpecialistInvoker};
use crate::registry::SpecialistRegistry;
use crate::session::{NewTurn, SessionLease, Turn, TurnRole};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Supervisor driving one task at a time per lease
#[derive(Debug)]
pub struct Router {
    registry: Arc<SpecialistRegistry>,
    invoker: SpecialistInvoker,
    table: RoutingTable,
    policy: RoutingPolicy,
}

impl Router {
    /// Create a router over a registry
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if a specialist keyword cannot be compiled.
    pub fn new(registry: Arc<SpecialistRegistry>, policy: RoutingPolicy) -> Result<Self> {
        let table = RoutingTable::new(registry.list())?;
        Ok(Self {
            invoker: SpecialistInvoker::new(Arc::clone(&registry)),
            registry,
            table,
            policy,
        })
    }

    /// Routing policy
    #[must_use]
    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Compiled routing table
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Run one task to its final answer
    ///
    /// Specialist timeouts and failures are recorded as turns and never
    /// returned here.
    ///
    /// # Errors
    ///
    /// - `UnknownSession` if the session is reset or evicted mid-task
    /// - `UnknownSpecialist` or `Internal` on broken invariants
    #[instrument(
        skip(self, lease, task, artifact, emitter),
        fields(session_id = %lease.session_id(), task_id = %lease.task_id())
    )]
    pub async fn run(
        &self,
        lease: &mut SessionLease,
        task: &str,
        artifact: Option<ArtifactRef>,
        emitter: &Emitter,
    ) -> Result<FinalAnswer> {
        let task_id = lease.task_id();
        let history = lease.snapshot()?;
        lease.append(NewTurn::user(task_id, task, artifact.clone()))?;

        let classification = classify(task, artifact.as_ref(), &history, &self.table);
        debug!(steps = classification.steps().len(), "Task classified");

        let steps = match classification {
            Classification::Direct(text) => {
                return self
                    .finalize(lease, emitter, direct(task_id, text, FinalStatus::Direct))
                    .await;
            }
            Classification::Clarify(text) => {
                return self
                    .finalize(lease, emitter, direct(task_id, text, FinalStatus::Clarification))
                    .await;
            }
            Classification::Invoke(step) => vec![step],
            Classification::InvokeSequence(steps) => steps,
        };

        let plan = Plan {
            task_id,
            steps,
            artifact,
            prior_answer: history
                .iter()
                .rev()
                .find(|t| t.role == TurnRole::FinalAnswer)
                .map(|t| t.content.clone()),
        };

        loop {
            let turns = task_turns(lease)?;
            let decision =
                next_decision(&plan, &turns, &self.registry, &self.table, &self.policy)?;
            let step = match decision {
                RoutingDecision::FinalAnswer(answer) => {
                    return self.finalize(lease, emitter, answer).await;
                }
                RoutingDecision::Invoke(step) => step,
            };

            let invocations = turns
                .iter()
                .filter(|t| t.role == TurnRole::SpecialistResult)
                .count();
            if invocations >= self.policy.step_budget {
                warn!(budget = self.policy.step_budget, "Step budget exhausted");
                let answer = decision::budget_exhausted(&plan, &turns, &self.policy);
                return self.finalize(lease, emitter, answer).await;
            }
            if emitter.is_cancelled() {
                info!(invocations, "Run cancelled by consumer");
                let answer = decision::cancelled(&plan, &turns);
                return self.finalize(lease, emitter, answer).await;
            }

            self.invoke(lease, emitter, step, invocations + 1).await?;
        }
    }

    async fn invoke(
        &self,
        lease: &mut SessionLease,
        emitter: &Emitter,
        step: InvokeStep,
        number: usize,
    ) -> Result<()> {
        let task_id = lease.task_id();
        lease.authorize(&step.specialist_id);
        lease.set_step(number)?;

        let (instruction, _) = split_context(&step.sub_task);
        emitter
            .emit(DispatchEvent::InvokeStarted {
                task_id,
                step: number,
                attempt: step.attempt,
                specialist_id: step.specialist_id.clone(),
                sub_task: instruction.to_string(),
            })
            .await;

        let start = Instant::now();
        let outcome = self
            .invoker
            .invoke(&step.specialist_id, &step.sub_task, step.artifact.as_ref())
            .await;

        let (turn, duration_ms) = match outcome {
            Ok(invocation) => {
                let turn = lease.append(NewTurn::specialist_success(
                    task_id,
                    &step.specialist_id,
                    invocation.output.text,
                ))?;
                (turn, invocation.duration_ms)
            }
            Err(error) => {
                let Some(kind) = error.failure_kind() else {
                    return Err(error);
                };
                warn!(specialist = %step.specialist_id, failure = %kind, "Recording failed invocation");
                let turn = lease.append(NewTurn::specialist_failure(
                    task_id,
                    &step.specialist_id,
                    kind,
                    error.to_string(),
                ))?;
                (turn, start.elapsed().as_millis() as u64)
            }
        };

        emitter
            .emit(DispatchEvent::InvokeResult {
                task_id,
                step: number,
                specialist_id: step.specialist_id,
                success: turn.failure.is_none(),
                failure: turn.failure,
                turn_seq: turn.seq,
                duration_ms,
                preview: preview(&turn.content),
            })
            .await;
        Ok(())
    }

    async fn finalize(
        &self,
        lease: &mut SessionLease,
        emitter: &Emitter,
        answer: FinalAnswer,
    ) -> Result<FinalAnswer> {
        lease.append(NewTurn::final_answer(answer.task_id, answer.text.clone()))?;
        lease.set_step(0)?;
        info!(
            status = ?answer.status,
            invocations = answer.invocations,
            "Task finalized"
        );
        emitter
            .emit(DispatchEvent::Final {
                task_id: answer.task_id,
                answer: answer.clone(),
            })
            .await;
        Ok(answer)
    }
}

fn direct(task_id: uuid::Uuid, text: String, status: FinalStatus) -> FinalAnswer {
    FinalAnswer {
        task_id,
        text,
        status,
        specialists: Vec::new(),
        invocations: 0,
    }
}

fn task_turns(lease: &SessionLease) -> Result<Vec<Turn>> {
    let task_id = lease.task_id();
    Ok(lease
        .snapshot()?
        .into_iter()
        .filter(|t| t.task_id == task_id)
        .collect())
}

#[cfg(test)]
mod tests;
