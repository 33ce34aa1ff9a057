//! Orchestrator - composition root
//!
//! Wires the registry, invoker, session store, router and emitter into the
//! `chat` and `stream` entry points.

use crate::artifact::ArtifactRef;
use crate::config::{DispatchConfig, LaneMode};
use crate::emitter::{DispatchEvent, Emitter, EventStream};
use crate::error::{Error, Result};
use crate::event_bus::{BusEvent, EventBus};
use crate::registry::{CapabilityDescriptor, Specialist, SpecialistRegistry};
use crate::router::{FinalAnswer, FinalStatus, Router, RoutingPolicy};
use crate::session::{SessionStore, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identity context supplied by the transport layer
///
/// Trusted as given and only recorded in logs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Caller identifier, if the transport knows one
    pub caller_id: Option<String>,
}

impl CallerContext {
    /// Context for a known caller
    #[must_use]
    pub fn new(caller_id: impl Into<String>) -> Self {
        Self {
            caller_id: Some(caller_id.into()),
        }
    }

    fn label(&self) -> &str {
        self.caller_id.as_deref().unwrap_or("anonymous")
    }
}

/// Read-only introspection of the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Registered specialists in registration order
    pub specialists: Vec<CapabilityDescriptor>,
    /// Maximum invocations per task
    pub step_budget: usize,
    /// Attempts of one specialist per step
    pub max_attempts_per_step: usize,
    /// Concurrent task handling per session
    pub lane_mode: LaneMode,
    /// Sessions currently held in the store
    pub active_sessions: usize,
}

/// Builder for [`Orchestrator`]
#[derive(Default)]
pub struct OrchestratorBuilder {
    config: DispatchConfig,
    store: Option<Arc<SessionStore>>,
    registry: SpecialistRegistry,
}

impl OrchestratorBuilder {
    /// Set the dispatch configuration
    #[must_use]
    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing session store, possibly shared with other orchestrators
    #[must_use]
    pub fn session_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a specialist
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSpecialist` if the identifier is taken.
    pub fn register(mut self, specialist: Arc<dyn Specialist>) -> Result<Self> {
        self.registry.register(specialist)?;
        Ok(self)
    }

    /// Build the orchestrator
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration is invalid or no
    /// specialist is registered.
    pub fn build(self) -> Result<Orchestrator> {
        self.config.validate()?;
        if self.registry.is_empty() {
            return Err(Error::InvalidConfig {
                field: "specialists".to_string(),
                message: "at least one specialist must be registered".to_string(),
            });
        }

        let registry = Arc::new(self.registry);
        let router = Router::new(Arc::clone(&registry), RoutingPolicy::from(&self.config))?;
        info!(
            specialists = ?registry.ids(),
            step_budget = self.config.step_budget,
            "Orchestrator ready"
        );

        Ok(Orchestrator {
            bus: EventBus::new(self.config.bus_capacity),
            config: Arc::new(self.config),
            store: self.store.unwrap_or_default(),
            registry,
            router: Arc::new(router),
        })
    }
}

/// Entry points for dispatching tasks
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<DispatchConfig>,
    registry: Arc<SpecialistRegistry>,
    store: Arc<SessionStore>,
    router: Arc<Router>,
    bus: EventBus,
}

impl Orchestrator {
    /// Start building an orchestrator
    #[must_use]
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    /// Dispatch configuration
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Session store
    #[must_use]
    pub fn session_store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Run a task and return its final answer
    ///
    /// # Errors
    ///
    /// Returns caller-facing errors (`SessionBusy`, `UnknownSession`) and
    /// broken invariants. Specialist failures end in a degraded answer.
    pub async fn chat(
        &self,
        session_id: &str,
        task: &str,
        artifact: Option<ArtifactRef>,
    ) -> Result<FinalAnswer> {
        self.chat_as(&CallerContext::default(), session_id, task, artifact)
            .await
    }

    /// [`chat`](Self::chat) on behalf of an identified caller
    ///
    /// # Errors
    ///
    /// Same as [`chat`](Self::chat).
    pub async fn chat_as(
        &self,
        caller: &CallerContext,
        session_id: &str,
        task: &str,
        artifact: Option<ArtifactRef>,
    ) -> Result<FinalAnswer> {
        info!(
            session_id = %session_id,
            caller = %caller.label(),
            task_len = task.len(),
            has_artifact = artifact.is_some(),
            "Chat request"
        );
        let mut lease = self.store.begin_task(session_id, self.config.lane_mode).await?;
        let emitter = Emitter::silent().with_bus(self.bus.clone(), session_id);
        self.router.run(&mut lease, task, artifact, &emitter).await
    }

    /// Run a task as an event stream
    ///
    /// Nothing runs until the stream is first polled. The last event is
    /// always [`DispatchEvent::Final`]; errors arrive as a `Failed` answer.
    #[must_use]
    pub fn stream(
        &self,
        session_id: &str,
        task: &str,
        artifact: Option<ArtifactRef>,
    ) -> EventStream {
        self.stream_as(&CallerContext::default(), session_id, task, artifact)
    }

    /// [`stream`](Self::stream) on behalf of an identified caller
    #[must_use]
    pub fn stream_as(
        &self,
        caller: &CallerContext,
        session_id: &str,
        task: &str,
        artifact: Option<ArtifactRef>,
    ) -> EventStream {
        info!(
            session_id = %session_id,
            caller = %caller.label(),
            task_len = task.len(),
            has_artifact = artifact.is_some(),
            "Stream request"
        );

        let this = self.clone();
        let session_id = session_id.to_string();
        let task = task.to_string();

        EventStream::new(self.config.event_buffer, move |emitter| async move {
            let emitter = emitter.with_bus(this.bus.clone(), session_id.clone());
            let (task_id, outcome) = match this
                .store
                .begin_task(&session_id, this.config.lane_mode)
                .await
            {
                Ok(mut lease) => {
                    let task_id = lease.task_id();
                    let outcome = this.router.run(&mut lease, &task, artifact, &emitter).await;
                    (task_id, outcome.map(|_| ()))
                }
                Err(error) => (Uuid::new_v4(), Err(error)),
            };

            if let Err(error) = outcome {
                warn!(session_id = %session_id, error = %error, "Stream ended with error");
                let answer = FinalAnswer {
                    task_id,
                    text: error.to_string(),
                    status: FinalStatus::Failed,
                    specialists: Vec::new(),
                    invocations: 0,
                };
                emitter
                    .emit(DispatchEvent::Final {
                        task_id,
                        answer,
                    })
                    .await;
            }
        })
    }

    /// Clear a session's history
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if the session was never created.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        self.store.reset(session_id)
    }

    /// Introspect registered specialists and policy
    #[must_use]
    pub fn status(&self) -> StatusReport {
        StatusReport {
            specialists: self.registry.list().into_iter().cloned().collect(),
            step_budget: self.config.step_budget,
            max_attempts_per_step: self.config.max_attempts_per_step,
            lane_mode: self.config.lane_mode,
            active_sessions: self.store.len(),
        }
    }

    /// Snapshot of a session's turns
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if absent.
    pub fn history(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.store.snapshot(session_id)
    }

    /// Observe events from every session
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.bus.subscribe()
    }

    /// Evict sessions idle longer than the configured TTL
    pub fn evict_idle(&self) -> usize {
        let evicted = self
            .store
            .evict_idle(Duration::from_secs(self.config.session_ttl_secs));
        debug!(evicted, "Idle eviction pass");
        evicted
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("specialists", &self.registry.ids())
            .field("step_budget", &self.config.step_budget)
            .finish()
    }
}
