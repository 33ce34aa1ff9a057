//! Prism Core - Supervisor Dispatch Engine
//!
//! This crate decides which specialist handles a task and keeps the
//! conversation state around it:
//! - Registry: Capability descriptors and the `Specialist` contract
//! - Invoker: Input validation, per-specialist timeouts, fault wrapping
//! - Session: Ordered turn history with per-session lanes
//! - Router: Task classification and the decision state machine
//! - Emitter: Lazy, cancellable event streams
//! - Orchestrator: The `chat` and `stream` entry points
//!
//! Concrete specialists live outside this crate and are injected at startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod artifact;
pub mod config;
pub mod emitter;
pub mod error;
pub mod event_bus;
pub mod invoker;
pub mod orchestrator;
pub mod registry;
pub mod router;
pub mod session;

pub use artifact::{
    media_type_for_path, modality_for_media_type, Artifact, ArtifactRef, ArtifactStore,
    FsArtifactStore, MemoryArtifactStore,
};
pub use config::{DispatchConfig, LaneMode};
pub use emitter::{DispatchEvent, Emitter, EventStream};
pub use error::{format_error_for_cli, Error, Result, UserFriendlyError};
pub use event_bus::{BusEvent, EventBus};
pub use invoker::{
    Invocation, SpecialistInvoker, SpecialistOutput, SpecialistRequest, CONTEXT_MARKER,
};
pub use orchestrator::{CallerContext, Orchestrator, OrchestratorBuilder, StatusReport};
pub use registry::{
    ArtifactRequirement, CapabilityDescriptor, FailureMode, Modality, Specialist,
    SpecialistFault, SpecialistRegistry,
};
pub use router::{Classification, FinalAnswer, FinalStatus, Router, RoutingDecision, RoutingPolicy};
pub use session::{FailureKind, NewTurn, Session, SessionLease, SessionStore, Turn, TurnRole};
