//! Invoker - Uniform specialist execution
//!
//! This module turns a structured sub-task into one specialist's result:
//! - Input-shape validation against the descriptor
//! - Per-specialist timeout
//! - Fault wrapping into the dispatch error taxonomy
//!
//! The invoker never touches session state and never retries.

use crate::artifact::ArtifactRef;
use crate::error::{Error, Result};
use crate::registry::{ArtifactRequirement, SpecialistFault, SpecialistRegistry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

/// Line separating a sub-task instruction from forwarded context
pub const CONTEXT_MARKER: &str = "\n\n--- context ---\n";

/// Sub-task handed to a specialist
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistRequest {
    /// Target specialist
    pub specialist_id: String,
    /// Instruction, optionally followed by [`CONTEXT_MARKER`] and context
    pub text: String,
    /// Artifact reference, if any
    pub artifact: Option<ArtifactRef>,
}

impl SpecialistRequest {
    /// Create a request
    #[must_use]
    pub fn new(
        specialist_id: impl Into<String>,
        text: impl Into<String>,
        artifact: Option<ArtifactRef>,
    ) -> Self {
        Self {
            specialist_id: specialist_id.into(),
            text: text.into(),
            artifact,
        }
    }

    /// Split the text into instruction and forwarded context
    #[must_use]
    pub fn split_context(&self) -> (&str, Option<&str>) {
        split_context(&self.text)
    }
}

/// Split text on [`CONTEXT_MARKER`]
#[must_use]
pub fn split_context(text: &str) -> (&str, Option<&str>) {
    match text.split_once(CONTEXT_MARKER) {
        Some((instruction, context)) => (instruction.trim(), Some(context)),
        None => (text.trim(), None),
    }
}

/// Join an instruction with context for the next step
#[must_use]
pub fn with_context(instruction: &str, context: &str) -> String {
    format!("{}{}{}", instruction, CONTEXT_MARKER, context)
}

/// Result produced by a specialist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistOutput {
    /// Text result
    pub text: String,
    /// Structured extras (analysis fields, backend info)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl SpecialistOutput {
    /// Create a text-only output
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Successful invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Specialist output
    pub output: SpecialistOutput,
    /// Wall time in milliseconds
    pub duration_ms: u64,
}

/// Specialist invoker
#[derive(Debug, Clone)]
pub struct SpecialistInvoker {
    registry: Arc<SpecialistRegistry>,
}

impl SpecialistInvoker {
    /// Create a new invoker
    #[must_use]
    pub fn new(registry: Arc<SpecialistRegistry>) -> Self {
        Self { registry }
    }

    /// Get the registry
    #[must_use]
    pub fn registry(&self) -> &SpecialistRegistry {
        &self.registry
    }

    /// Invoke a specialist
    ///
    /// # Errors
    ///
    /// - `UnknownSpecialist` if the id is not registered
    /// - `InvalidInput` if the artifact does not match the declared requirement
    ///   or the specialist rejects the input
    /// - `SpecialistTimeout` if the call exceeds the descriptor timeout
    /// - `SpecialistError` for any other failure
    #[instrument(skip(self, text, artifact), fields(specialist = %specialist_id))]
    pub async fn invoke(
        &self,
        specialist_id: &str,
        text: &str,
        artifact: Option<&ArtifactRef>,
    ) -> Result<Invocation> {
        let specialist = self.registry.get(specialist_id)?;
        let descriptor = specialist.descriptor();

        match (descriptor.artifact, artifact) {
            (ArtifactRequirement::Required, None) => {
                return Err(Error::InvalidInput {
                    specialist: specialist_id.to_string(),
                    message: "an artifact is required".to_string(),
                });
            }
            (ArtifactRequirement::Forbidden, Some(_)) => {
                return Err(Error::InvalidInput {
                    specialist: specialist_id.to_string(),
                    message: "artifacts are not accepted".to_string(),
                });
            }
            _ => {}
        }

        let request = SpecialistRequest::new(specialist_id, text, artifact.cloned());
        let limit = descriptor.timeout;
        let start = Instant::now();

        debug!(text_len = text.len(), timeout_ms = limit.as_millis() as u64, "Invoking specialist");

        let outcome = timeout(limit, specialist.invoke(request)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Err(_) => {
                warn!(duration_ms, "Specialist timed out");
                Err(Error::SpecialistTimeout {
                    specialist: specialist_id.to_string(),
                    timeout_ms: limit.as_millis() as u64,
                })
            }
            Ok(Err(SpecialistFault::UnsupportedInput(message))) => {
                warn!(duration_ms, "Specialist rejected input");
                Err(Error::InvalidInput {
                    specialist: specialist_id.to_string(),
                    message,
                })
            }
            Ok(Err(SpecialistFault::Failed(cause))) => {
                warn!(duration_ms, error = %cause, "Specialist failed");
                Err(Error::SpecialistError {
                    specialist: specialist_id.to_string(),
                    cause: format!("{:#}", cause),
                })
            }
            Ok(Ok(output)) => {
                debug!(duration_ms, output_len = output.text.len(), "Specialist completed");
                Ok(Invocation {
                    output,
                    duration_ms,
                })
            }
        }
    }
}
