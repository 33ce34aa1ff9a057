//! Registry - Specialist registration and discovery
//!
//! This module provides the specialist registry, the capability descriptor
//! each specialist declares, and the trait every specialist implements.

use crate::error::{Error, Result};
use crate::invoker::{SpecialistOutput, SpecialistRequest};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a specialist that does not declare one
pub const DEFAULT_SPECIALIST_TIMEOUT: Duration = Duration::from_secs(30);

/// Kind of input a specialist handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Documents: PDFs, scans, text files
    Document,
    /// Still images
    Image,
    /// Frames from a live video feed
    LiveFrame,
    /// Plain text, no artifact
    Text,
}

impl Modality {
    /// Get the modality as a string
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Image => "image",
            Self::LiveFrame => "live_frame",
            Self::Text => "text",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a specialist takes an artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRequirement {
    /// An artifact must be supplied
    Required,
    /// An artifact may be supplied
    Optional,
    /// No artifact may be supplied
    Forbidden,
}

/// Failure a specialist declares it can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Did not answer within the timeout
    Timeout,
    /// Downstream call failed
    InvocationError,
    /// Input shape or content not supported
    UnsupportedInput,
}

/// Capability descriptor for a specialist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique, stable identifier
    pub id: String,
    /// One-line human-readable purpose
    pub purpose: String,
    /// Modalities handled, narrowest first
    pub modalities: Vec<Modality>,
    /// Artifact requirement
    pub artifact: ArtifactRequirement,
    /// Declared failure modes
    pub failure_modes: Vec<FailureMode>,
    /// Per-invocation timeout
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Routing hints matched against task text
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CapabilityDescriptor {
    /// Create a descriptor with text modality and no artifact
    #[must_use]
    pub fn new(id: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            purpose: purpose.into(),
            modalities: vec![Modality::Text],
            artifact: ArtifactRequirement::Forbidden,
            failure_modes: vec![FailureMode::Timeout, FailureMode::InvocationError],
            timeout: DEFAULT_SPECIALIST_TIMEOUT,
            keywords: Vec::new(),
        }
    }

    /// Set the modalities
    #[must_use]
    pub fn with_modalities(mut self, modalities: impl IntoIterator<Item = Modality>) -> Self {
        self.modalities = modalities.into_iter().collect();
        self
    }

    /// Set the artifact requirement
    #[must_use]
    pub fn with_artifact(mut self, artifact: ArtifactRequirement) -> Self {
        self.artifact = artifact;
        self
    }

    /// Set the declared failure modes
    #[must_use]
    pub fn with_failure_modes(mut self, modes: impl IntoIterator<Item = FailureMode>) -> Self {
        self.failure_modes = modes.into_iter().collect();
        self
    }

    /// Set the timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the routing keywords
    #[must_use]
    pub fn with_keywords<S: Into<String>>(mut self, keywords: impl IntoIterator<Item = S>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the descriptor lists this modality
    #[must_use]
    pub fn handles(&self, modality: Modality) -> bool {
        self.modalities.contains(&modality)
    }

    /// Primary modality (first declared)
    #[must_use]
    pub fn primary_modality(&self) -> Modality {
        self.modalities.first().copied().unwrap_or(Modality::Text)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Implementation-side failure of a specialist
#[derive(Debug, thiserror::Error)]
pub enum SpecialistFault {
    /// The specialist cannot process this input
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// The invocation failed
    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Trait for specialist implementations
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Specialist: Send + Sync {
    /// Get the capability descriptor
    fn descriptor(&self) -> &CapabilityDescriptor;

    /// Process a sub-task
    async fn invoke(
        &self,
        request: SpecialistRequest,
    ) -> std::result::Result<SpecialistOutput, SpecialistFault>;
}

/// Registry of specialists
///
/// Filled at startup, then shared read-only behind an `Arc`.
#[derive(Default)]
pub struct SpecialistRegistry {
    specialists: HashMap<String, Arc<dyn Specialist>>,
    order: Vec<String>,
}

impl SpecialistRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a specialist
    ///
    /// # Errors
    ///
    /// Returns `Error::DuplicateSpecialist` if the identifier is taken.
    pub fn register(&mut self, specialist: Arc<dyn Specialist>) -> Result<()> {
        let id = specialist.descriptor().id.clone();
        if self.specialists.contains_key(&id) {
            return Err(Error::DuplicateSpecialist(id));
        }
        debug!(specialist = %id, "Registering specialist");
        self.order.push(id.clone());
        self.specialists.insert(id, specialist);
        Ok(())
    }

    /// Get a specialist by id
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSpecialist` if absent.
    pub fn get(&self, id: &str) -> Result<Arc<dyn Specialist>> {
        self.specialists
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownSpecialist(id.to_string()))
    }

    /// Get a descriptor by id
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSpecialist` if absent.
    pub fn descriptor(&self, id: &str) -> Result<&CapabilityDescriptor> {
        self.specialists
            .get(id)
            .map(|s| s.descriptor())
            .ok_or_else(|| Error::UnknownSpecialist(id.to_string()))
    }

    /// Check if a specialist exists
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.specialists.contains_key(id)
    }

    /// All descriptors in registration order
    #[must_use]
    pub fn list(&self) -> Vec<&CapabilityDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.specialists.get(id))
            .map(|s| s.descriptor())
            .collect()
    }

    /// All identifiers in registration order
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.order.iter().map(String::as_str).collect()
    }

    /// Get the number of registered specialists
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Check if the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for SpecialistRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpecialistRegistry")
            .field("specialists", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mock(id: &str) -> Arc<dyn Specialist> {
        let mut specialist = MockSpecialist::new();
        specialist
            .expect_descriptor()
            .return_const(CapabilityDescriptor::new(id, "test"));
        Arc::new(specialist)
    }

    #[test]
    fn test_registration_order() {
        let mut registry = SpecialistRegistry::new();
        for id in ["document", "vision", "qa"] {
            registry.register(mock(id)).unwrap();
        }

        assert_eq!(registry.ids(), vec!["document", "vision", "qa"]);
        let listed: Vec<_> = registry.list().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(listed, vec!["document", "vision", "qa"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = SpecialistRegistry::new();
        registry.register(mock("qa")).unwrap();
        let err = registry.register(mock("qa")).unwrap_err();
        assert!(matches!(err, Error::DuplicateSpecialist(id) if id == "qa"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_specialist() {
        let registry = SpecialistRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.get("ghost"),
            Err(Error::UnknownSpecialist(_))
        ));
        assert!(matches!(
            registry.descriptor("ghost"),
            Err(Error::UnknownSpecialist(_))
        ));
    }

    #[test]
    fn test_descriptor_serializes_timeout_in_ms() {
        let descriptor = CapabilityDescriptor::new("video", "Live frames")
            .with_modalities([Modality::LiveFrame])
            .with_artifact(ArtifactRequirement::Required)
            .with_timeout(Duration::from_secs(10))
            .with_keywords(["video", "frame"]);

        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["timeout_ms"], 10_000);
        assert_eq!(json["modalities"][0], "live_frame");
        assert_eq!(json["artifact"], "required");

        let back: CapabilityDescriptor = serde_json::from_value(json).unwrap();
        assert_eq!(back.timeout, Duration::from_secs(10));
        assert!(back.handles(Modality::LiveFrame));
    }
}
