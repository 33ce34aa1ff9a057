//! Real-time video specialist
//!
//! Each invocation analyzes a single captured frame through the vision-chat
//! backend. Capturing frames is the caller's job.

use crate::backend::HttpBackend;
use anyhow::Context;
use async_trait::async_trait;
use prism_core::{
    ArtifactRequirement, ArtifactStore, CapabilityDescriptor, FailureMode, Modality, Specialist,
    SpecialistFault, SpecialistOutput, SpecialistRequest,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Registry id
pub const VIDEO_ID: &str = "video";

/// Frames are expected to be answered quickly
pub const DEFAULT_VIDEO_TIMEOUT: Duration = Duration::from_secs(10);

const FRAME_PROMPT: &str = "You are analyzing a single frame from a live camera feed.\n\
Report, in short lines:\n\
- faces: how many faces are visible\n\
- emotions: the apparent emotion of each face (happy, sad, angry, surprised, neutral, ...)\n\
- people: how many people are in view\n\
- scene: one sentence describing the setting and activity\n\
If something cannot be determined, say so instead of guessing.";

/// Analyzes live frames with a vision model
pub struct VideoSpecialist {
    descriptor: CapabilityDescriptor,
    store: Arc<dyn ArtifactStore>,
    backend: Option<HttpBackend>,
}

impl VideoSpecialist {
    /// Create a video specialist reading frames from `store`
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            store,
            backend: None,
        }
    }

    /// Default capability descriptor
    #[must_use]
    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(VIDEO_ID, "Detect faces, emotions and people in live video frames")
            .with_modalities([Modality::LiveFrame])
            .with_artifact(ArtifactRequirement::Required)
            .with_failure_modes([
                FailureMode::Timeout,
                FailureMode::InvocationError,
                FailureMode::UnsupportedInput,
            ])
            .with_timeout(DEFAULT_VIDEO_TIMEOUT)
            .with_keywords([
                "video", "frame", "face", "faces", "emotion", "people", "camera", "webcam",
                "live",
            ])
    }

    /// Use `backend` for frame analysis
    #[must_use]
    pub fn with_backend(mut self, backend: HttpBackend) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Override the descriptor timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.descriptor = self.descriptor.with_timeout(timeout);
        self
    }
}

fn frame_prompt(instruction: &str) -> String {
    if instruction.is_empty() {
        FRAME_PROMPT.to_string()
    } else {
        format!("{}\n\nThe user asked: {}", FRAME_PROMPT, instruction)
    }
}

/// Frames captured as raw `image/x-frame` are sent as JPEG
fn wire_media_type(media_type: Option<&str>) -> &str {
    match media_type {
        Some(t) if t.starts_with("image/") && t != "image/x-frame" => t,
        _ => "image/jpeg",
    }
}

#[async_trait]
impl Specialist for VideoSpecialist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: SpecialistRequest) -> Result<SpecialistOutput, SpecialistFault> {
        let backend = self.backend.as_ref().ok_or_else(|| {
            SpecialistFault::UnsupportedInput("no vision backend configured for live video".to_string())
        })?;
        let reference = request
            .artifact
            .as_ref()
            .ok_or_else(|| SpecialistFault::UnsupportedInput("a video frame is required".to_string()))?;
        let frame = self.store.fetch(reference).await.context("fetching frame")?;

        let (instruction, _) = request.split_context();
        let media_type = wire_media_type(frame.media_type());
        let answer = backend
            .vision_chat(&frame_prompt(instruction), &frame.bytes, media_type)
            .await?;

        info!(handle = %reference.handle, size = frame.bytes.len(), "Frame analyzed");
        Ok(SpecialistOutput::text(answer).with_metadata(json!({
            "model": backend.model(),
            "media_type": media_type,
        })))
    }
}
