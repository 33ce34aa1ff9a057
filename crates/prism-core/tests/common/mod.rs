//! Scripted specialists shared by the integration tests

#![allow(dead_code)]

use prism_core::{
    ArtifactRef, ArtifactRequirement, CapabilityDescriptor, DispatchConfig, Modality,
    Orchestrator, Specialist, SpecialistFault, SpecialistOutput, SpecialistRequest,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Echoes its instruction, optionally sleeping first
pub struct Scripted {
    descriptor: CapabilityDescriptor,
    delay: Duration,
    fail_first: usize,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(descriptor: CapabilityDescriptor) -> Self {
        Self {
            descriptor,
            delay: Duration::ZERO,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_first(mut self, calls: usize) -> Self {
        self.fail_first = calls;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Specialist for Scripted {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        request: SpecialistRequest,
    ) -> Result<SpecialistOutput, SpecialistFault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if call < self.fail_first {
            return Err(SpecialistFault::Failed(anyhow::anyhow!("scripted failure")));
        }
        let (instruction, context) = request.split_context();
        let text = match context {
            Some(context) => format!("{} <- {}", instruction, context),
            None => format!("{}: extracted text", self.descriptor.id),
        };
        Ok(SpecialistOutput::text(text))
    }
}

pub fn document() -> CapabilityDescriptor {
    CapabilityDescriptor::new("document", "Extract text from documents and scans")
        .with_modalities([Modality::Document, Modality::Image])
        .with_artifact(ArtifactRequirement::Required)
        .with_keywords(["extract text", "extract", "ocr", "invoice"])
}

pub fn qa() -> CapabilityDescriptor {
    CapabilityDescriptor::new("qa", "Answer questions and summarize text")
        .with_keywords(["summarize", "what is", "how much"])
}

pub fn video() -> CapabilityDescriptor {
    CapabilityDescriptor::new("video", "Analyze live video frames")
        .with_modalities([Modality::LiveFrame])
        .with_artifact(ArtifactRequirement::Required)
        .with_keywords(["emotion", "faces", "frame"])
}

pub fn pdf() -> ArtifactRef {
    ArtifactRef::new("contract.pdf").with_media_type("application/pdf")
}

pub fn frame() -> ArtifactRef {
    ArtifactRef::new("cam-1").with_media_type("image/x-frame")
}

pub fn orchestrator(config: DispatchConfig, specialists: Vec<Arc<dyn Specialist>>) -> Orchestrator {
    let mut builder = Orchestrator::builder().config(config);
    for specialist in specialists {
        builder = builder.register(specialist).expect("unique specialist ids");
    }
    builder.build().expect("valid orchestrator")
}

pub fn standard() -> Orchestrator {
    orchestrator(
        DispatchConfig::default(),
        vec![
            Arc::new(Scripted::new(document())),
            Arc::new(Scripted::new(qa())),
            Arc::new(Scripted::new(video())),
        ],
    )
}
