//! Document specialist: text extraction and document analysis
//!
//! Text-like artifacts are decoded locally. Everything else goes through the
//! OCR backend.

use crate::backend::HttpBackend;
use anyhow::Context;
use async_trait::async_trait;
use prism_core::{
    ArtifactRequirement, ArtifactStore, CapabilityDescriptor, FailureMode, Modality, Specialist,
    SpecialistFault, SpecialistOutput, SpecialistRequest,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry id
pub const DOCUMENT_ID: &str = "document";

/// Separates extracted text from the analysis block in the output
pub const ANALYSIS_MARKER: &str = "--- analysis ---";

const INVOICE_WORDS: &[&str] = &["invoice", "total", "amount due", "bill to"];
const CONTRACT_WORDS: &[&str] = &["contract", "agreement", "parties", "whereas"];
const RECEIPT_WORDS: &[&str] = &["receipt", "thank you", "transaction"];

/// Kind of document, detected from its text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Invoice or bill
    Invoice,
    /// Contract or agreement
    Contract,
    /// Purchase receipt
    Receipt,
    /// Anything else
    General,
}

impl DocumentKind {
    /// Detect the kind by keyword hits, most hits wins
    #[must_use]
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        let hits = |words: &[&str]| words.iter().filter(|w| lower.contains(*w)).count();

        let scored = [
            (Self::Invoice, hits(INVOICE_WORDS)),
            (Self::Contract, hits(CONTRACT_WORDS)),
            (Self::Receipt, hits(RECEIPT_WORDS)),
        ];
        scored
            .into_iter()
            .filter(|(_, n)| *n > 0)
            .fold(None, |best: Option<(Self, usize)>, (kind, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((kind, n)),
            })
            .map_or(Self::General, |(kind, _)| kind)
    }

    /// Lowercase name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Contract => "contract",
            Self::Receipt => "receipt",
            Self::General => "general",
        }
    }
}

/// Structural facts about extracted text
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentAnalysis {
    /// Detected document kind
    pub kind: DocumentKind,
    /// Whitespace-separated words
    pub word_count: usize,
    /// Non-empty lines
    pub line_count: usize,
    /// Lines that look like table rows
    pub table_rows: Vec<String>,
}

impl DocumentAnalysis {
    /// Analyze extracted text
    #[must_use]
    pub fn of(text: &str) -> Self {
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        Self {
            kind: DocumentKind::detect(text),
            word_count: text.split_whitespace().count(),
            line_count: lines.len(),
            table_rows: lines
                .iter()
                .filter(|l| l.contains('|') || l.contains('\t'))
                .map(|l| l.trim().to_string())
                .collect(),
        }
    }

    fn render(&self) -> String {
        format!(
            "{}\ntype: {}\nwords: {}\nlines: {}\ntable rows: {}",
            ANALYSIS_MARKER,
            self.kind.as_str(),
            self.word_count,
            self.line_count,
            self.table_rows.len()
        )
    }
}

/// Extracts text from documents and scans
pub struct DocumentSpecialist {
    descriptor: CapabilityDescriptor,
    store: Arc<dyn ArtifactStore>,
    ocr: Option<HttpBackend>,
}

impl DocumentSpecialist {
    /// Create a document specialist reading artifacts from `store`
    #[must_use]
    pub fn new(store: Arc<dyn ArtifactStore>) -> Self {
        Self {
            descriptor: Self::default_descriptor(),
            store,
            ocr: None,
        }
    }

    /// Default capability descriptor
    #[must_use]
    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(
            DOCUMENT_ID,
            "Extract text from PDFs, scans and office documents",
        )
        .with_modalities([Modality::Document, Modality::Image])
        .with_artifact(ArtifactRequirement::Required)
        .with_failure_modes([
            FailureMode::Timeout,
            FailureMode::InvocationError,
            FailureMode::UnsupportedInput,
        ])
        .with_keywords([
            "extract text",
            "extract",
            "ocr",
            "document",
            "pdf",
            "invoice",
            "receipt",
            "contract",
            "table",
            "scan",
            "form",
        ])
    }

    /// Use `backend` for OCR of binary media
    #[must_use]
    pub fn with_ocr(mut self, backend: HttpBackend) -> Self {
        self.ocr = Some(backend);
        self
    }

    /// Override the descriptor timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.descriptor = self.descriptor.with_timeout(timeout);
        self
    }

    async fn extract(&self, bytes: &[u8], media_type: &str) -> Result<String, SpecialistFault> {
        if is_text_like(media_type) {
            return String::from_utf8(bytes.to_vec()).map_err(|_| {
                SpecialistFault::UnsupportedInput(format!("{} artifact is not valid UTF-8", media_type))
            });
        }
        match &self.ocr {
            Some(backend) => backend.ocr(bytes, media_type).await,
            None => Err(SpecialistFault::UnsupportedInput(format!(
                "no OCR backend configured for {}",
                media_type
            ))),
        }
    }
}

fn is_text_like(media_type: &str) -> bool {
    media_type.starts_with("text/")
        || matches!(media_type, "application/json" | "application/csv")
}

fn wants_tables(instruction: &str) -> bool {
    let lower = instruction.to_lowercase();
    lower.contains("table") || lower.contains("tabular")
}

#[async_trait]
impl Specialist for DocumentSpecialist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: SpecialistRequest) -> Result<SpecialistOutput, SpecialistFault> {
        let reference = request
            .artifact
            .as_ref()
            .ok_or_else(|| SpecialistFault::UnsupportedInput("a document is required".to_string()))?;
        let artifact = self
            .store
            .fetch(reference)
            .await
            .context("fetching document")?;
        let media_type = artifact
            .media_type()
            .unwrap_or("application/octet-stream")
            .to_string();

        let text = self.extract(&artifact.bytes, &media_type).await?;
        let analysis = DocumentAnalysis::of(&text);
        info!(
            handle = %reference.handle,
            media_type = %media_type,
            kind = analysis.kind.as_str(),
            words = analysis.word_count,
            "Document extracted"
        );

        let (instruction, _) = request.split_context();
        let body = if wants_tables(instruction) {
            debug!(rows = analysis.table_rows.len(), "Returning table rows only");
            if analysis.table_rows.is_empty() {
                "No tables found in the document.".to_string()
            } else {
                analysis.table_rows.join("\n")
            }
        } else {
            format!("{}\n\n{}", text.trim_end(), analysis.render())
        };

        Ok(SpecialistOutput::text(body).with_metadata(json!({
            "media_type": media_type,
            "document_type": analysis.kind,
            "word_count": analysis.word_count,
            "line_count": analysis.line_count,
            "table_rows": analysis.table_rows,
        })))
    }
}
