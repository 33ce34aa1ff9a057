//! Question answering over text forwarded from an earlier step

use crate::document::ANALYSIS_MARKER;
use async_trait::async_trait;
use prism_core::router::routing::content_words;
use prism_core::{
    CapabilityDescriptor, FailureMode, Specialist, SpecialistFault, SpecialistOutput,
    SpecialistRequest,
};
use regex::Regex;
use serde_json::json;
use std::sync::LazyLock;
use tracing::debug;

/// Registry id
pub const QA_ID: &str = "qa";

const SUMMARY_CHARS: usize = 200;
const MAX_MATCHES: usize = 10;
const NOT_FOUND: &str = "No information found in the provided text.";

static SENTENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^.!?\n]+[.!?]*").expect("SENTENCE is a compile-time constant")
});

/// Answers questions about, and summarizes, forwarded text
pub struct QaSpecialist {
    descriptor: CapabilityDescriptor,
}

impl Default for QaSpecialist {
    fn default() -> Self {
        Self::new()
    }
}

impl QaSpecialist {
    /// Create a QA specialist
    #[must_use]
    pub fn new() -> Self {
        Self {
            descriptor: Self::default_descriptor(),
        }
    }

    /// Default capability descriptor
    #[must_use]
    pub fn default_descriptor() -> CapabilityDescriptor {
        CapabilityDescriptor::new(QA_ID, "Answer questions about text and summarize it")
            .with_failure_modes([FailureMode::Timeout, FailureMode::UnsupportedInput])
            .with_keywords([
                "summarize",
                "summary",
                "answer",
                "question",
                "explain",
                "key points",
                "tl;dr",
                "what is",
                "how much",
            ])
    }

    /// Override the descriptor timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.descriptor = self.descriptor.with_timeout(timeout);
        self
    }
}

fn wants_summary(instruction: &str) -> bool {
    let lower = instruction.to_lowercase();
    ["summar", "tl;dr", "key points", "overview"]
        .iter()
        .any(|w| lower.contains(w))
}

/// Leading sentences whose joined length stays within the limit
fn summarize(context: &str) -> String {
    let body = context
        .split_once(ANALYSIS_MARKER)
        .map_or(context, |(body, _)| body);

    let mut summary = String::new();
    for sentence in SENTENCE.find_iter(body).map(|m| m.as_str().trim()) {
        if sentence.is_empty() {
            continue;
        }
        let extra = if summary.is_empty() { 0 } else { 1 };
        if summary.chars().count() + extra + sentence.chars().count() > SUMMARY_CHARS {
            break;
        }
        if extra == 1 {
            summary.push(' ');
        }
        summary.push_str(sentence);
    }

    if summary.is_empty() {
        // First sentence alone is too long.
        let cut: String = body.trim().chars().take(SUMMARY_CHARS).collect();
        if cut.is_empty() {
            return NOT_FOUND.to_string();
        }
        return format!("{}…", cut.trim_end());
    }
    summary
}

/// Context lines sharing a content word with the question
fn search<'a>(question: &str, context: &'a str) -> Vec<&'a str> {
    let wanted = content_words(question);
    if wanted.is_empty() {
        return Vec::new();
    }
    context
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !content_words(line).is_disjoint(&wanted))
        .take(MAX_MATCHES)
        .collect()
}

#[async_trait]
impl Specialist for QaSpecialist {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(&self, request: SpecialistRequest) -> Result<SpecialistOutput, SpecialistFault> {
        let (instruction, context) = request.split_context();
        let context = context.filter(|c| !c.trim().is_empty()).ok_or_else(|| {
            SpecialistFault::UnsupportedInput(
                "no text to work from; attach a document or ask about an earlier result"
                    .to_string(),
            )
        })?;

        if wants_summary(instruction) {
            let summary = summarize(context);
            debug!(chars = summary.chars().count(), "Summary produced");
            return Ok(SpecialistOutput::text(summary).with_metadata(json!({ "mode": "summary" })));
        }

        let matches = search(instruction, context);
        debug!(matches = matches.len(), "Context searched");
        let text = if matches.is_empty() {
            NOT_FOUND.to_string()
        } else {
            matches.join("\n")
        };
        Ok(SpecialistOutput::text(text).with_metadata(json!({
            "mode": "search",
            "matches": matches.len(),
        })))
    }
}
