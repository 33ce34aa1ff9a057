//! Prism Specialists
//!
//! Concrete implementations of the `prism_core::Specialist` contract:
//! - `document`: text extraction and document analysis (local or OCR backend)
//! - `vision`: image properties, dominant colors and quality checks
//! - `qa`: summaries and answers over text forwarded by an earlier step
//! - `video`: live frame analysis through a vision-chat backend

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod document;
pub mod qa;
pub mod video;
pub mod vision;

pub use backend::{HttpBackend, HttpBackendConfig};
pub use document::{DocumentAnalysis, DocumentKind, DocumentSpecialist, DOCUMENT_ID};
pub use qa::{QaSpecialist, QA_ID};
pub use video::{VideoSpecialist, VIDEO_ID};
pub use vision::{ImageReport, QualityIssue, VisionSpecialist, VISION_ID};
