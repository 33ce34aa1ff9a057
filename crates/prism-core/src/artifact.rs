//! Artifact references and storage
//!
//! Turns and requests only ever carry an [`ArtifactRef`]. The bytes live in an
//! [`ArtifactStore`] and are fetched by the specialist that needs them.

use crate::error::{Error, Result};
use crate::registry::Modality;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

/// Opaque handle to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Store-specific handle
    pub handle: String,
    /// MIME type, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

impl ArtifactRef {
    /// Create a reference without a media type
    #[must_use]
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            media_type: None,
        }
    }

    /// Set the media type
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(media_type.into());
        self
    }

    /// Infer the modality from the media type
    #[must_use]
    pub fn modality(&self) -> Option<Modality> {
        modality_for_media_type(self.media_type.as_deref()?)
    }
}

/// Map a MIME type onto the modality a specialist would declare for it
#[must_use]
pub fn modality_for_media_type(media_type: &str) -> Option<Modality> {
    let media_type = media_type.trim().to_ascii_lowercase();
    if media_type == "image/x-frame" || media_type.starts_with("video/") {
        return Some(Modality::LiveFrame);
    }
    if media_type.starts_with("image/") {
        return Some(Modality::Image);
    }
    if media_type.starts_with("text/")
        || media_type == "application/pdf"
        || media_type == "application/json"
        || media_type == "application/msword"
        || media_type.starts_with("application/vnd.openxmlformats-officedocument.wordprocessingml")
        || media_type == "application/vnd.oasis.opendocument.text"
    {
        return Some(Modality::Document);
    }
    None
}

/// Guess a MIME type from a file extension
#[must_use]
pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    let media_type = match ext.as_str() {
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "frame" => "image/x-frame",
        _ => return None,
    };
    Some(media_type)
}

fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    let ext = match media_type {
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "text/markdown" => "md",
        "text/csv" => "csv",
        "application/json" => "json",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        "image/webp" => "webp",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        "image/x-frame" => "frame",
        _ => return None,
    };
    Some(ext)
}

/// Artifact bytes together with their reference
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Reference this artifact was fetched by
    pub reference: ArtifactRef,
    /// Raw content
    pub bytes: Vec<u8>,
}

impl Artifact {
    /// Media type of the artifact, if known
    #[must_use]
    pub fn media_type(&self) -> Option<&str> {
        self.reference.media_type.as_deref()
    }
}

/// Storage for artifact bytes, addressed by opaque handle
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store bytes and return a reference to them
    async fn put(&self, bytes: Vec<u8>, media_type: Option<&str>) -> Result<ArtifactRef>;

    /// Fetch bytes by reference
    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact>;
}

/// In-process artifact store
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    items: DashMap<String, (Vec<u8>, Option<String>)>,
}

impl MemoryArtifactStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, bytes: Vec<u8>, media_type: Option<&str>) -> Result<ArtifactRef> {
        let handle = Uuid::new_v4().to_string();
        let media_type = media_type.map(str::to_string);
        debug!(handle = %handle, size = bytes.len(), "Stored artifact in memory");
        self.items
            .insert(handle.clone(), (bytes, media_type.clone()));
        Ok(ArtifactRef { handle, media_type })
    }

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact> {
        let entry = self
            .items
            .get(&reference.handle)
            .ok_or_else(|| Error::Artifact(format!("no artifact '{}'", reference.handle)))?;
        let (bytes, stored_type) = entry.value();
        Ok(Artifact {
            reference: ArtifactRef {
                handle: reference.handle.clone(),
                media_type: reference.media_type.clone().or_else(|| stored_type.clone()),
            },
            bytes: bytes.clone(),
        })
    }
}

/// Artifact store backed by files under a root directory
///
/// A handle is a relative path below the root. Handles containing parent or
/// absolute components are rejected.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, handle: &str) -> Result<PathBuf> {
        let relative = Path::new(handle);
        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::Artifact(format!(
                "handle '{}' escapes the artifact root",
                handle
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, bytes: Vec<u8>, media_type: Option<&str>) -> Result<ArtifactRef> {
        let mut handle = Uuid::new_v4().to_string();
        if let Some(ext) = media_type.and_then(extension_for_media_type) {
            handle.push('.');
            handle.push_str(ext);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Artifact(format!("cannot create artifact root: {}", e)))?;
        let path = self.resolve(&handle)?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| Error::Artifact(format!("cannot write '{}': {}", handle, e)))?;

        debug!(handle = %handle, size = bytes.len(), "Stored artifact on disk");
        Ok(ArtifactRef {
            handle,
            media_type: media_type.map(str::to_string),
        })
    }

    async fn fetch(&self, reference: &ArtifactRef) -> Result<Artifact> {
        let path = self.resolve(&reference.handle)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::Artifact(format!("cannot read '{}': {}", reference.handle, e)))?;
        let media_type = reference
            .media_type
            .clone()
            .or_else(|| media_type_for_path(&path).map(str::to_string));
        Ok(Artifact {
            reference: ArtifactRef {
                handle: reference.handle.clone(),
                media_type,
            },
            bytes,
        })
    }
}
