//! Specialist and orchestrator construction from configuration

use super::config::{AppConfig, SpecialistConfig};
use anyhow::{Context, Result};
use prism_core::{
    media_type_for_path, ArtifactRef, ArtifactStore, FsArtifactStore, Orchestrator, Specialist,
};
use prism_specialists::{
    DocumentSpecialist, HttpBackend, QaSpecialist, VideoSpecialist, VisionSpecialist,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Everything a command needs
pub struct App {
    pub orchestrator: Orchestrator,
    pub store: Arc<dyn ArtifactStore>,
}

fn backend(name: &str, config: &SpecialistConfig) -> Result<Option<HttpBackend>> {
    match &config.backend {
        Some(backend) => HttpBackend::from_config(backend)
            .map(Some)
            .with_context(|| format!("Failed to create {} backend", name)),
        None => {
            warn!(specialist = name, "No backend configured");
            Ok(None)
        }
    }
}

/// Build the specialist set named in `config`
pub fn specialists(
    config: &AppConfig,
    store: &Arc<dyn ArtifactStore>,
) -> Result<Vec<Arc<dyn Specialist>>> {
    let settings = &config.specialists;
    let mut specialists: Vec<Arc<dyn Specialist>> = Vec::new();

    if settings.document.enabled {
        let mut document = DocumentSpecialist::new(Arc::clone(store));
        if let Some(ocr) = backend("document", &settings.document)? {
            document = document.with_ocr(ocr);
        }
        if let Some(timeout) = settings.document.timeout() {
            document = document.with_timeout(timeout);
        }
        specialists.push(Arc::new(document));
    }

    if settings.vision.enabled {
        let mut vision = VisionSpecialist::new(Arc::clone(store));
        if let Some(timeout) = settings.vision.timeout() {
            vision = vision.with_timeout(timeout);
        }
        specialists.push(Arc::new(vision));
    }

    if settings.qa.enabled {
        let mut qa = QaSpecialist::new();
        if let Some(timeout) = settings.qa.timeout() {
            qa = qa.with_timeout(timeout);
        }
        specialists.push(Arc::new(qa));
    }

    if settings.video.enabled {
        let mut video = VideoSpecialist::new(Arc::clone(store));
        if let Some(chat) = backend("video", &settings.video)? {
            video = video.with_backend(chat);
        }
        if let Some(timeout) = settings.video.timeout() {
            video = video.with_timeout(timeout);
        }
        specialists.push(Arc::new(video));
    }

    Ok(specialists)
}

/// Build the orchestrator and artifact store
pub fn build(config: &AppConfig) -> Result<App> {
    let store: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(&config.artifacts_dir));

    let mut builder = Orchestrator::builder().config(config.dispatch.clone());
    for specialist in specialists(config, &store)? {
        builder = builder
            .register(specialist)
            .context("Failed to register specialist")?;
    }
    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    info!(
        specialists = orchestrator.status().specialists.len(),
        artifacts_dir = %config.artifacts_dir.display(),
        "Prism ready"
    );
    Ok(App {
        orchestrator,
        store,
    })
}

/// Copy a local file into the artifact store
pub async fn attach(store: &dyn ArtifactStore, path: &Path) -> Result<ArtifactRef> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let media_type = media_type_for_path(path);
    if media_type.is_none() {
        warn!(path = %path.display(), "Unknown file type, attaching without media type");
    }
    store
        .put(bytes, media_type)
        .await
        .with_context(|| format!("Failed to store {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::loader::load_from_str;

    #[test]
    fn test_disabled_specialists_are_skipped() {
        let config = load_from_str(
            r#"
            [specialists.vision]
            enabled = false
            [specialists.video]
            enabled = false
            "#,
        )
        .unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(prism_core::MemoryArtifactStore::new());

        let ids: Vec<String> = specialists(&config, &store)
            .unwrap()
            .iter()
            .map(|s| s.descriptor().id.clone())
            .collect();
        assert_eq!(ids, vec!["document", "qa"]);
    }

    #[test]
    fn test_timeout_override() {
        let config = load_from_str("[specialists.qa]\ntimeout_ms = 1234").unwrap();
        let store: Arc<dyn ArtifactStore> = Arc::new(prism_core::MemoryArtifactStore::new());

        let all = specialists(&config, &store).unwrap();
        let qa = all.iter().find(|s| s.descriptor().id == "qa").unwrap();
        assert_eq!(qa.descriptor().timeout.as_millis(), 1234);
    }

    #[tokio::test]
    async fn test_attach_guesses_media_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Notes").unwrap();
        let store = FsArtifactStore::new(dir.path().join("artifacts"));

        let reference = attach(&store, &path).await.unwrap();
        assert_eq!(reference.media_type.as_deref(), Some("text/markdown"));
        assert!(reference.handle.ends_with(".md"));

        let artifact = store.fetch(&reference).await.unwrap();
        assert_eq!(artifact.bytes, b"# Notes");
    }
}
