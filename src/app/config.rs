//! Application configuration types

use prism_core::DispatchConfig;
use prism_specialists::HttpBackendConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub specialists: SpecialistsConfig,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("data/artifacts")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            specialists: SpecialistsConfig::default(),
            artifacts_dir: default_artifacts_dir(),
        }
    }
}

/// Per-specialist settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpecialistsConfig {
    #[serde(default)]
    pub document: SpecialistConfig,
    #[serde(default)]
    pub vision: SpecialistConfig,
    #[serde(default)]
    pub qa: SpecialistConfig,
    #[serde(default)]
    pub video: SpecialistConfig,
}

/// Settings for one specialist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Overrides the specialist's built-in timeout
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Remote backend (OCR for `document`, vision chat for `video`)
    #[serde(default)]
    pub backend: Option<HttpBackendConfig>,
}

fn default_enabled() -> bool {
    true
}

impl Default for SpecialistConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            timeout_ms: None,
            backend: None,
        }
    }
}

impl SpecialistConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}
