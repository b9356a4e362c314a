//! Diagnostic capture configuration

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Environment variable overriding the dump directory. Setting it marks the
/// process as a controlled test environment: no rotation, no compression.
pub const DUMP_DIRECTORY_ENV: &str = "STOREDIAG_DUMP_DIRECTORY";

/// Whether consistency violations capture dump artifacts at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CaptureMode {
    /// Never allocate or write artifacts.
    Disabled,
    /// Always capture on a consistency violation.
    Enabled,
}

/// Configuration for the diagnostic capture subsystem
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Whether dumps are captured on consistency violations
    pub capture_mode: CaptureMode,
    /// Operator-assigned dump directory; disables rotation and compression
    pub dump_dir_override: Option<PathBuf>,
    /// Whether provenance tags are rewritten before serialization
    pub anonymization_enabled: bool,
    /// Parent directory for rotated `storeDump-*` directories
    pub dump_root: PathBuf,
}

/// Raw TOML shape; every field optional, merged over defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TomlCaptureConfig {
    pub capture_mode: Option<CaptureMode>,
    pub dump_dir_override: Option<PathBuf>,
    pub anonymization_enabled: Option<bool>,
    pub dump_root: Option<PathBuf>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            capture_mode: CaptureMode::Enabled,
            dump_dir_override: None,
            anonymization_enabled: true,
            dump_root: default_dump_root(),
        }
    }
}

impl CaptureConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields. A missing or unparsable file yields the defaults.
    pub fn load_from(path: &Path) -> Self {
        let raw = match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<TomlCaptureConfig>(&contents) {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to parse capture config, using defaults"
                    );
                    TomlCaptureConfig::default()
                }
            },
            Err(_) => TomlCaptureConfig::default(),
        };
        Self::default().merged(raw)
    }

    /// Apply a raw TOML layer over this configuration.
    pub fn merged(mut self, raw: TomlCaptureConfig) -> Self {
        if let Some(mode) = raw.capture_mode {
            self.capture_mode = mode;
        }
        if let Some(dir) = raw.dump_dir_override {
            self.dump_dir_override = Some(dir);
        }
        if let Some(enabled) = raw.anonymization_enabled {
            self.anonymization_enabled = enabled;
        }
        if let Some(root) = raw.dump_root {
            self.dump_root = root;
        }
        self
    }

    /// Apply the `STOREDIAG_DUMP_DIRECTORY` environment override, if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = std::env::var(DUMP_DIRECTORY_ENV) {
            if !dir.is_empty() {
                self.dump_dir_override = Some(PathBuf::from(dir));
            }
        }
        self
    }

    /// A set dump-directory override doubles as the "controlled test
    /// environment" signal: dumps stay uncompressed and unattached there.
    pub fn is_controlled_environment(&self) -> bool {
        self.dump_dir_override.is_some()
    }

    pub fn capture_enabled(&self) -> bool {
        self.capture_mode == CaptureMode::Enabled
    }
}

/// Default rotated-dump location (~/.storediag/logs/storeDumps)
fn default_dump_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".storediag")
        .join("logs")
        .join("storeDumps")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_capture_and_anonymization() {
        let config = CaptureConfig::default();
        assert!(config.capture_enabled());
        assert!(config.anonymization_enabled);
        assert!(!config.is_controlled_environment());
    }

    #[test]
    fn toml_layer_merges_over_defaults() {
        let raw: TomlCaptureConfig = toml::from_str(
            r#"
            capture-mode = "disabled"
            anonymization-enabled = false
            "#,
        )
        .unwrap();
        let config = CaptureConfig::default().merged(raw);
        assert_eq!(config.capture_mode, CaptureMode::Disabled);
        assert!(!config.anonymization_enabled);
        assert!(config.dump_dir_override.is_none());
    }

    #[test]
    fn load_from_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CaptureConfig::load_from(&dir.path().join("absent.toml"));
        assert!(config.capture_enabled());
    }

    #[test]
    fn override_marks_controlled_environment() {
        let config = CaptureConfig {
            dump_dir_override: Some(PathBuf::from("/tmp/dumps")),
            ..CaptureConfig::default()
        };
        assert!(config.is_controlled_environment());
    }
}
