//! Build and load configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::util::{Error, Result};

/// How artifacts are brought into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Read the whole file into a 16-byte aligned heap block.
    #[default]
    Heap,
    /// Memory-map the file (page aligned).
    Mapped,
}

/// Settings shared by the bake and load paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Root that raw content paths are sanitized against.
    pub content_root: PathBuf,
    /// Root under which artifacts are written and read.
    pub asset_root: PathBuf,
    /// Global switch for displacement-mapped subdivision surfaces.
    pub enable_displacement: bool,
    /// Tessellation rate handed to subdivision geometries.
    pub tessellation_rate: f32,
    pub load_mode: LoadMode,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            content_root: PathBuf::from("Content"),
            asset_root: PathBuf::from("Assets"),
            enable_displacement: false,
            tessellation_rate: 64.0,
            load_mode: LoadMode::Heap,
        }
    }
}

const ENV_CONTENT_ROOT: &str = "SCENE_BAKE_CONTENT_ROOT";
const ENV_ASSET_ROOT: &str = "SCENE_BAKE_ASSET_ROOT";
const ENV_DISPLACEMENT: &str = "SCENE_BAKE_DISPLACEMENT";

impl BuildConfig {
    /// Config with both roots set, everything else default.
    pub fn with_roots(content_root: impl Into<PathBuf>, asset_root: impl Into<PathBuf>) -> Self {
        Self {
            content_root: content_root.into(),
            asset_root: asset_root.into(),
            ..Self::default()
        }
    }

    /// Load from a JSON file. A missing file yields defaults; a malformed one is an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config: Self = match std::fs::read_to_string(path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(Error::from_io(path, e)),
        };
        config.apply_env();
        config.validate();
        Ok(config)
    }

    /// Save as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::from_io(path, e))
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(root) = std::env::var(ENV_CONTENT_ROOT) {
            self.content_root = PathBuf::from(root);
        }
        if let Ok(root) = std::env::var(ENV_ASSET_ROOT) {
            self.asset_root = PathBuf::from(root);
        }
        if let Ok(flag) = std::env::var(ENV_DISPLACEMENT) {
            self.enable_displacement = matches!(flag.as_str(), "1" | "true" | "on");
        }
    }

    fn validate(&mut self) {
        if !(self.tessellation_rate.is_finite() && self.tessellation_rate >= 1.0) {
            tracing::warn!(rate = self.tessellation_rate, "invalid tessellation rate, using default");
            self.tessellation_rate = Self::default().tessellation_rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: BuildConfig =
            serde_json::from_str(r#"{ "asset_root": "out", "load_mode": "mapped" }"#).unwrap();
        assert_eq!(config.asset_root, PathBuf::from("out"));
        assert_eq!(config.load_mode, LoadMode::Mapped);
        assert!(!config.enable_displacement);
        assert_eq!(config.tessellation_rate, 64.0);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bake.json");
        let mut config = BuildConfig::with_roots("src_content", "built");
        config.tessellation_rate = 16.0;
        config.save(&path).unwrap();

        let loaded = BuildConfig::load(&path).unwrap();
        assert_eq!(loaded.tessellation_rate, 16.0);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = BuildConfig::load(dir.path().join("nope.json")).unwrap();
        assert_eq!(loaded.tessellation_rate, 64.0);
    }

    #[test]
    fn test_invalid_rate_is_reset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bake.json");
        std::fs::write(&path, r#"{ "tessellation_rate": -3.0 }"#).unwrap();
        let loaded = BuildConfig::load(&path).unwrap();
        assert_eq!(loaded.tessellation_rate, 64.0);
    }
}
