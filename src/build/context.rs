//! Per-asset build bookkeeping.
//!
//! A [`BuildProcessorContext`] is owned by exactly one in-flight build. It
//! records the raw files the build read (timestamp based staleness), the other
//! assets whose outputs it consumed (id based staleness) and every artifact it
//! wrote. It carries no locking; concurrent builds use separate contexts.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::asset::{asset_file_path, sanitize_content_path, AssetId, ContentId};
use crate::config::BuildConfig;
use crate::io::{file_time, write_whole_file};
use crate::util::{Error, Result};

/// A raw file read while processing one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDependency {
    /// Sanitized, content-root relative path.
    pub path: String,
    pub timestamp: SystemTime,
}

impl ContentDependency {
    /// True while the file still exists with the recorded modification time.
    pub fn is_current(&self, content_root: &Path) -> bool {
        file_time(content_root.join(&self.path))
            .map(|t| t == self.timestamp)
            .unwrap_or(false)
    }
}

/// Another asset's build output consumed by this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDependency {
    pub source: ContentId,
    pub id: AssetId,
}

/// One artifact written by this build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorOutput {
    pub source: ContentId,
    pub id: AssetId,
    pub version: u64,
    pub path: PathBuf,
}

/// State of a single asset build.
#[derive(Debug)]
pub struct BuildProcessorContext {
    content_root: PathBuf,
    asset_root: PathBuf,
    initialized: bool,
    pub source: ContentId,
    pub id: AssetId,
    pub content_dependencies: Vec<ContentDependency>,
    pub process_dependencies: Vec<ProcessDependency>,
    pub outputs: Vec<ProcessorOutput>,
}

impl BuildProcessorContext {
    /// Create an uninitialized context writing under the configured roots.
    pub fn new(config: &BuildConfig) -> Self {
        Self {
            content_root: config.content_root.clone(),
            asset_root: config.asset_root.clone(),
            initialized: false,
            source: ContentId::default(),
            id: AssetId(0),
            content_dependencies: Vec::new(),
            process_dependencies: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Start a build of `source`. Must be called once before anything is recorded.
    pub fn initialize(&mut self, source: ContentId, id: AssetId) {
        debug_assert!(self.content_dependencies.is_empty());
        debug_assert!(self.process_dependencies.is_empty());
        debug_assert!(self.outputs.is_empty());

        self.content_dependencies.clear();
        self.process_dependencies.clear();
        self.outputs.clear();
        self.source = source;
        self.id = id;
        self.initialized = true;
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(Error::ContextNotInitialized)
        }
    }

    /// Record a raw file read by this build.
    pub fn add_file_dependency(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.ensure_initialized()?;
        let path = path.as_ref();
        let timestamp = file_time(path)?;
        let dep = ContentDependency {
            path: sanitize_content_path(&self.content_root, path),
            timestamp,
        };
        tracing::debug!(asset = %self.source, path = %dep.path, "file dependency");
        self.content_dependencies.push(dep);
        Ok(())
    }

    /// Record that this build consumes the output of `source`.
    ///
    /// The dependency does not have to be built yet; ordering is the driver's job.
    pub fn add_process_dependency(&mut self, source: &ContentId) -> Result<()> {
        self.ensure_initialized()?;
        self.process_dependencies.push(ProcessDependency {
            source: source.clone(),
            id: AssetId::from_content(source),
        });
        Ok(())
    }

    /// [`add_process_dependency`](Self::add_process_dependency) by type and name.
    pub fn add_process_dependency_named(&mut self, asset_type: &str, name: &str) -> Result<()> {
        self.add_process_dependency(&ContentId::new(asset_type, name))
    }

    /// Write an artifact and record it. Nothing is recorded if the write fails.
    pub fn create_output(&mut self, asset_type: &str, version: u64, name: &str, data: &[u8]) -> Result<()> {
        self.ensure_initialized()?;
        let path = asset_file_path(&self.asset_root, asset_type, name, version);
        write_whole_file(&path, data)?;

        tracing::debug!(asset = %self.source, path = %path.display(), bytes = data.len(), "wrote output");
        self.outputs.push(ProcessorOutput {
            source: ContentId::new(asset_type, name),
            id: AssetId::new(asset_type, name),
            version,
            path,
        });
        Ok(())
    }
}
