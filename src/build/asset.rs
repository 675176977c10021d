//! Asset identity and artifact paths.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Logical source asset: `(type, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ContentId {
    pub asset_type: String,
    pub name: String,
}

impl ContentId {
    pub fn new(asset_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            asset_type: asset_type.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset_type, self.name)
    }
}

/// Hashed, canonicalized identifier naming artifact files.
///
/// Derived only from `(type, name)`; names are compared with forward slashes
/// and ASCII case folded, so `Models\Sponza` and `models/sponza` share artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(pub u64);

impl AssetId {
    pub fn new(asset_type: &str, name: &str) -> Self {
        let canonical = format!(
            "{}/{}",
            asset_type.to_ascii_lowercase(),
            name.replace('\\', "/").to_ascii_lowercase()
        );
        Self(xxh3_64(canonical.as_bytes()))
    }

    pub fn from_content(id: &ContentId) -> Self {
        Self::new(&id.asset_type, &id.name)
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Path of the artifact for `(type, name, version)` under `asset_root`.
pub fn asset_file_path(asset_root: &Path, asset_type: &str, name: &str, version: u64) -> PathBuf {
    let id = AssetId::new(asset_type, name);
    asset_root
        .join(asset_type)
        .join(format!("{id}_{version}.bin"))
}

/// Normalize a content path so dependency records compare equal across platforms.
///
/// The path is made relative to `content_root` when it lives underneath it,
/// `.` components are dropped, `..` pops, and separators become `/`.
pub fn sanitize_content_path(content_root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(content_root).unwrap_or(path);

    let mut parts: Vec<String> = Vec::new();
    for component in relative.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.pop().is_none() {
                    parts.push("..".to_string());
                }
            }
            Component::RootDir | Component::Prefix(_) => parts.clear(),
            Component::Normal(part) => {
                parts.extend(
                    part.to_string_lossy()
                        .split('\\')
                        .filter(|s| !s.is_empty() && *s != ".")
                        .map(str::to_string),
                );
            }
        }
    }
    parts.join("/")
}
