//! Whole-file helpers used by the build context and the model loader.

use std::path::Path;
use std::time::SystemTime;

use crate::config::LoadMode;
use crate::util::{Error, Result};

use super::AlignedBlock;

/// Read an entire file into an aligned block.
pub fn read_whole_file(path: impl AsRef<Path>, mode: LoadMode) -> Result<AlignedBlock> {
    AlignedBlock::read_file(path, mode)
}

/// Write `data` to `path`, creating parent directories and overwriting any existing file.
pub fn write_whole_file(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Error::from_io(parent, e))?;
        }
    }
    std::fs::write(path, data).map_err(|e| Error::from_io(path, e))
}

/// Last modification time of `path`.
pub fn file_time(path: impl AsRef<Path>) -> Result<SystemTime> {
    let path = path.as_ref();
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| Error::from_io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("c.bin");
        write_whole_file(&path, b"abc").unwrap();
        let block = read_whole_file(&path, LoadMode::Heap).unwrap();
        assert_eq!(&block[..], b"abc");
        assert!(file_time(&path).is_ok());
    }

    #[test]
    fn test_file_time_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = file_time(dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
