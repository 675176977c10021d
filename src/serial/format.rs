//! Artifact format constants and the common artifact header.
//!
//! ## Buffer structure
//!
//! ```text
//! +------------------------+
//! | Magic: "SBK1"          |  4 bytes
//! | Kind                   |  4 bytes (u32 LE)
//! | Data version           |  8 bytes (u64 LE)
//! +------------------------+
//! | fixed header fields    |  scalars, [size u64][offset u64] pairs
//! | zero padding           |  up to HEADER_ALIGNMENT
//! +------------------------+
//! | pointer block 0        |  each block zero padded to its alignment
//! | pointer block 1        |
//! | ...                    |
//! +------------------------+
//! ```
//!
//! Offsets are relative to the buffer origin, never absolute addresses, so a
//! buffer can be loaded or mapped anywhere before it is attached.

use super::{BinaryReader, BinaryWriter};
use crate::util::{Error, Result};

const _: () = assert!(
    cfg!(target_endian = "little"),
    "artifacts hold native little-endian buffers"
);

/// Magic bytes at the start of every artifact.
pub const ARTIFACT_MAGIC: &[u8; 4] = b"SBK1";

/// Size of the artifact header in bytes.
pub const ARTIFACT_HEADER_SIZE: usize = 16;

/// Size of a pointer-offset field.
pub const POINTER_FIELD_SIZE: usize = 8;

/// The fixed header region is padded to this alignment so pointer blocks
/// that are aligned relative to the data region are aligned in the buffer.
pub const HEADER_ALIGNMENT: usize = 16;

/// Which half of a baked model an artifact holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArtifactKind {
    /// Bounding volumes, cameras, textures, materials, mesh/curve records.
    Metadata = 1,
    /// Flat index and vertex buffers.
    Geometry = 2,
}

impl ArtifactKind {
    /// Decode from the on-disk tag.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Metadata),
            2 => Some(Self::Geometry),
            _ => None,
        }
    }
}

/// First 16 bytes of every artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtifactHeader {
    pub kind: ArtifactKind,
    pub version: u64,
}

impl ArtifactHeader {
    pub const fn new(kind: ArtifactKind, version: u64) -> Self {
        Self { kind, version }
    }

    /// Write magic, kind and version.
    pub fn write(&self, writer: &mut BinaryWriter) {
        writer.write(ARTIFACT_MAGIC);
        writer.write_u32(self.kind as u32);
        writer.write_u64(self.version);
    }

    /// Read and validate against the expected kind and version.
    pub fn read_expected(reader: &mut BinaryReader<'_>, expected: ArtifactHeader) -> Result<Self> {
        let magic = reader.take(ARTIFACT_MAGIC.len())?;
        if magic != ARTIFACT_MAGIC {
            return Err(Error::mismatch(
                "artifact magic",
                String::from_utf8_lossy(ARTIFACT_MAGIC),
                String::from_utf8_lossy(magic),
            ));
        }

        let raw_kind = reader.read_u32()?;
        let kind = ArtifactKind::from_u32(raw_kind)
            .ok_or_else(|| Error::mismatch("artifact kind", expected.kind as u32, raw_kind))?;
        if kind != expected.kind {
            return Err(Error::mismatch("artifact kind", format!("{:?}", expected.kind), format!("{kind:?}")));
        }

        let version = reader.read_u64()?;
        if version != expected.version {
            return Err(Error::mismatch("artifact version", expected.version, version));
        }

        Ok(Self { kind, version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ErrorKind;

    fn header_bytes(kind: ArtifactKind, version: u64) -> Vec<u8> {
        let mut writer = BinaryWriter::start(0, 0);
        ArtifactHeader::new(kind, version).write(&mut writer);
        writer.end()
    }

    #[test]
    fn test_header_size() {
        let bytes = header_bytes(ArtifactKind::Geometry, 7);
        assert_eq!(bytes.len(), ARTIFACT_HEADER_SIZE);
        assert_eq!(&bytes[0..4], ARTIFACT_MAGIC);
    }

    #[test]
    fn test_header_validation() {
        let bytes = header_bytes(ArtifactKind::Metadata, 42);

        let mut reader = BinaryReader::attach(&bytes, 0);
        let header =
            ArtifactHeader::read_expected(&mut reader, ArtifactHeader::new(ArtifactKind::Metadata, 42)).unwrap();
        assert_eq!(header.version, 42);

        let mut reader = BinaryReader::attach(&bytes, 0);
        let err = ArtifactHeader::read_expected(&mut reader, ArtifactHeader::new(ArtifactKind::Metadata, 43))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);

        let mut reader = BinaryReader::attach(&bytes, 0);
        let err = ArtifactHeader::read_expected(&mut reader, ArtifactHeader::new(ArtifactKind::Geometry, 42))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatMismatch);
    }

    #[test]
    fn test_invalid_magic() {
        let bytes = [0u8; 16];
        let mut reader = BinaryReader::attach(&bytes, 0);
        let result = ArtifactHeader::read_expected(&mut reader, ArtifactHeader::new(ArtifactKind::Metadata, 1));
        assert!(matches!(result, Err(Error::FormatMismatch { .. })));
    }
}
