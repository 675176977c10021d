//! Aligned, immutable byte blocks backing loaded artifacts.
//!
//! The ray-tracing backend binds geometry buffers in place, so every block
//! starts at an address aligned to [`BLOCK_ALIGNMENT`]. Two storage modes are
//! supported: an owned heap allocation and a read-only memory map (page
//! aligned, which is always stricter than 16 bytes).

use std::alloc::{self, Layout};
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;
use std::ptr::NonNull;

use memmap2::Mmap;

use crate::config::LoadMode;
use crate::util::{Error, Result};

/// Base alignment of every block.
pub const BLOCK_ALIGNMENT: usize = 16;

/// Immutable byte block whose first byte is [`BLOCK_ALIGNMENT`]-aligned.
pub struct AlignedBlock {
    inner: BlockInner,
}

enum BlockInner {
    Empty,
    Heap { ptr: NonNull<u8>, layout: Layout },
    Mapped(Mmap),
}

// Safety: the heap variant uniquely owns its allocation and never hands out
// mutable access after construction.
unsafe impl Send for AlignedBlock {}
unsafe impl Sync for AlignedBlock {}

impl AlignedBlock {
    /// An empty block.
    pub const fn empty() -> Self {
        Self { inner: BlockInner::Empty }
    }

    /// Copy `bytes` into a fresh aligned heap block.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut block = Self::zeroed(bytes.len())?;
        if let Some(dst) = block.heap_mut() {
            dst.copy_from_slice(bytes);
        }
        Ok(block)
    }

    /// Read a whole file using the requested mode.
    pub fn read_file(path: impl AsRef<Path>, mode: LoadMode) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).map_err(|e| Error::from_io(path, e))?;
        let len = file.metadata().map_err(|e| Error::from_io(path, e))?.len() as usize;

        if len == 0 {
            return Ok(Self::empty());
        }

        match mode {
            LoadMode::Heap => {
                let mut block = Self::zeroed(len)?;
                if let Some(dst) = block.heap_mut() {
                    file.read_exact(dst).map_err(|e| Error::from_io(path, e))?;
                }
                Ok(block)
            }
            LoadMode::Mapped => {
                // Safety: mapped read-only; artifacts are not modified while loaded.
                let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::from_io(path, e))?;
                let block = Self { inner: BlockInner::Mapped(mmap) };
                if block.base_address() % BLOCK_ALIGNMENT != 0 {
                    return Err(Error::Misaligned { offset: 0, alignment: BLOCK_ALIGNMENT });
                }
                Ok(block)
            }
        }
    }

    fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self::empty());
        }
        let layout = Layout::from_size_align(len, BLOCK_ALIGNMENT)
            .map_err(|e| Error::other(format!("invalid block layout: {e}")))?;
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout)
        };
        Ok(Self { inner: BlockInner::Heap { ptr, layout } })
    }

    fn heap_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.inner {
            // Safety: the allocation is owned, initialized (zeroed) and `layout.size()` long.
            BlockInner::Heap { ptr, layout } => {
                Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), layout.size()) })
            }
            _ => None,
        }
    }

    /// View the block as bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        match &self.inner {
            BlockInner::Empty => &[],
            // Safety: see `heap_mut`.
            BlockInner::Heap { ptr, layout } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), layout.size())
            },
            BlockInner::Mapped(mmap) => &mmap[..],
        }
    }

    /// Load-time address of the first byte.
    #[inline]
    pub fn base_address(&self) -> usize {
        self.as_bytes().as_ptr() as usize
    }

    /// True when the block is memory mapped.
    #[inline]
    pub fn is_mapped(&self) -> bool {
        matches!(self.inner, BlockInner::Mapped(_))
    }
}

impl Deref for AlignedBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Drop for AlignedBlock {
    fn drop(&mut self) {
        if let BlockInner::Heap { ptr, layout } = &self.inner {
            // Safety: allocated in `zeroed` with this exact layout.
            unsafe { alloc::dealloc(ptr.as_ptr(), *layout) };
        }
    }
}

impl std::fmt::Debug for AlignedBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedBlock")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_block_is_aligned() {
        for len in [1usize, 3, 16, 17, 1000] {
            let bytes: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let block = AlignedBlock::from_bytes(&bytes).unwrap();
            assert_eq!(block.base_address() % BLOCK_ALIGNMENT, 0);
            assert_eq!(&block[..], &bytes[..]);
        }
    }

    #[test]
    fn test_empty_block() {
        let block = AlignedBlock::from_bytes(&[]).unwrap();
        assert!(block.is_empty());
    }

    #[test]
    fn test_read_file_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        std::fs::write(&path, b"0123456789abcdefXYZ").unwrap();

        for mode in [LoadMode::Heap, LoadMode::Mapped] {
            let block = AlignedBlock::read_file(&path, mode).unwrap();
            assert_eq!(&block[..], b"0123456789abcdefXYZ");
            assert_eq!(block.base_address() % BLOCK_ALIGNMENT, 0);
            assert_eq!(block.is_mapped(), mode == LoadMode::Mapped);
        }
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AlignedBlock::read_file(dir.path().join("missing.bin"), LoadMode::Heap).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }
}
