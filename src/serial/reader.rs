//! Fix-up reader for relocatable buffers.
//!
//! [`BinaryReader::attach`] walks the header in the exact order it was written.
//! Every pointer-offset field is resolved against the buffer origin into a
//! checked span of the loaded buffer; nothing is read through a span until it
//! has been bounds- and alignment-checked here.

use std::marker::PhantomData;

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::Pod;

use super::format::POINTER_FIELD_SIZE;
use crate::util::{Error, Result};

/// Byte range of a resolved pointer block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteSpan {
    pub offset: usize,
    pub len: usize,
}

impl ByteSpan {
    /// Bytes of this span inside `bytes`.
    #[inline]
    pub fn bytes<'b>(&self, bytes: &'b [u8]) -> &'b [u8] {
        &bytes[self.offset..self.offset + self.len]
    }
}

/// Typed view of a resolved pointer block.
pub struct Span<T> {
    offset: usize,
    count: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Span<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Span<T> {}

impl<T> std::fmt::Debug for Span<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Span")
            .field("offset", &self.offset)
            .field("count", &self.count)
            .finish()
    }
}

impl<T> Default for Span<T> {
    fn default() -> Self {
        Self { offset: 0, count: 0, _marker: PhantomData }
    }
}

impl<T: Pod> Span<T> {
    /// Element count.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Byte offset of the block from the buffer start.
    #[inline]
    pub fn byte_offset(&self) -> usize {
        self.offset
    }

    /// Size of the block in bytes.
    #[inline]
    pub fn byte_len(&self) -> usize {
        self.count * std::mem::size_of::<T>()
    }

    /// Elements of this span inside the buffer it was resolved from.
    #[inline]
    pub fn slice<'b>(&self, bytes: &'b [u8]) -> &'b [T] {
        if self.count == 0 {
            return &[];
        }
        bytemuck::cast_slice(&bytes[self.offset..self.offset + self.byte_len()])
    }
}

/// Sequential header reader over a loaded buffer.
pub struct BinaryReader<'a> {
    bytes: &'a [u8],
    origin: u64,
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    /// Attach to a loaded buffer whose offsets were written relative to `origin`.
    pub fn attach(bytes: &'a [u8], origin: u64) -> Self {
        Self { bytes, origin, pos: 0 }
    }

    /// Current header position.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take `len` raw header bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(Error::UnexpectedEof(self.pos as u64 + len as u64));
        };
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Read a plain-old-data value.
    pub fn read_pod<T: Pod>(&mut self) -> Result<T> {
        Ok(bytemuck::pod_read_unaligned(self.take(std::mem::size_of::<T>())?))
    }

    /// Resolve the next pointer-offset field for a block of `size` bytes.
    pub fn read_pointer(&mut self, size: u64, alignment: usize) -> Result<ByteSpan> {
        let raw = LittleEndian::read_u64(self.take(POINTER_FIELD_SIZE)?);
        let len = self.bytes.len() as u64;
        let invalid = || Error::InvalidOffset { offset: raw, size, len };

        let offset = raw.checked_sub(self.origin).ok_or_else(invalid)?;
        let end = offset.checked_add(size).ok_or_else(invalid)?;
        if end > len {
            return Err(invalid());
        }

        if size > 0 && (self.bytes.as_ptr() as usize + offset as usize) % alignment != 0 {
            return Err(Error::Misaligned { offset, alignment });
        }

        Ok(ByteSpan { offset: offset as usize, len: size as usize })
    }

    /// Read a `[byte size][offset]` pair written by `BinaryWriter::write_block`.
    pub fn read_block(&mut self, alignment: usize) -> Result<ByteSpan> {
        let size = self.read_u64()?;
        self.read_pointer(size, alignment)
    }

    /// Typed [`read_block`](Self::read_block); the size must be a whole number of `T`.
    pub fn read_slice<T: Pod>(&mut self, alignment: usize) -> Result<Span<T>> {
        let alignment = alignment.max(std::mem::align_of::<T>());
        let span = self.read_block(alignment)?;
        let elem = std::mem::size_of::<T>();
        if span.len % elem != 0 {
            return Err(Error::mismatch(
                format!("block of {}", std::any::type_name::<T>()),
                format!("multiple of {elem} bytes"),
                span.len,
            ));
        }
        Ok(Span { offset: span.offset, count: span.len / elem, _marker: PhantomData })
    }
}
