//! Relocatable buffer writer.
//!
//! The writer keeps two regions: the fixed header (scalars and pointer-offset
//! fields, written in declaration order) and the pointer-data region (the
//! blocks those fields refer to). Each pointer-offset field records where its
//! block starts in the data region; [`BinaryWriter::end`] pads the header and
//! rewrites every field as `origin + header size + data position`. No offset
//! table is emitted: readers walk the same field sequence.

use byteorder::{ByteOrder, LittleEndian};
use bytemuck::Pod;

use super::format::{HEADER_ALIGNMENT, POINTER_FIELD_SIZE};
use crate::util::{align_up, Error, Result};

/// A reserved pointer-offset field awaiting its final value.
#[derive(Debug, Clone, Copy)]
struct PointerField {
    header_pos: usize,
    data_pos: usize,
}

/// Buffer writer producing a self-contained, position independent byte buffer.
#[derive(Debug)]
pub struct BinaryWriter {
    origin: u64,
    header: Vec<u8>,
    data: Vec<u8>,
    pointer_fields: Vec<PointerField>,
}

impl BinaryWriter {
    /// Begin a buffer. `size_hint` only pre-allocates; the buffer grows as needed.
    pub fn start(origin: u64, size_hint: usize) -> Self {
        Self {
            origin,
            header: Vec::with_capacity(256),
            data: Vec::with_capacity(size_hint),
            pointer_fields: Vec::new(),
        }
    }

    /// Append raw bytes to the header.
    pub fn write(&mut self, bytes: &[u8]) {
        self.header.extend_from_slice(bytes);
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) {
        self.header.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) {
        self.header.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a plain-old-data value as its in-memory bytes.
    pub fn write_pod<T: Pod>(&mut self, value: &T) {
        self.header.extend_from_slice(bytemuck::bytes_of(value));
    }

    /// Reserve an 8-byte offset field for the pointer block written next.
    pub fn write_pointer_offset(&mut self) {
        self.pointer_fields.push(PointerField {
            header_pos: self.header.len(),
            data_pos: self.data.len(),
        });
        self.header.extend_from_slice(&[0u8; POINTER_FIELD_SIZE]);
    }

    /// Append bytes of the current pointer block.
    pub fn write_pointer_data(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Zero-pad the pointer-data region to a multiple of `alignment`.
    pub fn align_pointer_data(&mut self, alignment: usize) -> Result<()> {
        if !alignment.is_power_of_two() {
            return Err(Error::other(format!("alignment {alignment} is not a power of two")));
        }
        let aligned = align_up(self.data.len() as u64, alignment as u64) as usize;
        self.data.resize(aligned, 0);
        Ok(())
    }

    /// Write `[byte size u64][offset u64]` then the block, padded to `alignment`.
    ///
    /// The block starts on an `alignment` boundary as long as every earlier block
    /// was padded to at least the same alignment.
    pub fn write_block(&mut self, bytes: &[u8], alignment: usize) -> Result<()> {
        self.write_u64(bytes.len() as u64);
        self.write_pointer_offset();
        self.write_pointer_data(bytes);
        self.align_pointer_data(alignment)
    }

    /// Typed convenience over [`write_block`](Self::write_block).
    pub fn write_slice<T: Pod>(&mut self, items: &[T], alignment: usize) -> Result<()> {
        self.write_block(bytemuck::cast_slice(items), alignment)
    }

    /// Current header size (unpadded).
    #[inline]
    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    /// Current pointer-data size.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    /// Finish the buffer and hand ownership to the caller.
    pub fn end(mut self) -> Vec<u8> {
        let header_len = align_up(self.header.len() as u64, HEADER_ALIGNMENT as u64) as usize;
        self.header.resize(header_len, 0);

        for field in &self.pointer_fields {
            let offset = self.origin + header_len as u64 + field.data_pos as u64;
            LittleEndian::write_u64(
                &mut self.header[field.header_pos..field.header_pos + POINTER_FIELD_SIZE],
                offset,
            );
        }

        tracing::trace!(
            header = header_len,
            data = self.data.len(),
            pointers = self.pointer_fields.len(),
            "serialized buffer"
        );

        let mut out = self.header;
        out.reserve_exact(self.data.len());
        out.extend_from_slice(&self.data);
        out
    }
}
