//! CPU-side buffers and the binding descriptors a geometry is built from.

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{RaytraceError, Result};

/// Role of a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Vertex positions.
    Vertex,
    /// Triangle vertex indices.
    Index,
}

/// Element layout of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Two 32-bit floats.
    Float2,
    /// Three 32-bit floats (vertex positions).
    Float3,
    /// Four 32-bit floats.
    Float4,
    /// One 32-bit unsigned integer.
    Uint,
    /// Two 32-bit unsigned integers.
    Uint2,
    /// Three 32-bit unsigned integers (one triangle).
    Uint3,
}

impl Format {
    /// Size in bytes of one element.
    pub const fn element_size(self) -> usize {
        match self {
            Format::Float2 | Format::Uint2 => 8,
            Format::Float3 | Format::Uint3 => 12,
            Format::Float4 => 16,
            Format::Uint => 4,
        }
    }
}

/// An immutable, shareable byte buffer with a debug label.
///
/// Cloning is cheap; clones share the same bytes.
#[derive(Clone)]
pub struct Buffer {
    label: Arc<str>,
    bytes: Arc<[u8]>,
}

impl Buffer {
    /// Wrap raw bytes.
    pub fn from_bytes(label: &str, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            label: label.into(),
            bytes: bytes.into(),
        }
    }

    /// Copy a slice of plain-old-data values into a new buffer.
    pub fn from_pod<T: Pod>(label: &str, data: &[T]) -> Self {
        Self::from_bytes(label, bytemuck::cast_slice::<T, u8>(data))
    }

    /// Buffer of packed `f32` values.
    pub fn from_f32(label: &str, data: &[f32]) -> Self {
        Self::from_pod(label, data)
    }

    /// Buffer of packed `u32` values.
    pub fn from_u32(label: &str, data: &[u32]) -> Self {
        Self::from_pod(label, data)
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True if the buffer holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("label", &self.label)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// One `set_buffer` call: which bytes to read, and how.
#[derive(Debug, Clone)]
pub struct BufferBinding {
    /// Vertex or index.
    pub buffer_type: BufferType,
    /// Binding slot. Recorded for the caller; the builder reads the most
    /// recent binding of each type regardless of slot.
    pub slot: u32,
    /// Element layout.
    pub format: Format,
    /// Source buffer.
    pub buffer: Buffer,
    /// Byte offset of the first element.
    pub byte_offset: usize,
    /// Distance in bytes between consecutive elements.
    pub byte_stride: usize,
    /// Number of elements (vertices, or triangles for index bindings).
    pub item_count: usize,
}

impl BufferBinding {
    /// Check that the binding has the expected format, a usable stride, and
    /// that every element lies inside the buffer.
    pub(crate) fn validate(&self, expected: Format) -> Result<()> {
        if self.format != expected {
            return Err(RaytraceError::FormatMismatch {
                buffer_type: self.buffer_type,
                found: self.format,
                expected,
            });
        }
        let element_size = self.format.element_size();
        if self.item_count > 1 && self.byte_stride < element_size {
            return Err(RaytraceError::StrideTooSmall {
                buffer_type: self.buffer_type,
                stride: self.byte_stride,
                element_size,
            });
        }
        if self.item_count == 0 {
            return Ok(());
        }
        let required = (self.item_count - 1)
            .checked_mul(self.byte_stride)
            .and_then(|n| n.checked_add(self.byte_offset))
            .and_then(|n| n.checked_add(element_size))
            .unwrap_or(usize::MAX);
        if required > self.buffer.len() {
            return Err(RaytraceError::OutOfBounds {
                buffer_type: self.buffer_type,
                label: self.buffer.label().to_string(),
                required,
                available: self.buffer.len(),
            });
        }
        Ok(())
    }

    /// Read element `item` as three packed 32-bit values.
    ///
    /// The binding must have passed [`validate`](Self::validate) and `item`
    /// must be below `item_count`.
    #[inline]
    pub(crate) fn read3<T: Pod>(&self, item: usize) -> [T; 3] {
        let start = self.byte_offset + item * self.byte_stride;
        let end = start + 3 * std::mem::size_of::<T>();
        bytemuck::pod_read_unaligned(&self.buffer.bytes()[start..end])
    }
}
