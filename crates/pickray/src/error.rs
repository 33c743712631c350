//! Error types for geometry building and scene bookkeeping.

use thiserror::Error;

use crate::buffer::{BufferType, Format};

/// Errors reported by the ray-intersection kernel.
///
/// None of these cross the query boundary: `intersect` only ever answers
/// hit / no hit. They surface from builds and membership edits, where they
/// are also logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RaytraceError {
    /// No binding of the given type was recorded before commit.
    #[error("no {0:?} buffer bound")]
    MissingBuffer(BufferType),

    /// A binding was recorded with a format the builder cannot read.
    #[error("{buffer_type:?} buffer has format {found:?}, expected {expected:?}")]
    FormatMismatch {
        /// Which binding.
        buffer_type: BufferType,
        /// Format that was bound.
        found: Format,
        /// Format the builder requires.
        expected: Format,
    },

    /// A flat index list did not split evenly into triangles.
    #[error("index count {0} is not a multiple of 3")]
    IndexCountNotTriple(usize),

    /// A binding's stride, offset and count reach past the end of its buffer.
    #[error("{buffer_type:?} binding needs {required} bytes, buffer '{label}' has {available}")]
    OutOfBounds {
        /// Which binding.
        buffer_type: BufferType,
        /// Debug label of the buffer.
        label: String,
        /// Bytes the binding addresses.
        required: usize,
        /// Bytes the buffer actually holds.
        available: usize,
    },

    /// A binding's stride is smaller than one element of its format.
    #[error("{buffer_type:?} stride {stride} is smaller than element size {element_size}")]
    StrideTooSmall {
        /// Which binding.
        buffer_type: BufferType,
        /// Declared stride in bytes.
        stride: usize,
        /// Size of one element of the declared format.
        element_size: usize,
    },

    /// A triangle referenced a vertex past the vertex binding's item count.
    #[error("triangle {triangle} references vertex {index} of {vertex_count}")]
    VertexIndexOutOfRange {
        /// Triangle (primitive id) holding the bad index.
        triangle: usize,
        /// The offending vertex index.
        index: u32,
        /// Number of vertices in the vertex binding.
        vertex_count: usize,
    },

    /// An instance transform has no inverse.
    #[error("instance '{0}' transform is not invertible")]
    SingularTransform(String),

    /// An object was attached to a scene it is already a member of.
    #[error("'{member}' is already attached to scene '{scene}'")]
    AlreadyAttached {
        /// Debug label of the scene.
        scene: String,
        /// Debug label of the geometry or instance.
        member: String,
    },

    /// An object was detached from a scene it is not a member of.
    #[error("'{member}' is not attached to scene '{scene}'")]
    NotAttached {
        /// Debug label of the scene.
        scene: String,
        /// Debug label of the geometry or instance.
        member: String,
    },

    /// A key refers to an object that has been removed from the world.
    #[error("stale {0} handle")]
    StaleHandle(&'static str),

    /// BVH build configuration could not be parsed.
    #[error("invalid BVH config: {0}")]
    Config(String),
}

impl From<toml::de::Error> for RaytraceError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result alias for kernel operations.
pub type Result<T> = std::result::Result<T, RaytraceError>;
