//! PackStream serialization format.
//!
//! PackStream is the binary serialization format Bolt uses for every value
//! and message that crosses the wire.
//!
//! # Supported Types
//!
//! - **Null**: Single byte marker
//! - **Boolean**: True/False markers
//! - **Integer**: Variable-length encoding (-2^63 to 2^63-1)
//! - **Float**: 64-bit IEEE 754
//! - **String**: UTF-8 encoded, variable length prefix
//! - **Bytes**: Raw bytes, variable length prefix
//! - **List**: Sized or streamed (terminated by an end-of-stream marker)
//! - **Map**: Unique string keys, sized or streamed
//! - **Structure**: Signature byte plus a fixed number of fields
//!
//! # Graph Structures
//!
//! - **Node**: id, labels, properties
//! - **Relationship**: id, start_id, end_id, type, properties
//! - **Path**: distinct nodes, distinct unbound relationships, indices
//!
//! # Spatial Structures
//!
//! - **Point2D**: SRID + x, y coordinates
//! - **Point3D**: SRID + x, y, z coordinates

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod structures;
pub mod types;

pub use decoder::{decode, PackStreamDecoder};
pub use encoder::{encode, PackStreamEncoder};
pub use structures::{Node, Path, PathLayout, Point, Relationship, UnboundRelationship};
pub use types::{Value, ValueMap};

use std::fmt;

/// PackStream errors.
///
/// Decoding errors carry the byte offset where the offending item starts.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Unexpected end of input
    UnexpectedEof { position: usize },
    /// Marker byte that does not start any value
    UnknownMarker { marker: u8, position: usize },
    /// End-of-stream marker outside a streamed container
    UnexpectedEndOfStream { position: usize },
    /// Invalid UTF-8 in string
    InvalidUtf8 { position: usize, detail: String },
    /// Map key that is not a string (null included)
    InvalidMapKey { position: usize, found: &'static str },
    /// Same key seen twice in one map
    DuplicateMapKey { key: String, position: usize },
    /// Structure signature not known in this context
    UnknownSignature { signature: u8, position: usize },
    /// Structure with the wrong number of fields
    WrongArity {
        signature: u8,
        expected: usize,
        actual: usize,
        position: usize,
    },
    /// Value too large to encode
    ValueTooLarge(&'static str, usize),
    /// Structure fields of the wrong type
    InvalidStructure(String),
    /// Path whose relationships do not connect its nodes
    InvalidPath(String),
    /// Containers nested deeper than the decoder allows
    NestingTooDeep { max_depth: usize, position: usize },
}

impl PackStreamError {
    /// Byte offset of a decoding error, if any.
    pub fn position(&self) -> Option<usize> {
        match self {
            PackStreamError::UnexpectedEof { position }
            | PackStreamError::UnknownMarker { position, .. }
            | PackStreamError::UnexpectedEndOfStream { position }
            | PackStreamError::InvalidUtf8 { position, .. }
            | PackStreamError::InvalidMapKey { position, .. }
            | PackStreamError::DuplicateMapKey { position, .. }
            | PackStreamError::UnknownSignature { position, .. }
            | PackStreamError::WrongArity { position, .. }
            | PackStreamError::NestingTooDeep { position, .. } => Some(*position),
            PackStreamError::ValueTooLarge(..)
            | PackStreamError::InvalidStructure(_)
            | PackStreamError::InvalidPath(_) => None,
        }
    }
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof { position } => {
                write!(f, "Unexpected end of PackStream data at byte {}", position)
            }
            PackStreamError::UnknownMarker { marker, position } => write!(
                f,
                "Unknown PackStream marker 0x{:02X} at byte {}",
                marker, position
            ),
            PackStreamError::UnexpectedEndOfStream { position } => write!(
                f,
                "End-of-stream marker outside a streamed container at byte {}",
                position
            ),
            PackStreamError::InvalidUtf8 { position, detail } => {
                write!(f, "Invalid UTF-8 in string at byte {}: {}", position, detail)
            }
            PackStreamError::InvalidMapKey { position, found } => write!(
                f,
                "Map keys must be strings, found {} at byte {}",
                found, position
            ),
            PackStreamError::DuplicateMapKey { key, position } => {
                write!(f, "Duplicate map key: \"{}\" at byte {}", key, position)
            }
            PackStreamError::UnknownSignature {
                signature,
                position,
            } => write!(
                f,
                "Unknown structure signature 0x{:02X} at byte {}",
                signature, position
            ),
            PackStreamError::WrongArity {
                signature,
                expected,
                actual,
                position,
            } => write!(
                f,
                "Structure 0x{:02X} at byte {} has {} fields, expected {}",
                signature, position, actual, expected
            ),
            PackStreamError::ValueTooLarge(t, s) => write!(f, "{} too large: {} bytes", t, s),
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::InvalidPath(msg) => write!(f, "Invalid path: {}", msg),
            PackStreamError::NestingTooDeep {
                max_depth,
                position,
            } => write!(
                f,
                "Values nested deeper than {} levels at byte {}",
                max_depth, position
            ),
        }
    }
}

impl std::error::Error for PackStreamError {}
