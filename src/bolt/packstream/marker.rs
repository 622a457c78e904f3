//! PackStream marker bytes.
//!
//! Every encoded value starts with one marker byte. Tiny forms pack the
//! value (small integers) or the size (strings, lists, maps, structures)
//! into the low nibble; everything else uses a fixed marker followed by a
//! big-endian size or payload.

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

/// Tiny integers (-16..=127) are the marker byte itself.
pub const TINY_INT_MIN: i64 = -16;
pub const TINY_INT_MAX: i64 = 127;
pub const INT_8: u8 = 0xC8;
pub const INT_16: u8 = 0xC9;
pub const INT_32: u8 = 0xCA;
pub const INT_64: u8 = 0xCB;

pub const BYTES_8: u8 = 0xCC;
pub const BYTES_16: u8 = 0xCD;
pub const BYTES_32: u8 = 0xCE;

pub const TINY_STRING: u8 = 0x80;
pub const STRING_8: u8 = 0xD0;
pub const STRING_16: u8 = 0xD1;
pub const STRING_32: u8 = 0xD2;

pub const TINY_LIST: u8 = 0x90;
pub const LIST_8: u8 = 0xD4;
pub const LIST_16: u8 = 0xD5;
pub const LIST_32: u8 = 0xD6;
/// List of unknown size, terminated by [`END_OF_STREAM`].
pub const LIST_STREAM: u8 = 0xD7;

pub const TINY_MAP: u8 = 0xA0;
pub const MAP_8: u8 = 0xD8;
pub const MAP_16: u8 = 0xD9;
pub const MAP_32: u8 = 0xDA;
/// Map of unknown size, terminated by [`END_OF_STREAM`].
pub const MAP_STREAM: u8 = 0xDB;

pub const TINY_STRUCT: u8 = 0xB0;
pub const STRUCT_8: u8 = 0xDC;
pub const STRUCT_16: u8 = 0xDD;

pub const END_OF_STREAM: u8 = 0xDF;

/// Largest size that fits in the low nibble of a tiny marker.
pub const TINY_SIZE_MAX: usize = 15;

/// Structure signatures for values that may appear inside messages.
pub const NODE: u8 = 0x4E; // 'N'
pub const RELATIONSHIP: u8 = 0x52; // 'R'
pub const UNBOUND_RELATIONSHIP: u8 = 0x72; // 'r'
pub const PATH: u8 = 0x50; // 'P'
pub const POINT_2D: u8 = 0x58; // 'X'
pub const POINT_3D: u8 = 0x59; // 'Y'

/// Coarse type of a marker byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Null,
    Boolean,
    Integer,
    Float,
    Bytes,
    String,
    List,
    Map,
    Struct,
    EndOfStream,
    Reserved,
}

/// Classify a marker byte without consuming any payload.
pub fn kind_of(marker: u8) -> MarkerKind {
    match marker {
        0x00..=0x7F | 0xF0..=0xFF => MarkerKind::Integer,
        0x80..=0x8F => MarkerKind::String,
        0x90..=0x9F => MarkerKind::List,
        0xA0..=0xAF => MarkerKind::Map,
        0xB0..=0xBF => MarkerKind::Struct,
        NULL => MarkerKind::Null,
        FLOAT_64 => MarkerKind::Float,
        FALSE | TRUE => MarkerKind::Boolean,
        INT_8 | INT_16 | INT_32 | INT_64 => MarkerKind::Integer,
        BYTES_8 | BYTES_16 | BYTES_32 => MarkerKind::Bytes,
        STRING_8 | STRING_16 | STRING_32 => MarkerKind::String,
        LIST_8 | LIST_16 | LIST_32 | LIST_STREAM => MarkerKind::List,
        MAP_8 | MAP_16 | MAP_32 | MAP_STREAM => MarkerKind::Map,
        STRUCT_8 | STRUCT_16 => MarkerKind::Struct,
        END_OF_STREAM => MarkerKind::EndOfStream,
        _ => MarkerKind::Reserved,
    }
}

/// Size packed into the low nibble of a tiny marker.
#[inline]
pub fn tiny_size(marker: u8) -> usize {
    (marker & 0x0F) as usize
}

#[inline]
pub fn is_tiny_int(value: i64) -> bool {
    (TINY_INT_MIN..=TINY_INT_MAX).contains(&value)
}
