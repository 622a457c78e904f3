//! PackStream decoder.

use bytes::Buf;

use super::marker::*;
use super::structures::{Node, Path, Point, Relationship, UnboundRelationship};
use super::types::{Value, ValueMap};
use super::PackStreamError;

/// Container size as declared by its header. `None` means a streamed
/// container terminated by [`END_OF_STREAM`].
type Size = Option<usize>;

/// Deepest nesting of lists, maps and structures a decoder accepts.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// PackStream decoder that reads values from a byte slice.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> PackStreamDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Limit how deeply containers may nest.
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Get the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Get remaining bytes count.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Check if all data has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> Result<Value, PackStreamError> {
        let start = self.pos;
        let marker = self.read_u8()?;
        self.decode_marker(marker, start)
    }

    /// Read a structure header, returning `(field_count, signature)`.
    ///
    /// Used by the message layer, which decodes the fields itself.
    pub fn read_struct_header(&mut self) -> Result<(usize, u8), PackStreamError> {
        let start = self.pos;
        let marker = self.read_u8()?;
        let size = match marker {
            m @ 0xB0..=0xBF => tiny_size(m),
            STRUCT_8 => self.read_u8()? as usize,
            STRUCT_16 => self.read_u16()? as usize,
            m => {
                return Err(PackStreamError::InvalidStructure(format!(
                    "expected structure at byte {}, found marker 0x{:02X}",
                    start, m
                )))
            }
        };
        let signature = self.read_u8()?;
        Ok((size, signature))
    }

    fn decode_marker(&mut self, marker: u8, start: usize) -> Result<Value, PackStreamError> {
        let kind = kind_of(marker);
        let nested = matches!(kind, MarkerKind::List | MarkerKind::Map | MarkerKind::Struct);
        if !nested {
            return self.decode_kind(kind, marker, start);
        }
        if self.depth >= self.max_depth {
            return Err(PackStreamError::NestingTooDeep {
                max_depth: self.max_depth,
                position: start,
            });
        }
        self.depth += 1;
        let value = self.decode_kind(kind, marker, start);
        self.depth -= 1;
        value
    }

    fn decode_kind(
        &mut self,
        kind: MarkerKind,
        marker: u8,
        start: usize,
    ) -> Result<Value, PackStreamError> {
        match kind {
            MarkerKind::Null => Ok(Value::Null),
            MarkerKind::Boolean => Ok(Value::Boolean(marker == TRUE)),
            MarkerKind::Float => Ok(Value::Float(self.read_f64()?)),
            MarkerKind::Integer => Ok(Value::Integer(match marker {
                INT_8 => self.read_i8()? as i64,
                INT_16 => self.read_i16()? as i64,
                INT_32 => self.read_i32()? as i64,
                INT_64 => self.read_i64()?,
                tiny => tiny as i8 as i64,
            })),
            MarkerKind::Bytes => {
                let len = match marker {
                    BYTES_8 => self.read_u8()? as usize,
                    BYTES_16 => self.read_u16()? as usize,
                    _ => self.read_u32()? as usize,
                };
                Ok(Value::Bytes(self.read_bytes(len)?.to_vec()))
            }
            MarkerKind::String => {
                let len = match marker {
                    STRING_8 => self.read_u8()? as usize,
                    STRING_16 => self.read_u16()? as usize,
                    STRING_32 => self.read_u32()? as usize,
                    tiny => tiny_size(tiny),
                };
                Ok(Value::String(self.read_string_data(len)?))
            }
            MarkerKind::List => {
                let size = self.list_size(marker)?;
                Ok(Value::List(self.read_list_body(size, |d| d.decode())?))
            }
            MarkerKind::Map => {
                let size = self.map_size(marker)?;
                Ok(Value::Map(self.read_map_body(size)?))
            }
            MarkerKind::Struct => {
                let size = match marker {
                    STRUCT_8 => self.read_u8()? as usize,
                    STRUCT_16 => self.read_u16()? as usize,
                    tiny => tiny_size(tiny),
                };
                let signature = self.read_u8()?;
                self.read_struct_body(size, signature, start)
            }
            MarkerKind::EndOfStream => {
                Err(PackStreamError::UnexpectedEndOfStream { position: start })
            }
            MarkerKind::Reserved => Err(PackStreamError::UnknownMarker {
                marker,
                position: start,
            }),
        }
    }

    fn list_size(&mut self, marker: u8) -> Result<Size, PackStreamError> {
        Ok(match marker {
            LIST_8 => Some(self.read_u8()? as usize),
            LIST_16 => Some(self.read_u16()? as usize),
            LIST_32 => Some(self.read_u32()? as usize),
            LIST_STREAM => None,
            tiny => Some(tiny_size(tiny)),
        })
    }

    fn map_size(&mut self, marker: u8) -> Result<Size, PackStreamError> {
        Ok(match marker {
            MAP_8 => Some(self.read_u8()? as usize),
            MAP_16 => Some(self.read_u16()? as usize),
            MAP_32 => Some(self.read_u32()? as usize),
            MAP_STREAM => None,
            tiny => Some(tiny_size(tiny)),
        })
    }

    /// Whether a streamed container ends here; consumes the marker if so.
    fn at_end_of_stream(&mut self) -> Result<bool, PackStreamError> {
        if self.peek_u8()? == END_OF_STREAM {
            self.pos += 1;
            return Ok(true);
        }
        Ok(false)
    }

    fn read_list_body<T>(
        &mut self,
        size: Size,
        mut item: impl FnMut(&mut Self) -> Result<T, PackStreamError>,
    ) -> Result<Vec<T>, PackStreamError> {
        match size {
            Some(len) => {
                let mut items = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    items.push(item(self)?);
                }
                Ok(items)
            }
            None => {
                let mut items = Vec::new();
                while !self.at_end_of_stream()? {
                    items.push(item(self)?);
                }
                Ok(items)
            }
        }
    }

    fn read_map_body(&mut self, size: Size) -> Result<ValueMap, PackStreamError> {
        let mut map = ValueMap::with_capacity(size.unwrap_or(0).min(1024));
        let mut remaining = size;
        loop {
            match remaining {
                Some(0) => break,
                Some(ref mut n) => *n -= 1,
                None => {
                    if self.at_end_of_stream()? {
                        break;
                    }
                }
            }

            let key_pos = self.pos;
            let key = match self.decode()? {
                Value::String(s) => s,
                other => {
                    return Err(PackStreamError::InvalidMapKey {
                        position: key_pos,
                        found: other.type_name(),
                    })
                }
            };
            if map.contains_key(&key) {
                return Err(PackStreamError::DuplicateMapKey {
                    key,
                    position: key_pos,
                });
            }
            let value = self.decode()?;
            map.insert(key, value);
        }
        Ok(map)
    }

    fn read_struct_body(
        &mut self,
        size: usize,
        signature: u8,
        start: usize,
    ) -> Result<Value, PackStreamError> {
        let expected = match signature {
            NODE | PATH | POINT_2D => 3,
            RELATIONSHIP => 5,
            POINT_3D => 4,
            _ => {
                return Err(PackStreamError::UnknownSignature {
                    signature,
                    position: start,
                })
            }
        };
        check_arity(signature, expected, size, start)?;

        match signature {
            NODE => Ok(Value::Node(self.read_node_fields()?)),
            RELATIONSHIP => Ok(Value::Relationship(Relationship {
                id: self.read_int("relationship id")?,
                start_node_id: self.read_int("relationship start id")?,
                end_node_id: self.read_int("relationship end id")?,
                rel_type: self.read_string("relationship type")?,
                properties: self.read_map("relationship properties")?,
            })),
            PATH => Ok(Value::Path(self.read_path_fields()?)),
            POINT_2D => Ok(Value::Point(Point::new_2d(
                self.read_int("point srid")?,
                self.read_float("point x")?,
                self.read_float("point y")?,
            ))),
            _ => Ok(Value::Point(Point::new_3d(
                self.read_int("point srid")?,
                self.read_float("point x")?,
                self.read_float("point y")?,
                self.read_float("point z")?,
            ))),
        }
    }

    fn read_node_fields(&mut self) -> Result<Node, PackStreamError> {
        let id = self.read_int("node id")?;
        let labels = self.read_list("node labels", |d| d.read_string("node label"))?;
        let properties = self.read_map("node properties")?;
        Ok(Node::new(id, labels, properties))
    }

    fn read_path_fields(&mut self) -> Result<Path, PackStreamError> {
        let nodes = self.read_list("path nodes", |d| {
            let start = d.pos;
            let (size, signature) = d.read_struct_header()?;
            expect_signature(NODE, signature, start)?;
            check_arity(signature, 3, size, start)?;
            d.read_node_fields()
        })?;
        let relationships = self.read_list("path relationships", |d| {
            let start = d.pos;
            let (size, signature) = d.read_struct_header()?;
            expect_signature(UNBOUND_RELATIONSHIP, signature, start)?;
            check_arity(signature, 3, size, start)?;
            Ok(UnboundRelationship {
                id: d.read_int("relationship id")?,
                rel_type: d.read_string("relationship type")?,
                properties: d.read_map("relationship properties")?,
            })
        })?;
        let indices = self.read_list("path indices", |d| d.read_int("path index"))?;
        Path::from_layout(nodes, relationships, &indices)
    }

    // Typed field readers for structure bodies.

    fn read_int(&mut self, what: &str) -> Result<i64, PackStreamError> {
        match self.decode()? {
            Value::Integer(i) => Ok(i),
            other => Err(field_type_error(what, "Integer", &other)),
        }
    }

    fn read_float(&mut self, what: &str) -> Result<f64, PackStreamError> {
        match self.decode()? {
            Value::Float(f) => Ok(f),
            other => Err(field_type_error(what, "Float", &other)),
        }
    }

    fn read_string(&mut self, what: &str) -> Result<String, PackStreamError> {
        match self.decode()? {
            Value::String(s) => Ok(s),
            other => Err(field_type_error(what, "String", &other)),
        }
    }

    fn read_map(&mut self, what: &str) -> Result<ValueMap, PackStreamError> {
        match self.decode()? {
            Value::Map(m) => Ok(m),
            other => Err(field_type_error(what, "Map", &other)),
        }
    }

    fn read_list<T>(
        &mut self,
        what: &str,
        item: impl FnMut(&mut Self) -> Result<T, PackStreamError>,
    ) -> Result<Vec<T>, PackStreamError> {
        let start = self.pos;
        let marker = self.read_u8()?;
        if kind_of(marker) != MarkerKind::List {
            return Err(PackStreamError::InvalidStructure(format!(
                "{} must be List, found marker 0x{:02X} at byte {}",
                what, marker, start
            )));
        }
        let size = self.list_size(marker)?;
        self.read_list_body(size, item)
    }

    fn read_string_data(&mut self, len: usize) -> Result<String, PackStreamError> {
        let start = self.pos;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|e| PackStreamError::InvalidUtf8 {
                position: start,
                detail: e.to_string(),
            })
    }

    // Low-level read methods

    fn ensure(&self, n: usize) -> Result<(), PackStreamError> {
        if self.remaining() < n {
            return Err(PackStreamError::UnexpectedEof {
                position: self.data.len(),
            });
        }
        Ok(())
    }

    fn peek_u8(&self) -> Result<u8, PackStreamError> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        let value = self.peek_u8()?;
        self.pos += 1;
        Ok(value)
    }

    fn read_i8(&mut self) -> Result<i8, PackStreamError> {
        Ok(self.read_u8()? as i8)
    }

    fn read_u16(&mut self) -> Result<u16, PackStreamError> {
        self.ensure(2)?;
        let value = (&self.data[self.pos..]).get_u16();
        self.pos += 2;
        Ok(value)
    }

    fn read_i16(&mut self) -> Result<i16, PackStreamError> {
        self.ensure(2)?;
        let value = (&self.data[self.pos..]).get_i16();
        self.pos += 2;
        Ok(value)
    }

    fn read_u32(&mut self) -> Result<u32, PackStreamError> {
        self.ensure(4)?;
        let value = (&self.data[self.pos..]).get_u32();
        self.pos += 4;
        Ok(value)
    }

    fn read_i32(&mut self) -> Result<i32, PackStreamError> {
        self.ensure(4)?;
        let value = (&self.data[self.pos..]).get_i32();
        self.pos += 4;
        Ok(value)
    }

    fn read_i64(&mut self) -> Result<i64, PackStreamError> {
        self.ensure(8)?;
        let value = (&self.data[self.pos..]).get_i64();
        self.pos += 8;
        Ok(value)
    }

    fn read_f64(&mut self) -> Result<f64, PackStreamError> {
        self.ensure(8)?;
        let value = (&self.data[self.pos..]).get_f64();
        self.pos += 8;
        Ok(value)
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        self.ensure(len)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

fn check_arity(
    signature: u8,
    expected: usize,
    actual: usize,
    position: usize,
) -> Result<(), PackStreamError> {
    if expected != actual {
        return Err(PackStreamError::WrongArity {
            signature,
            expected,
            actual,
            position,
        });
    }
    Ok(())
}

fn expect_signature(expected: u8, actual: u8, position: usize) -> Result<(), PackStreamError> {
    if expected != actual {
        return Err(PackStreamError::UnknownSignature {
            signature: actual,
            position,
        });
    }
    Ok(())
}

fn field_type_error(what: &str, expected: &str, found: &Value) -> PackStreamError {
    PackStreamError::InvalidStructure(format!(
        "{} must be {}, got {}",
        what,
        expected,
        found.type_name()
    ))
}

/// Convenience function to decode a single value from bytes.
pub fn decode(data: &[u8]) -> Result<Value, PackStreamError> {
    let mut decoder = PackStreamDecoder::new(data);
    decoder.decode()
}
