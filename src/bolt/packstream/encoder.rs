//! PackStream encoder.

use bytes::{BufMut, BytesMut};

use super::marker::*;
use super::structures::{Node, Path, Point, Relationship, UnboundRelationship};
use super::types::{Value, ValueMap};
use super::PackStreamError;

/// PackStream encoder that writes values into any [`BufMut`].
///
/// The default form owns a [`BytesMut`]; `PackStreamEncoder<&mut BytesMut>`
/// appends to a buffer owned elsewhere, such as an outbound message sink.
pub struct PackStreamEncoder<B = BytesMut> {
    buffer: B,
}

impl PackStreamEncoder<BytesMut> {
    /// Create a new encoder with default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new encoder with specified buffer capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Get the bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

impl Default for PackStreamEncoder<BytesMut> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: BufMut> PackStreamEncoder<B> {
    /// Wrap an existing buffer; encoded bytes are appended to it.
    pub fn from_buf(buffer: B) -> Self {
        Self { buffer }
    }

    /// Consume the encoder and return the buffer.
    pub fn into_inner(self) -> B {
        self.buffer
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> Result<(), PackStreamError> {
        match value {
            Value::Null => {
                self.encode_null();
                Ok(())
            }
            Value::Boolean(b) => {
                self.encode_bool(*b);
                Ok(())
            }
            Value::Integer(i) => {
                self.encode_int(*i);
                Ok(())
            }
            Value::Float(f) => {
                self.encode_float(*f);
                Ok(())
            }
            Value::Bytes(b) => self.encode_bytes(b),
            Value::String(s) => self.encode_string(s),
            Value::List(l) => self.encode_list(l),
            Value::Map(m) => self.encode_map(m),
            Value::Node(n) => self.encode_node(n),
            Value::Relationship(r) => self.encode_relationship(r),
            Value::Path(p) => self.encode_path(p),
            Value::Point(p) => self.encode_point(p),
        }
    }

    pub fn encode_null(&mut self) {
        self.buffer.put_u8(NULL);
    }

    pub fn encode_bool(&mut self, value: bool) {
        self.buffer.put_u8(if value { TRUE } else { FALSE });
    }

    /// Encode an integer using the smallest representation.
    pub fn encode_int(&mut self, value: i64) {
        if is_tiny_int(value) {
            self.buffer.put_u8(value as u8);
        } else if value >= i8::MIN as i64 && value <= i8::MAX as i64 {
            self.buffer.put_u8(INT_8);
            self.buffer.put_i8(value as i8);
        } else if value >= i16::MIN as i64 && value <= i16::MAX as i64 {
            self.buffer.put_u8(INT_16);
            self.buffer.put_i16(value as i16);
        } else if value >= i32::MIN as i64 && value <= i32::MAX as i64 {
            self.buffer.put_u8(INT_32);
            self.buffer.put_i32(value as i32);
        } else {
            self.buffer.put_u8(INT_64);
            self.buffer.put_i64(value);
        }
    }

    /// Encode a float (always 64-bit).
    pub fn encode_float(&mut self, value: f64) {
        self.buffer.put_u8(FLOAT_64);
        self.buffer.put_f64(value);
    }

    pub fn encode_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        let len = value.len();
        if len <= u8::MAX as usize {
            self.buffer.put_u8(BYTES_8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(BYTES_16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(BYTES_32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge("bytes", len));
        }
        self.buffer.put_slice(value);
        Ok(())
    }

    pub fn encode_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.encode_sized_header(
            "string",
            bytes.len(),
            TINY_STRING,
            [STRING_8, STRING_16, STRING_32],
        )?;
        self.buffer.put_slice(bytes);
        Ok(())
    }

    pub fn encode_list(&mut self, values: &[Value]) -> Result<(), PackStreamError> {
        self.encode_list_header(values.len())?;
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    /// Encode a map. Entry order follows the map's iteration order.
    pub fn encode_map(&mut self, map: &ValueMap) -> Result<(), PackStreamError> {
        self.encode_map_header(map.len())?;
        for (key, value) in map {
            self.encode_string(key)?;
            self.encode(value)?;
        }
        Ok(())
    }

    pub fn encode_list_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_sized_header("list", len, TINY_LIST, [LIST_8, LIST_16, LIST_32])
    }

    pub fn encode_map_header(&mut self, len: usize) -> Result<(), PackStreamError> {
        self.encode_sized_header("map", len, TINY_MAP, [MAP_8, MAP_16, MAP_32])
    }

    /// Start a list of unknown length; finish with [`Self::encode_end_of_stream`].
    pub fn encode_list_stream_header(&mut self) {
        self.buffer.put_u8(LIST_STREAM);
    }

    /// Start a map of unknown length; finish with [`Self::encode_end_of_stream`].
    pub fn encode_map_stream_header(&mut self) {
        self.buffer.put_u8(MAP_STREAM);
    }

    pub fn encode_end_of_stream(&mut self) {
        self.buffer.put_u8(END_OF_STREAM);
    }

    /// Encode a structure header; the caller writes `size` fields after it.
    pub fn encode_struct_header(&mut self, size: usize, signature: u8) -> Result<(), PackStreamError> {
        if size <= TINY_SIZE_MAX {
            self.buffer.put_u8(TINY_STRUCT | size as u8);
        } else if size <= u8::MAX as usize {
            self.buffer.put_u8(STRUCT_8);
            self.buffer.put_u8(size as u8);
        } else if size <= u16::MAX as usize {
            self.buffer.put_u8(STRUCT_16);
            self.buffer.put_u16(size as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge("structure fields", size));
        }
        self.buffer.put_u8(signature);
        Ok(())
    }

    pub fn encode_node(&mut self, node: &Node) -> Result<(), PackStreamError> {
        self.encode_struct_header(3, NODE)?;
        self.encode_int(node.id);
        self.encode_list_header(node.labels.len())?;
        for label in &node.labels {
            self.encode_string(label)?;
        }
        self.encode_map(&node.properties)
    }

    pub fn encode_relationship(&mut self, rel: &Relationship) -> Result<(), PackStreamError> {
        self.encode_struct_header(5, RELATIONSHIP)?;
        self.encode_int(rel.id);
        self.encode_int(rel.start_node_id);
        self.encode_int(rel.end_node_id);
        self.encode_string(&rel.rel_type)?;
        self.encode_map(&rel.properties)
    }

    fn encode_unbound_relationship(
        &mut self,
        rel: &UnboundRelationship,
    ) -> Result<(), PackStreamError> {
        self.encode_struct_header(3, UNBOUND_RELATIONSHIP)?;
        self.encode_int(rel.id);
        self.encode_string(&rel.rel_type)?;
        self.encode_map(&rel.properties)
    }

    /// Encode a path in its compact form. Fails before writing anything if
    /// the relationships do not connect the nodes.
    pub fn encode_path(&mut self, path: &Path) -> Result<(), PackStreamError> {
        let layout = path.layout()?;
        self.encode_struct_header(3, PATH)?;
        self.encode_list_header(layout.nodes.len())?;
        for node in &layout.nodes {
            self.encode_node(node)?;
        }
        self.encode_list_header(layout.relationships.len())?;
        for rel in &layout.relationships {
            self.encode_unbound_relationship(rel)?;
        }
        self.encode_list_header(layout.indices.len())?;
        for index in &layout.indices {
            self.encode_int(*index);
        }
        Ok(())
    }

    pub fn encode_point(&mut self, point: &Point) -> Result<(), PackStreamError> {
        match point.z {
            None => {
                self.encode_struct_header(3, POINT_2D)?;
                self.encode_int(point.srid);
                self.encode_float(point.x);
                self.encode_float(point.y);
            }
            Some(z) => {
                self.encode_struct_header(4, POINT_3D)?;
                self.encode_int(point.srid);
                self.encode_float(point.x);
                self.encode_float(point.y);
                self.encode_float(z);
            }
        }
        Ok(())
    }

    fn encode_sized_header(
        &mut self,
        what: &'static str,
        len: usize,
        tiny: u8,
        [m8, m16, m32]: [u8; 3],
    ) -> Result<(), PackStreamError> {
        if len <= TINY_SIZE_MAX {
            self.buffer.put_u8(tiny | len as u8);
        } else if len <= u8::MAX as usize {
            self.buffer.put_u8(m8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(m16);
            self.buffer.put_u16(len as u16);
        } else if len <= u32::MAX as usize {
            self.buffer.put_u8(m32);
            self.buffer.put_u32(len as u32);
        } else {
            return Err(PackStreamError::ValueTooLarge(what, len));
        }
        Ok(())
    }
}

/// Convenience function to encode a single value.
pub fn encode(value: &Value) -> Result<BytesMut, PackStreamError> {
    let mut encoder = PackStreamEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_null_and_bool() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_null();
        enc.encode_bool(true);
        enc.encode_bool(false);
        assert_eq!(enc.as_bytes(), &[0xC0, 0xC3, 0xC2]);
    }

    #[test]
    fn test_encode_int_boundaries() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_int(0);
        enc.encode_int(127);
        enc.encode_int(-16);
        enc.encode_int(-1);
        assert_eq!(enc.as_bytes(), &[0x00, 0x7F, 0xF0, 0xFF]);

        let mut enc = PackStreamEncoder::new();
        enc.encode_int(-17);
        enc.encode_int(-128);
        enc.encode_int(1000);
        assert_eq!(
            enc.as_bytes(),
            &[0xC8, 0xEF, 0xC8, 0x80, 0xC9, 0x03, 0xE8]
        );

        let mut enc = PackStreamEncoder::new();
        enc.encode_int(100000);
        assert_eq!(enc.as_bytes(), &[0xCA, 0x00, 0x01, 0x86, 0xA0]);
    }

    #[test]
    fn test_encode_int64() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_int(i64::MAX);
        assert_eq!(enc.as_bytes()[0], 0xCB);
        assert_eq!(enc.len(), 9);
    }

    #[test]
    fn test_encode_float() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_float(1.1);
        assert_eq!(
            enc.as_bytes(),
            &[0xC1, 0x3F, 0xF1, 0x99, 0x99, 0x99, 0x99, 0x99, 0x9A]
        );
    }

    #[test]
    fn test_encode_strings() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_string("").unwrap();
        enc.encode_string("hello").unwrap();
        assert_eq!(enc.as_bytes(), b"\x80\x85hello");

        let mut enc = PackStreamEncoder::new();
        enc.encode_string(&"a".repeat(20)).unwrap();
        assert_eq!(&enc.as_bytes()[..2], &[0xD0, 20]);

        let mut enc = PackStreamEncoder::new();
        enc.encode_string(&"a".repeat(256)).unwrap();
        assert_eq!(&enc.as_bytes()[..3], &[0xD1, 0x01, 0x00]);
    }

    #[test]
    fn test_encode_bytes() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(enc.as_bytes(), &[0xCC, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_encode_list_and_map() {
        let list = vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)];
        let mut enc = PackStreamEncoder::new();
        enc.encode_list(&list).unwrap();
        enc.encode_list(&[]).unwrap();
        assert_eq!(enc.as_bytes(), &[0x93, 1, 2, 3, 0x90]);

        let mut map = ValueMap::new();
        map.insert("a".to_string(), Value::Integer(1));
        let mut enc = PackStreamEncoder::new();
        enc.encode_map(&map).unwrap();
        enc.encode_map(&ValueMap::new()).unwrap();
        assert_eq!(enc.as_bytes(), &[0xA1, 0x81, b'a', 0x01, 0xA0]);
    }

    #[test]
    fn test_encode_list_16_header() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_list_header(300).unwrap();
        assert_eq!(enc.as_bytes(), &[0xD5, 0x01, 0x2C]);
    }

    #[test]
    fn test_encode_stream_headers() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_list_stream_header();
        enc.encode_int(1);
        enc.encode_end_of_stream();
        assert_eq!(enc.as_bytes(), &[0xD7, 0x01, 0xDF]);
        assert_eq!(
            super::super::decode(enc.as_bytes()).unwrap(),
            Value::List(vec![Value::Integer(1)])
        );
    }

    #[test]
    fn test_encode_struct_header() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_struct_header(0, 0x0F).unwrap();
        enc.encode_struct_header(16, 0x10).unwrap();
        assert_eq!(enc.as_bytes(), &[0xB0, 0x0F, 0xDC, 0x10, 0x10]);
    }

    #[test]
    fn test_encode_node() {
        let node = Node::new(1, vec!["A".to_string()], ValueMap::new());
        let mut enc = PackStreamEncoder::new();
        enc.encode_node(&node).unwrap();
        assert_eq!(enc.as_bytes(), &[0xB3, 0x4E, 0x01, 0x91, 0x81, b'A', 0xA0]);
    }

    #[test]
    fn test_encode_relationship() {
        let rel = Relationship::new(5, 1, 2, "R", ValueMap::new());
        let mut enc = PackStreamEncoder::new();
        enc.encode_relationship(&rel).unwrap();
        assert_eq!(
            enc.as_bytes(),
            &[0xB5, 0x52, 0x05, 0x01, 0x02, 0x81, b'R', 0xA0]
        );
    }

    #[test]
    fn test_encode_single_node_path() {
        let node = Node::new(1, vec![], ValueMap::new());
        let mut enc = PackStreamEncoder::new();
        enc.encode_path(&Path::single(node)).unwrap();
        assert_eq!(
            enc.as_bytes(),
            &[0xB3, 0x50, 0x91, 0xB3, 0x4E, 0x01, 0x90, 0xA0, 0x90, 0x90]
        );
    }

    #[test]
    fn test_encode_invalid_path_writes_nothing() {
        let a = Node::new(1, vec![], ValueMap::new());
        let b = Node::new(2, vec![], ValueMap::new());
        let path = Path::new(vec![a, b], vec![Relationship::new(9, 3, 4, "R", ValueMap::new())]);
        let mut enc = PackStreamEncoder::new();
        assert!(matches!(
            enc.encode_path(&path),
            Err(PackStreamError::InvalidPath(_))
        ));
        assert!(enc.is_empty());
    }

    #[test]
    fn test_encode_point() {
        let mut enc = PackStreamEncoder::new();
        enc.encode_point(&Point::new_2d(1, 0.0, 0.0)).unwrap();
        assert_eq!(&enc.as_bytes()[..3], &[0xB3, 0x58, 0x01]);
        assert_eq!(enc.len(), 3 + 9 + 9);
    }

    #[test]
    fn test_encode_into_borrowed_buffer() {
        let mut buf = BytesMut::from(&b"\xAA"[..]);
        {
            let mut enc = PackStreamEncoder::from_buf(&mut buf);
            enc.encode(&Value::from("x")).unwrap();
        }
        assert_eq!(&buf[..], &[0xAA, 0x81, b'x']);
    }
}
