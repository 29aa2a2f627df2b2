//! MessagePack wire codec.
//!
//! Decimals, dates and date-times travel as a three element array
//! `["type", <tag>, <text>]` and are restored on decode. A marker with an
//! unknown tag or an unparsable body decodes to [`Value::Null`], as do
//! MessagePack extension types.

use std::fmt;

use rmp::{encode, Marker};
use tracing::debug;

use crate::document::PathDocument;
use crate::error::CodecError;
use crate::names::FieldNames;
use crate::value::{format_date, format_datetime, parse_date, parse_datetime, Map, Value};

type Result<T> = std::result::Result<T, CodecError>;

/// Maximum container nesting accepted by [`pack`] and [`unpack`].
///
/// Both recurse once per level, so the limit has to fit a default 2 MiB
/// thread stack in debug builds.
pub const MAX_DEPTH: usize = 128;

const MARKER_KEY: &str = "type";
const TAG_DECIMAL: &str = "decimal";
const TAG_DATE: &str = "date";
const TAG_DATETIME: &str = "datetime";

/// Encode a value.
pub fn pack(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_value(&mut out, value, 0)?;
    Ok(out)
}

/// Encode a document root.
pub fn pack_document(document: &PathDocument) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_map(&mut out, document.as_map(), 0)?;
    Ok(out)
}

/// Decode a single value that must span the whole input.
pub fn unpack(bytes: &[u8]) -> Result<Value> {
    let mut decoder = Decoder {
        input: bytes,
        pos: 0,
    };
    let value = decoder.value(0)?;
    let remaining = decoder.remaining();
    if remaining > 0 {
        return Err(CodecError::TrailingBytes(remaining));
    }
    Ok(value)
}

/// Decode a document. The top-level value must be a mapping.
pub fn unpack_document(bytes: &[u8], names: Option<FieldNames>) -> Result<PathDocument> {
    match unpack(bytes)? {
        Value::Map(root) => Ok(PathDocument::from_map(root, names)),
        other => Err(CodecError::NotADocument(other.type_name())),
    }
}

fn encode_err<E: fmt::Debug>(err: E) -> CodecError {
    CodecError::Encode(format!("{err:?}"))
}

fn length(kind: &'static str, len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CodecError::TooLarge { kind, len })
}

fn write_value(out: &mut Vec<u8>, value: &Value, depth: usize) -> Result<()> {
    match value {
        Value::Null => encode::write_nil(out).map_err(encode_err),
        Value::Bool(b) => encode::write_bool(out, *b).map_err(encode_err),
        Value::Int(n) => encode::write_sint(out, *n).map(drop).map_err(encode_err),
        Value::Float(f) => encode::write_f64(out, *f).map_err(encode_err),
        Value::String(s) => write_str(out, s),
        Value::Binary(b) => {
            length("binary", b.len())?;
            encode::write_bin(out, b).map_err(encode_err)
        }
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                return Err(CodecError::TooDeep(MAX_DEPTH));
            }
            encode::write_array_len(out, length("array", items.len())?).map_err(encode_err)?;
            for item in items {
                write_value(out, item, depth + 1)?;
            }
            Ok(())
        }
        Value::Map(map) => write_map(out, map, depth),
        Value::Decimal(d) => write_marker(out, TAG_DECIMAL, d.as_str()),
        Value::DateTime(dt) => write_marker(out, TAG_DATETIME, &format_datetime(dt)),
        Value::Date(d) => write_marker(out, TAG_DATE, &format_date(d)),
    }
}

fn write_map(out: &mut Vec<u8>, map: &Map, depth: usize) -> Result<()> {
    if depth >= MAX_DEPTH {
        return Err(CodecError::TooDeep(MAX_DEPTH));
    }
    encode::write_map_len(out, length("map", map.len())?).map_err(encode_err)?;
    for (key, value) in map {
        write_str(out, key)?;
        write_value(out, value, depth + 1)?;
    }
    Ok(())
}

fn write_str(out: &mut Vec<u8>, s: &str) -> Result<()> {
    length("string", s.len())?;
    encode::write_str(out, s).map_err(encode_err)
}

fn write_marker(out: &mut Vec<u8>, tag: &str, text: &str) -> Result<()> {
    encode::write_array_len(out, 3).map_err(encode_err)?;
    write_str(out, MARKER_KEY)?;
    write_str(out, tag)?;
    write_str(out, text)
}

fn read_marker(tag: &Value, text: &Value) -> Value {
    let (Some(tag), Some(text)) = (tag.as_str(), text.as_str()) else {
        return Value::Null;
    };
    let restored = match tag {
        TAG_DECIMAL => text.parse().ok().map(Value::Decimal),
        TAG_DATE => parse_date(text).map(Value::Date),
        TAG_DATETIME => parse_datetime(text).map(Value::DateTime),
        _ => None,
    };
    if restored.is_none() {
        debug!(tag, text, "unreadable tagged marker decoded as null");
    }
    restored.unwrap_or(Value::Null)
}

struct Decoder<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.input.len())
            .ok_or(CodecError::UnexpectedEof(self.input.len()))?;
        let bytes = &self.input[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u16(&mut self) -> Result<usize> {
        Ok(u16::from_be_bytes(self.bytes()?) as usize)
    }

    fn u32(&mut self) -> Result<usize> {
        Ok(u32::from_be_bytes(self.bytes()?) as usize)
    }

    fn value(&mut self, depth: usize) -> Result<Value> {
        let offset = self.pos;
        let byte = self.u8()?;
        let value = match Marker::from_u8(byte) {
            Marker::Null => Value::Null,
            Marker::True => Value::Bool(true),
            Marker::False => Value::Bool(false),
            Marker::FixPos(n) => Value::Int(i64::from(n)),
            Marker::FixNeg(n) => Value::Int(i64::from(n)),
            Marker::U8 => Value::Int(i64::from(self.u8()?)),
            Marker::U16 => Value::Int(i64::from(u16::from_be_bytes(self.bytes()?))),
            Marker::U32 => Value::Int(i64::from(u32::from_be_bytes(self.bytes()?))),
            Marker::U64 => {
                let n = u64::from_be_bytes(self.bytes()?);
                Value::Int(i64::try_from(n).map_err(|_| CodecError::IntegerOverflow(offset))?)
            }
            Marker::I8 => Value::Int(i64::from(i8::from_be_bytes(self.bytes()?))),
            Marker::I16 => Value::Int(i64::from(i16::from_be_bytes(self.bytes()?))),
            Marker::I32 => Value::Int(i64::from(i32::from_be_bytes(self.bytes()?))),
            Marker::I64 => Value::Int(i64::from_be_bytes(self.bytes()?)),
            Marker::F32 => Value::Float(f64::from(f32::from_be_bytes(self.bytes()?))),
            Marker::F64 => Value::Float(f64::from_be_bytes(self.bytes()?)),
            Marker::FixStr(len) => self.string(usize::from(len), offset)?,
            Marker::Str8 => {
                let len = usize::from(self.u8()?);
                self.string(len, offset)?
            }
            Marker::Str16 => {
                let len = self.u16()?;
                self.string(len, offset)?
            }
            Marker::Str32 => {
                let len = self.u32()?;
                self.string(len, offset)?
            }
            Marker::Bin8 => {
                let len = usize::from(self.u8()?);
                Value::Binary(self.take(len)?.to_vec())
            }
            Marker::Bin16 => {
                let len = self.u16()?;
                Value::Binary(self.take(len)?.to_vec())
            }
            Marker::Bin32 => {
                let len = self.u32()?;
                Value::Binary(self.take(len)?.to_vec())
            }
            Marker::FixArray(len) => self.array(usize::from(len), depth)?,
            Marker::Array16 => {
                let len = self.u16()?;
                self.array(len, depth)?
            }
            Marker::Array32 => {
                let len = self.u32()?;
                self.array(len, depth)?
            }
            Marker::FixMap(len) => self.map(usize::from(len), depth)?,
            Marker::Map16 => {
                let len = self.u16()?;
                self.map(len, depth)?
            }
            Marker::Map32 => {
                let len = self.u32()?;
                self.map(len, depth)?
            }
            Marker::FixExt1 => self.skip_ext(1)?,
            Marker::FixExt2 => self.skip_ext(2)?,
            Marker::FixExt4 => self.skip_ext(4)?,
            Marker::FixExt8 => self.skip_ext(8)?,
            Marker::FixExt16 => self.skip_ext(16)?,
            Marker::Ext8 => {
                let len = usize::from(self.u8()?);
                self.skip_ext(len)?
            }
            Marker::Ext16 => {
                let len = self.u16()?;
                self.skip_ext(len)?
            }
            Marker::Ext32 => {
                let len = self.u32()?;
                self.skip_ext(len)?
            }
            Marker::Reserved => return Err(CodecError::InvalidMarker { marker: byte, offset }),
            #[allow(unreachable_patterns)]
            _ => return Err(CodecError::InvalidMarker { marker: byte, offset }),
        };
        Ok(value)
    }

    fn string(&mut self, len: usize, offset: usize) -> Result<Value> {
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(|s| Value::String(s.to_string()))
            .map_err(|_| CodecError::InvalidUtf8(offset))
    }

    // Extension type byte plus payload.
    fn skip_ext(&mut self, len: usize) -> Result<Value> {
        self.take(1 + len)?;
        Ok(Value::Null)
    }

    fn array(&mut self, len: usize, depth: usize) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.value(depth + 1)?);
        }

        if let [Value::String(key), tag, text] = items.as_slice() {
            if key == MARKER_KEY {
                return Ok(read_marker(tag, text));
            }
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, len: usize, depth: usize) -> Result<Value> {
        if depth >= MAX_DEPTH {
            return Err(CodecError::TooDeep(MAX_DEPTH));
        }
        let mut map = Map::new();
        for _ in 0..len {
            let offset = self.pos;
            let key = match self.value(depth + 1)? {
                Value::String(key) => key,
                _ => return Err(CodecError::NonStringKey(offset)),
            };
            let value = self.value(depth + 1)?;
            map.insert(key, value);
        }
        Ok(Value::Map(map))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::value::Decimal;

    #[test]
    fn nested_document_round_trips() {
        let price: Decimal = "1234.5678".parse().unwrap();
        let value = Value::from_iter([
            (
                "nested",
                Value::from_iter([
                    ("price", Value::Decimal(price)),
                    ("day", Value::Date(parse_date("2017-01-27").unwrap())),
                    (
                        "at",
                        Value::DateTime(parse_datetime("2017-01-27T20:12:08.952811+00:00").unwrap()),
                    ),
                    ("greeting", Value::from("こんにちは, ñandú")),
                ]),
            ),
            ("blob", Value::Binary(vec![0, 1, 2, 255])),
            ("list", Value::Array(vec![Value::Int(-1), Value::Float(2.5), Value::Null])),
            ("big", Value::Int(i64::MAX)),
            ("flag", Value::Bool(false)),
        ]);

        let bytes = pack(&value).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), value);
    }

    #[test]
    fn document_round_trips() {
        let mut doc = PathDocument::with_names(FieldNames::compact());
        doc.set("meta/id", "abc").unwrap();
        let bytes = pack_document(&doc).unwrap();

        let decoded = unpack_document(&bytes, Some(FieldNames::compact())).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.get("meta/id"), Some(&Value::from("abc")));
    }

    #[test]
    fn marker_uses_three_element_array() {
        let bytes = pack(&Value::Decimal("1.5".parse().unwrap())).unwrap();
        let mut expected = vec![0x93, 0xa4];
        expected.extend_from_slice(b"type");
        expected.push(0xa7);
        expected.extend_from_slice(b"decimal");
        expected.push(0xa3);
        expected.extend_from_slice(b"1.5");
        assert_eq!(bytes, expected);
    }

    #[rstest]
    #[case(vec!["type", "money", "1.5"])]
    #[case(vec!["type", "decimal", "one"])]
    #[case(vec!["type", "date", "27/01/2017"])]
    fn unknown_or_malformed_markers_decode_to_null(#[case] parts: Vec<&str>) {
        let value = Value::Array(parts.into_iter().map(Value::from).collect());
        let bytes = pack(&value).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), Value::Null);
    }

    #[test]
    fn non_string_marker_tag_decodes_to_null() {
        let value = Value::Array(vec![Value::from("type"), Value::Int(1), Value::from("x")]);
        assert_eq!(unpack(&pack(&value).unwrap()).unwrap(), Value::Null);
    }

    #[test]
    fn ordinary_arrays_are_kept() {
        let value = Value::Array(vec![Value::from("kind"), Value::from("decimal"), Value::from("1")]);
        assert_eq!(unpack(&pack(&value).unwrap()).unwrap(), value);
    }

    #[test]
    fn ext_types_decode_to_null() {
        assert_eq!(unpack(&[0xd4, 0x01, 0x00]).unwrap(), Value::Null);
        assert_eq!(unpack(&[0xc7, 0x02, 0x05, 0xaa, 0xbb]).unwrap(), Value::Null);
    }

    #[rstest]
    #[case(&[], CodecError::UnexpectedEof(0))]
    #[case(&[0x92, 0x01], CodecError::UnexpectedEof(2))]
    #[case(&[0xc0, 0xc0], CodecError::TrailingBytes(1))]
    #[case(&[0xc1], CodecError::InvalidMarker { marker: 0xc1, offset: 0 })]
    #[case(&[0x81, 0x01, 0x02], CodecError::NonStringKey(1))]
    #[case(&[0xa2, 0xff, 0xfe], CodecError::InvalidUtf8(0))]
    #[case(&[0xcf, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff], CodecError::IntegerOverflow(0))]
    fn malformed_input_is_a_typed_error(#[case] bytes: &[u8], #[case] expected: CodecError) {
        assert_eq!(unpack(bytes).unwrap_err(), expected);
    }

    #[test]
    fn unsigned_within_range_decodes() {
        let bytes = [0xcf, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00];
        assert_eq!(unpack(&bytes).unwrap(), Value::Int(256));
    }

    #[test]
    fn nesting_limit() {
        let mut bytes = vec![0x91; MAX_DEPTH + 1];
        bytes.push(0xc0);
        assert_eq!(unpack(&bytes).unwrap_err(), CodecError::TooDeep(MAX_DEPTH));

        let mut deep = Value::Null;
        for _ in 0..=MAX_DEPTH {
            deep = Value::Array(vec![deep]);
        }
        assert_eq!(pack(&deep).unwrap_err(), CodecError::TooDeep(MAX_DEPTH));
    }

    #[test]
    fn deepest_accepted_nesting_fits_a_default_stack() {
        let worker = std::thread::spawn(|| {
            let mut bytes = vec![0x91; MAX_DEPTH];
            bytes.push(0xc0);
            let value = unpack(&bytes).expect("nesting at the limit should decode");
            let packed = pack(&value).expect("nesting at the limit should encode");
            assert_eq!(packed, bytes);

            let mut hostile = vec![0x81, 0xa1, b'k'];
            hostile.extend(std::iter::repeat(0x91).take(MAX_DEPTH * 4));
            hostile.push(0xc0);
            unpack(&hostile)
        });
        let err = worker
            .join()
            .expect("decoding should not overflow the stack")
            .expect_err("nesting past the limit should fail");
        assert_eq!(err, CodecError::TooDeep(MAX_DEPTH));
    }

    #[test]
    fn document_root_must_be_a_map() {
        let bytes = pack(&Value::Int(1)).unwrap();
        assert_eq!(
            unpack_document(&bytes, None).unwrap_err(),
            CodecError::NotADocument("integer")
        );
    }
}
