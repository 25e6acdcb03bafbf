//! Decoding and encoding of single header fields.
//!
//! All numeric fields are big endian. Strings are fixed-width and padded
//! with zero bytes; zero bytes are dropped wherever they appear when
//! decoding. A string which is not valid UTF-8 is still decoded, with
//! invalid sequences dropped, and reported as a [`FieldAnomaly`] next to
//! the value instead of failing the header.
//!
//! [`FieldAnomaly`]: ./struct.FieldAnomaly.html

use crate::error::{EcatError, Result};
use crate::schema::{Encoding, FieldDescriptor};
use byteordered::ByteOrdered;
use serde::Serialize;
use std::convert::TryFrom;
use std::fmt;
use std::io::{Error as IOError, ErrorKind as IoErrorKind, Write};

/// A decoded header value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// A character string
    Str(String),
    /// A single integer
    Int(i32),
    /// A fixed-length list of integers
    Ints(Vec<i32>),
    /// A single float
    Float(f32),
    /// A fixed-length list of floats
    Floats(Vec<f32>),
}

impl FieldValue {
    /// Retrieve this value as an integer, if it is one.
    pub fn as_int(&self) -> Option<i32> {
        match *self {
            FieldValue::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Retrieve this value as a float. Integers are converted.
    pub fn as_float(&self) -> Option<f32> {
        match *self {
            FieldValue::Float(v) => Some(v),
            FieldValue::Int(v) => Some(v as f32),
            _ => None,
        }
    }

    /// Retrieve this value as a string slice, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl<'a> From<&'a str> for FieldValue {
    fn from(v: &'a str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i16> for FieldValue {
    fn from(v: i16) -> Self {
        FieldValue::Int(v.into())
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(v)
    }
}

impl From<Vec<i32>> for FieldValue {
    fn from(v: Vec<i32>) -> Self {
        FieldValue::Ints(v)
    }
}

impl From<Vec<f32>> for FieldValue {
    fn from(v: Vec<f32>) -> Self {
        FieldValue::Floats(v)
    }
}

/// A string field whose bytes were not valid UTF-8. The field was still
/// decoded, with invalid sequences dropped, so the recovered value always
/// fits back into the field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldAnomaly {
    /// Name of the affected field
    pub field: String,
    /// The field's bytes, with zero bytes removed
    pub raw: Vec<u8>,
    /// The value which was recovered from the bytes
    pub recovered: String,
}

impl fmt::Display for FieldAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "field `{}` is not valid UTF-8 ({} bytes), decoded as {:?}",
            self.field,
            self.raw.len(),
            self.recovered
        )
    }
}

/// The outcome of decoding one field: the value, plus an anomaly if the
/// value had to be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The decoded value
    pub value: FieldValue,
    /// Set if the value is a best-effort recovery
    pub anomaly: Option<FieldAnomaly>,
}

impl Decoded {
    fn clean(value: FieldValue) -> Self {
        Decoded {
            value,
            anomaly: None,
        }
    }
}

/// Decode the field described by `descriptor` from a header block.
/// `block` must start at the beginning of the header; the descriptor's
/// offset is relative to it.
///
/// # Errors
///
/// - `EcatError::Io` with `UnexpectedEof` if the field ends past the
/// end of `block`.
pub fn decode_field(block: &[u8], descriptor: &FieldDescriptor) -> Result<Decoded> {
    let bytes = block.get(descriptor.offset..descriptor.end()).ok_or_else(|| {
        IOError::new(
            IoErrorKind::UnexpectedEof,
            format!(
                "field `{}` ends at byte {} past the {}-byte header",
                descriptor.name,
                descriptor.end(),
                block.len()
            ),
        )
    })?;
    let mut src = ByteOrdered::be(bytes);

    match descriptor.encoding {
        Encoding::FixedString(_) => Ok(decode_string(bytes, &descriptor.name)),
        Encoding::Int8(n) => {
            let values = (0..n)
                .map(|_| src.read_i8().map(i32::from))
                .collect::<::std::io::Result<Vec<_>>>()?;
            Ok(Decoded::clean(collapse_ints(values)))
        }
        Encoding::Int16(n) => {
            let values = (0..n)
                .map(|_| src.read_i16().map(i32::from))
                .collect::<::std::io::Result<Vec<_>>>()?;
            Ok(Decoded::clean(collapse_ints(values)))
        }
        Encoding::Int32(n) => {
            let values = (0..n)
                .map(|_| src.read_i32())
                .collect::<::std::io::Result<Vec<_>>>()?;
            Ok(Decoded::clean(collapse_ints(values)))
        }
        Encoding::Float32(n) => {
            let values = (0..n)
                .map(|_| src.read_f32())
                .collect::<::std::io::Result<Vec<_>>>()?;
            if values.len() == 1 {
                Ok(Decoded::clean(FieldValue::Float(values[0])))
            } else {
                Ok(Decoded::clean(FieldValue::Floats(values)))
            }
        }
    }
}

fn collapse_ints(values: Vec<i32>) -> FieldValue {
    if values.len() == 1 {
        FieldValue::Int(values[0])
    } else {
        FieldValue::Ints(values)
    }
}

fn decode_string(bytes: &[u8], name: &str) -> Decoded {
    let raw: Vec<u8> = bytes.iter().cloned().filter(|b| *b != 0).collect();
    match String::from_utf8(raw) {
        Ok(s) => Decoded::clean(FieldValue::Str(s)),
        Err(e) => {
            let raw = e.into_bytes();
            let recovered = drop_invalid_utf8(&raw);
            Decoded {
                value: FieldValue::Str(recovered.clone()),
                anomaly: Some(FieldAnomaly {
                    field: name.to_string(),
                    raw,
                    recovered,
                }),
            }
        }
    }
}

/// Keep the valid UTF-8 sequences of `bytes`, dropping the rest. The
/// result is never longer than the input.
fn drop_invalid_utf8(mut bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    loop {
        match std::str::from_utf8(bytes) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let (valid, rest) = bytes.split_at(e.valid_up_to());
                out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                let skip = e.error_len().unwrap_or(rest.len());
                bytes = &rest[skip..];
            }
        }
    }
}

/// Encode a field into the given destination, writing exactly the width
/// of the field. A missing value is written as zero bytes.
///
/// # Errors
///
/// - `EcatError::FieldTooWide` if a string does not fit in the field.
/// - `EcatError::FieldTypeMismatch` if the value's kind does not match
/// the encoding.
/// - `EcatError::FieldCountMismatch` if a list has the wrong length.
/// - `EcatError::FieldOutOfRange` if an integer does not fit in the
/// field's width.
pub fn encode_field<W: Write>(
    mut dest: W,
    value: Option<&FieldValue>,
    descriptor: &FieldDescriptor,
) -> Result<()> {
    let value = match value {
        Some(v) => v,
        None => {
            dest.write_all(&vec![0u8; descriptor.encoding.width()])?;
            return Ok(());
        }
    };
    let name = &descriptor.name;

    match descriptor.encoding {
        Encoding::FixedString(width) => {
            let s = value
                .as_str()
                .ok_or_else(|| EcatError::FieldTypeMismatch(name.clone()))?;
            let bytes = s.as_bytes();
            if bytes.len() > width {
                return Err(EcatError::FieldTooWide(name.clone(), width, bytes.len()));
            }
            dest.write_all(bytes)?;
            dest.write_all(&vec![0u8; width - bytes.len()])?;
        }
        Encoding::Int8(n) => {
            let mut out = ByteOrdered::be(&mut dest);
            for v in int_values(value, n, name)? {
                let v = i8::try_from(v)
                    .map_err(|_| EcatError::FieldOutOfRange(name.clone(), v.into()))?;
                out.write_i8(v)?;
            }
        }
        Encoding::Int16(n) => {
            let mut out = ByteOrdered::be(&mut dest);
            for v in int_values(value, n, name)? {
                let v = i16::try_from(v)
                    .map_err(|_| EcatError::FieldOutOfRange(name.clone(), v.into()))?;
                out.write_i16(v)?;
            }
        }
        Encoding::Int32(n) => {
            let mut out = ByteOrdered::be(&mut dest);
            for v in int_values(value, n, name)? {
                out.write_i32(v)?;
            }
        }
        Encoding::Float32(n) => {
            let mut out = ByteOrdered::be(&mut dest);
            for v in float_values(value, n, name)? {
                out.write_f32(v)?;
            }
        }
    }
    Ok(())
}

fn int_values(value: &FieldValue, count: usize, name: &str) -> Result<Vec<i32>> {
    let values = match value {
        FieldValue::Int(v) if count == 1 => vec![*v],
        FieldValue::Ints(v) => v.clone(),
        _ => return Err(EcatError::FieldTypeMismatch(name.to_string())),
    };
    check_count(values, count, name)
}

fn float_values(value: &FieldValue, count: usize, name: &str) -> Result<Vec<f32>> {
    let values = match value {
        FieldValue::Float(v) if count == 1 => vec![*v],
        FieldValue::Int(v) if count == 1 => vec![*v as f32],
        FieldValue::Floats(v) => v.clone(),
        FieldValue::Ints(v) => v.iter().map(|x| *x as f32).collect(),
        _ => return Err(EcatError::FieldTypeMismatch(name.to_string())),
    };
    check_count(values, count, name)
}

fn check_count<T>(values: Vec<T>, count: usize, name: &str) -> Result<Vec<T>> {
    if values.len() != count {
        return Err(EcatError::FieldCountMismatch(
            name.to_string(),
            count,
            values.len(),
        ));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode(value: Option<&FieldValue>, descriptor: &FieldDescriptor) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        encode_field(&mut out, value, descriptor)?;
        Ok(out)
    }

    #[test]
    fn decode_big_endian_numbers() {
        let block = [0x00, 0x49, 0xFF, 0xFE, 0x3F, 0x80, 0x00, 0x00, 0x80];
        let version = FieldDescriptor::new(0, "SW_VERSION", Encoding::Int16(1));
        assert_eq!(decode_field(&block, &version).unwrap().value, FieldValue::Int(73));

        let pair = FieldDescriptor::new(0, "PAIR", Encoding::Int16(2));
        assert_eq!(
            decode_field(&block, &pair).unwrap().value,
            FieldValue::Ints(vec![73, -2])
        );

        let long = FieldDescriptor::new(0, "LONG", Encoding::Int32(1));
        assert_eq!(
            decode_field(&block, &long).unwrap().value,
            FieldValue::Int(0x0049_FFFE)
        );

        let one = FieldDescriptor::new(4, "ONE", Encoding::Float32(1));
        assert_eq!(decode_field(&block, &one).unwrap().value, FieldValue::Float(1.0));

        let byte = FieldDescriptor::new(8, "BYTE", Encoding::Int8(1));
        assert_eq!(decode_field(&block, &byte).unwrap().value, FieldValue::Int(-128));
    }

    #[test]
    fn decode_past_end_is_an_error() {
        let block = [0u8; 4];
        let field = FieldDescriptor::new(2, "F", Encoding::Float32(1));
        match decode_field(&block, &field) {
            Err(EcatError::Io(ref e)) => assert_eq!(e.kind(), IoErrorKind::UnexpectedEof),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn decode_strings_drops_zero_bytes() {
        let block = b"MATRIX\0\0\x0072\0\0";
        let field = FieldDescriptor::new(0, "MAGIC_NUMBER", Encoding::FixedString(13));
        let decoded = decode_field(block, &field).unwrap();
        assert_eq!(decoded.value, FieldValue::Str("MATRIX72".to_string()));
        assert_eq!(decoded.anomaly, None);

        let empty = [0u8; 8];
        let field = FieldDescriptor::new(0, "EMPTY", Encoding::FixedString(8));
        assert_eq!(
            decode_field(&empty, &field).unwrap().value,
            FieldValue::Str(String::new())
        );
    }

    #[test]
    fn decode_invalid_utf8_is_recovered() {
        let block = [b'A', 0xFF, b'B', 0x00];
        let field = FieldDescriptor::new(0, "PATIENT_NAME", Encoding::FixedString(4));
        let decoded = decode_field(&block, &field).unwrap();
        assert_eq!(decoded.value, FieldValue::Str("AB".to_string()));
        let anomaly = decoded.anomaly.unwrap();
        assert_eq!(anomaly.field, "PATIENT_NAME");
        assert_eq!(anomaly.raw, vec![b'A', 0xFF, b'B']);
        assert_eq!(anomaly.recovered, "AB");
    }

    #[test]
    fn recovered_strings_fit_their_field() {
        // a lone byte, a truncated sequence and a valid two-byte sequence
        let block = [0xFF, 0xC3, b'x', 0xC3, 0xA9, 0xE2, 0x82];
        let field = FieldDescriptor::new(0, "PATIENT_SEX", Encoding::FixedString(1));
        let decoded = decode_field(&block, &field).unwrap();
        assert_eq!(decoded.value, FieldValue::Str(String::new()));
        assert!(decoded.anomaly.is_some());
        assert_eq!(encode(Some(&decoded.value), &field).unwrap(), vec![0]);

        let field = FieldDescriptor::new(0, "ANNOTATION", Encoding::FixedString(7));
        let decoded = decode_field(&block, &field).unwrap();
        assert_eq!(decoded.value, FieldValue::Str("x\u{e9}".to_string()));
        let bytes = encode(Some(&decoded.value), &field).unwrap();
        assert_eq!(bytes, vec![b'x', 0xC3, 0xA9, 0, 0, 0, 0]);
    }

    #[test]
    fn encode_pads_strings() {
        let field = FieldDescriptor::new(0, "ISOTOPE_NAME", Encoding::FixedString(8));
        let bytes = encode(Some(&"F-18".into()), &field).unwrap();
        assert_eq!(bytes, b"F-18\0\0\0\0".to_vec());

        let too_wide = encode(Some(&"Fluorine-18".into()), &field);
        assert!(matches!(too_wide, Err(EcatError::FieldTooWide(_, 8, 11))));
    }

    #[test]
    fn encode_missing_value_keeps_width() {
        let field = FieldDescriptor::new(0, "FILL", Encoding::Int16(6));
        assert_eq!(encode(None, &field).unwrap(), vec![0u8; 12]);
        let field = FieldDescriptor::new(0, "NAME", Encoding::FixedString(32));
        assert_eq!(encode(None, &field).unwrap(), vec![0u8; 32]);
    }

    #[test]
    fn encode_numbers() {
        let field = FieldDescriptor::new(0, "SW_VERSION", Encoding::Int16(1));
        assert_eq!(encode(Some(&FieldValue::Int(73)), &field).unwrap(), vec![0, 73]);
        assert!(matches!(
            encode(Some(&FieldValue::Int(40_000)), &field),
            Err(EcatError::FieldOutOfRange(_, 40_000))
        ));
        assert!(matches!(
            encode(Some(&FieldValue::Float(1.)), &field),
            Err(EcatError::FieldTypeMismatch(_))
        ));

        let field = FieldDescriptor::new(0, "FACTOR", Encoding::Float32(1));
        assert_eq!(
            encode(Some(&FieldValue::Float(1.)), &field).unwrap(),
            vec![0x3F, 0x80, 0, 0]
        );
        assert_eq!(
            encode(Some(&FieldValue::Int(1)), &field).unwrap(),
            vec![0x3F, 0x80, 0, 0]
        );

        let field = FieldDescriptor::new(0, "BED_POSITION", Encoding::Float32(3));
        assert!(matches!(
            encode(Some(&FieldValue::Floats(vec![1., 2.])), &field),
            Err(EcatError::FieldCountMismatch(_, 3, 2))
        ));
    }

    #[test]
    fn lists_are_packed_in_order() {
        let field = FieldDescriptor::new(0, "FILL", Encoding::Int16(3));
        let value = FieldValue::Ints(vec![1, -1, 256]);
        let bytes = encode(Some(&value), &field).unwrap();
        assert_eq!(bytes, vec![0, 1, 0xFF, 0xFF, 1, 0]);
        assert_eq!(decode_field(&bytes, &field).unwrap().value, value);
    }
}
