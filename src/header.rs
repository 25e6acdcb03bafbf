//! This module defines `HeaderValues`, the decoded contents of a main
//! header or subheader, along with the functions which read and write
//! header blocks through a [`HeaderSchema`].
//!
//! Values are kept in schema order, keyed by field name. Accessors for
//! the fields that the codec itself depends on are provided; any other
//! field is reachable through [`HeaderValues::get`].
//!
//! [`HeaderSchema`]: ../schema/struct.HeaderSchema.html
//! [`HeaderValues::get`]: ./struct.HeaderValues.html#method.get

use crate::error::{EcatError, Result};
use crate::field::{decode_field, encode_field, FieldAnomaly, FieldValue};
use crate::schema::HeaderSchema;
use crate::typedef::{DataType, FileType};
use crate::util::BlockCursor;
use indexmap::IndexMap;
use num_traits::FromPrimitive;
use serde::Serialize;
use std::convert::TryFrom;
use std::io::{Read, Seek, Write};
use std::iter::FromIterator;
use tracing::warn;

/// Main header: magic number, such as `MATRIX72v`.
pub const MAGIC_NUMBER: &str = "MAGIC_NUMBER";
/// Main header: self-reported software (format) version.
pub const SW_VERSION: &str = "SW_VERSION";
/// Main header: kind of matrix stored, which selects the subheader type.
pub const FILE_TYPE: &str = "FILE_TYPE";
/// Main header: number of frames.
pub const NUM_FRAMES: &str = "NUM_FRAMES";
/// Main header: global calibration factor.
pub const ECAT_CALIBRATION_FACTOR: &str = "ECAT_CALIBRATION_FACTOR";
/// Subheader: pixel data type code.
pub const DATA_TYPE: &str = "DATA_TYPE";
/// Subheader: number of dimensions.
pub const NUM_DIMENSIONS: &str = "NUM_DIMENSIONS";
/// Subheader: number of pixels along the first axis.
pub const X_DIMENSION: &str = "X_DIMENSION";
/// Subheader: number of pixels along the second axis.
pub const Y_DIMENSION: &str = "Y_DIMENSION";
/// Subheader: number of pixels along the third axis.
pub const Z_DIMENSION: &str = "Z_DIMENSION";
/// Subheader: pixel size along the first axis, in centimeters.
pub const X_PIXEL_SIZE: &str = "X_PIXEL_SIZE";
/// Subheader: pixel size along the second axis, in centimeters.
pub const Y_PIXEL_SIZE: &str = "Y_PIXEL_SIZE";
/// Subheader: pixel size along the third axis, in centimeters.
pub const Z_PIXEL_SIZE: &str = "Z_PIXEL_SIZE";
/// Subheader: per-frame scale factor.
pub const SCALE_FACTOR: &str = "SCALE_FACTOR";
/// Subheader: frame start time, in milliseconds.
pub const FRAME_START_TIME: &str = "FRAME_START_TIME";
/// Subheader: frame duration, in milliseconds.
pub const FRAME_DURATION: &str = "FRAME_DURATION";

/// The decoded fields of one header block, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HeaderValues {
    fields: IndexMap<String, FieldValue>,
}

impl HeaderValues {
    /// Create an empty set of header values.
    pub fn new() -> Self {
        HeaderValues::default()
    }

    /// Retrieve a field's value.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Retrieve a mutable reference to a field's value.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    /// Set a field's value, returning the previous one. New fields are
    /// appended; existing fields keep their position.
    pub fn set<N, V>(&mut self, name: N, value: V) -> Option<FieldValue>
    where
        N: Into<String>,
        V: Into<FieldValue>,
    {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning its value. Writing a header without a
    /// field fills it with zero bytes.
    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.shift_remove(name)
    }

    /// Whether the field is present.
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Number of fields present.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field is present.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over the fields, in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn require(&self, name: &str) -> Result<&FieldValue> {
        self.get(name)
            .ok_or_else(|| EcatError::MissingField(name.to_string()))
    }

    /// Retrieve an integer field.
    pub fn get_int(&self, name: &str) -> Result<i32> {
        self.require(name)?
            .as_int()
            .ok_or_else(|| EcatError::FieldTypeMismatch(name.to_string()))
    }

    /// Retrieve a numeric field as a float.
    pub fn get_float(&self, name: &str) -> Result<f32> {
        self.require(name)?
            .as_float()
            .ok_or_else(|| EcatError::FieldTypeMismatch(name.to_string()))
    }

    /// Retrieve a string field.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.require(name)?
            .as_str()
            .ok_or_else(|| EcatError::FieldTypeMismatch(name.to_string()))
    }

    fn get_i16(&self, name: &str) -> Result<i16> {
        let v = self.get_int(name)?;
        i16::try_from(v).map_err(|_| EcatError::FieldOutOfRange(name.to_string(), v.into()))
    }

    /// The main header's self-reported format version.
    pub fn sw_version(&self) -> Result<i16> {
        self.get_i16(SW_VERSION)
    }

    /// The main header's raw `FILE_TYPE` code.
    pub fn file_type_code(&self) -> Result<i16> {
        self.get_i16(FILE_TYPE)
    }

    /// The main header's `FILE_TYPE`, if it is a known code.
    pub fn file_type(&self) -> Result<Option<FileType>> {
        Ok(FileType::from_i16(self.file_type_code()?))
    }

    /// The main header's declared number of frames.
    pub fn num_frames(&self) -> Result<usize> {
        let v = self.get_int(NUM_FRAMES)?;
        usize::try_from(v).map_err(|_| EcatError::FieldOutOfRange(NUM_FRAMES.to_string(), v.into()))
    }

    /// The main header's global calibration factor.
    pub fn calibration_factor(&self) -> Result<f32> {
        self.get_float(ECAT_CALIBRATION_FACTOR)
    }

    /// The subheader's raw pixel `DATA_TYPE` code.
    pub fn data_type_code(&self) -> Result<i16> {
        self.get_i16(DATA_TYPE)
    }

    /// The subheader's pixel data type, if it is a known code.
    pub fn data_type(&self) -> Result<Option<DataType>> {
        Ok(DataType::from_i16(self.data_type_code()?))
    }

    /// The subheader's frame shape as `[x, y, z]` pixel counts.
    ///
    /// # Errors
    ///
    /// - `EcatError::InvalidDimensions` if any dimension is not positive.
    pub fn dimensions(&self) -> Result<[usize; 3]> {
        let x = self.get_int(X_DIMENSION)?;
        let y = self.get_int(Y_DIMENSION)?;
        let z = self.get_int(Z_DIMENSION)?;
        if x < 1 || y < 1 || z < 1 {
            return Err(EcatError::InvalidDimensions(vec![x.into(), y.into(), z.into()]));
        }
        Ok([x as usize, y as usize, z as usize])
    }

    /// The subheader's pixel size as `[x, y, z]`, in centimeters.
    pub fn pixel_size(&self) -> Result<[f32; 3]> {
        Ok([
            self.get_float(X_PIXEL_SIZE)?,
            self.get_float(Y_PIXEL_SIZE)?,
            self.get_float(Z_PIXEL_SIZE)?,
        ])
    }

    /// The subheader's per-frame scale factor.
    pub fn scale_factor(&self) -> Result<f32> {
        self.get_float(SCALE_FACTOR)
    }

    /// The subheader's frame start time, in milliseconds.
    pub fn frame_start_time(&self) -> Result<i32> {
        self.get_int(FRAME_START_TIME)
    }

    /// The subheader's frame duration, in milliseconds.
    pub fn frame_duration(&self) -> Result<i32> {
        self.get_int(FRAME_DURATION)
    }
}

impl FromIterator<(String, FieldValue)> for HeaderValues {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        HeaderValues {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for HeaderValues {
    type Item = (String, FieldValue);
    type IntoIter = indexmap::map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// The outcome of reading one header block.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderRead {
    /// The decoded values, in schema order
    pub values: HeaderValues,
    /// Byte offset right after the header block
    pub end_offset: u64,
    /// String fields which had to be recovered
    pub anomalies: Vec<FieldAnomaly>,
}

/// Decode every field of `schema` from an in-memory header block.
/// Anomalies are logged and returned next to the values.
pub fn decode_header(block: &[u8], schema: &HeaderSchema) -> Result<(HeaderValues, Vec<FieldAnomaly>)> {
    let mut values = HeaderValues::new();
    let mut anomalies = Vec::new();
    for descriptor in schema.fields() {
        let decoded = decode_field(block, descriptor)?;
        if let Some(anomaly) = decoded.anomaly {
            warn!(
                field = %anomaly.field,
                version = schema.version(),
                kind = %schema.kind(),
                "{}",
                anomaly
            );
            anomalies.push(anomaly);
        }
        let _ = values.set(descriptor.name.clone(), decoded.value);
    }
    Ok((values, anomalies))
}

/// Read a header block laid out by `schema`, starting at the given
/// absolute byte offset.
///
/// # Errors
///
/// - `EcatError::Io` if the source ends before the header does.
pub fn read_header<S>(source: &mut S, schema: &HeaderSchema, offset: u64) -> Result<HeaderRead>
where
    S: Read + Seek,
{
    let mut cursor = BlockCursor::new(source);
    cursor.seek_to(offset)?;
    let block = cursor.read_bytes(schema.size())?;
    let (values, anomalies) = decode_header(&block, schema)?;
    Ok(HeaderRead {
        values,
        end_offset: cursor.position(),
        anomalies,
    })
}

/// Encode `values` into a header block laid out by `schema`. Fields
/// absent from `values` are filled with zero bytes, and values for
/// fields outside of the schema are ignored, so the block is always
/// exactly the schema's size.
pub fn encode_header(values: &HeaderValues, schema: &HeaderSchema) -> Result<Vec<u8>> {
    let mut block = Vec::with_capacity(schema.size());
    for descriptor in schema.fields() {
        encode_field(&mut block, values.get(&descriptor.name), descriptor)?;
    }
    debug_assert_eq!(block.len(), schema.size());
    Ok(block)
}

/// Write `values` as a header block laid out by `schema`, starting at
/// the given absolute byte offset.
pub fn write_header<W>(
    dest: &mut W,
    schema: &HeaderSchema,
    values: &HeaderValues,
    offset: u64,
) -> Result<()>
where
    W: Write + Seek,
{
    let block = encode_header(values, schema)?;
    let mut cursor = BlockCursor::new(dest);
    cursor.seek_to(offset)?;
    cursor.write_bytes(&block)?;
    Ok(())
}
