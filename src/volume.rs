//! This module defines the pixel plane codec, which decodes the pixel
//! data of each frame into an `ndarray` array, and the 4-D voxel buffer
//! that frames are accumulated into.
//!
//! #### Note on memory order
//!
//! Pixel data is stored in column major order (the first axis varies
//! fastest). Decoded arrays keep that memory order, so converting them
//! back to bytes is a plain traversal of the transposed view.

use crate::error::{EcatError, Result};
use crate::typedef::DataType;
use crate::util::BlockCursor;
use byteordered::ByteOrdered;
use ndarray::{Array, Array3, Array4, ArrayView3, Axis, ShapeBuilder};
use num_traits::{AsPrimitive, FromPrimitive};
use std::io::{Read, Seek, Write};
use std::mem::size_of;
use std::ops::Range;
use tracing::debug;

/// Trait type for characterizing a pixel element, implemented for the
/// primitive types which pixel data type codes map to.
pub trait PixelElement: 'static + Sized + Copy + AsPrimitive<f32> {
    /// The pixel `DATA_TYPE` mapped to this type
    const DATA_TYPE: DataType;

    /// Read a single big endian element from the given byte source.
    fn read_be<R: Read>(src: R) -> Result<Self>;

    /// Write a single element in big endian to the given destination.
    fn write_be<W: Write>(self, dest: W) -> Result<()>;

    /// Transform the given byte vector into a vector of elements. Trailing
    /// bytes which do not make up a whole element are ignored.
    fn from_raw_vec(vec: Vec<u8>) -> Result<Vec<Self>> {
        let n = vec.len() / size_of::<Self>();
        let mut cursor: &[u8] = &vec;
        (0..n).map(|_| Self::read_be(&mut cursor)).collect()
    }
}

impl PixelElement for u16 {
    const DATA_TYPE: DataType = DataType::SunI2;

    fn read_be<R: Read>(src: R) -> Result<Self> {
        ByteOrdered::be(src).read_u16().map_err(From::from)
    }

    fn write_be<W: Write>(self, dest: W) -> Result<()> {
        ByteOrdered::be(dest).write_u16(self).map_err(From::from)
    }
}

impl PixelElement for f32 {
    const DATA_TYPE: DataType = DataType::IeeeR4;

    fn read_be<R: Read>(src: R) -> Result<Self> {
        ByteOrdered::be(src).read_f32().map_err(From::from)
    }

    fn write_be<W: Write>(self, dest: W) -> Result<()> {
        ByteOrdered::be(dest).write_f32(self).map_err(From::from)
    }
}

/// The decoded pixels of one frame, in column major order.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePixels {
    /// 16-bit integer pixels (`DATA_TYPE` 6)
    U16(Array3<u16>),
    /// 32-bit float pixels (`DATA_TYPE` 5)
    F32(Array3<f32>),
}

impl FramePixels {
    /// The pixel data type of this frame.
    pub fn data_type(&self) -> DataType {
        match self {
            FramePixels::U16(_) => u16::DATA_TYPE,
            FramePixels::F32(_) => f32::DATA_TYPE,
        }
    }

    /// The frame shape as `[x, y, z]`.
    pub fn dim(&self) -> [usize; 3] {
        let (x, y, z) = match self {
            FramePixels::U16(a) => a.dim(),
            FramePixels::F32(a) => a.dim(),
        };
        [x, y, z]
    }

    /// Convert the pixels to 32-bit floats.
    pub fn to_f32(&self) -> Array3<f32> {
        match self {
            FramePixels::U16(a) => a.mapv(|v| v.as_()),
            FramePixels::F32(a) => a.clone(),
        }
    }

    /// Multiply the pixels by the given factor, converting them to 32-bit
    /// floats.
    pub fn scaled(&self, factor: f32) -> Array3<f32> {
        match self {
            FramePixels::U16(a) => a.mapv(|v| f32::from(v) * factor),
            FramePixels::F32(a) => a.mapv(|v| v * factor),
        }
    }
}

impl From<Array3<u16>> for FramePixels {
    fn from(a: Array3<u16>) -> Self {
        FramePixels::U16(a)
    }
}

impl From<Array3<f32>> for FramePixels {
    fn from(a: Array3<f32>) -> Self {
        FramePixels::F32(a)
    }
}

/// The 4-D voxel buffer of a file, with shape `[x, y, z, frames]` in
/// column major order. All frames share one data type and one shape.
#[derive(Debug, Clone, PartialEq)]
pub enum EcatVolume {
    /// 16-bit integer voxels
    U16(Array4<u16>),
    /// 32-bit float voxels
    F32(Array4<f32>),
}

impl EcatVolume {
    /// Assemble a volume from frames in frame order.
    ///
    /// # Errors
    ///
    /// - `EcatError::NoVolumeData` if there are no frames.
    /// - `EcatError::InconsistentPixelFormat` or
    /// `EcatError::InvalidDimensions` if the frames disagree.
    pub fn from_frames<I>(frames: I) -> Result<Self>
    where
        I: IntoIterator<Item = FramePixels>,
    {
        let mut builder = VolumeBuilder::new();
        for frame in frames {
            builder.push(frame)?;
        }
        builder.finish().ok_or(EcatError::NoVolumeData)
    }

    /// The voxel data type.
    pub fn data_type(&self) -> DataType {
        match self {
            EcatVolume::U16(_) => u16::DATA_TYPE,
            EcatVolume::F32(_) => f32::DATA_TYPE,
        }
    }

    /// The volume shape as `[x, y, z, frames]`.
    pub fn dim(&self) -> [usize; 4] {
        let (x, y, z, t) = match self {
            EcatVolume::U16(a) => a.dim(),
            EcatVolume::F32(a) => a.dim(),
        };
        [x, y, z, t]
    }

    /// The shape of each frame as `[x, y, z]`.
    pub fn frame_dim(&self) -> [usize; 3] {
        let [x, y, z, _] = self.dim();
        [x, y, z]
    }

    /// The number of frames.
    pub fn num_frames(&self) -> usize {
        self.dim()[3]
    }

    /// A copy of the frame at the given 0-based index.
    pub fn frame(&self, index: usize) -> Option<FramePixels> {
        if index >= self.num_frames() {
            return None;
        }
        Some(match self {
            EcatVolume::U16(a) => FramePixels::U16(a.index_axis(Axis(3), index).to_owned()),
            EcatVolume::F32(a) => FramePixels::F32(a.index_axis(Axis(3), index).to_owned()),
        })
    }

    /// Convert the voxels to 32-bit floats.
    pub fn to_f32(&self) -> Array4<f32> {
        match self {
            EcatVolume::U16(a) => a.mapv(|v| v.as_()),
            EcatVolume::F32(a) => a.clone(),
        }
    }
}

impl From<Array4<u16>> for EcatVolume {
    fn from(a: Array4<u16>) -> Self {
        EcatVolume::U16(a)
    }
}

impl From<Array4<f32>> for EcatVolume {
    fn from(a: Array4<f32>) -> Self {
        EcatVolume::F32(a)
    }
}

/// Accumulates frames, in frame order, into an `EcatVolume`. The first
/// frame fixes the data type and shape that every other frame must have.
#[derive(Debug, Default)]
pub struct VolumeBuilder {
    frames: Vec<FramePixels>,
}

impl VolumeBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        VolumeBuilder::default()
    }

    /// Append the next frame.
    pub fn push(&mut self, frame: FramePixels) -> Result<()> {
        if let Some(first) = self.frames.first() {
            if first.data_type() != frame.data_type() {
                return Err(EcatError::InconsistentPixelFormat(
                    first.data_type() as i16,
                    frame.data_type() as i16,
                ));
            }
            if first.dim() != frame.dim() {
                return Err(EcatError::InvalidDimensions(
                    frame.dim().iter().map(|d| *d as i64).collect(),
                ));
            }
        }
        self.frames.push(frame);
        Ok(())
    }

    /// Number of frames pushed so far.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether no frames were pushed.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Build the volume, or `None` if no frames were pushed.
    pub fn finish(self) -> Option<EcatVolume> {
        let [x, y, z] = self.frames.first()?.dim();
        let shape = (x, y, z, self.frames.len()).f();
        Some(match self.frames[0].data_type() {
            DataType::SunI2 => {
                let mut volume = Array4::<u16>::zeros(shape);
                for (i, frame) in self.frames.iter().enumerate() {
                    if let FramePixels::U16(a) = frame {
                        volume.index_axis_mut(Axis(3), i).assign(a);
                    }
                }
                EcatVolume::U16(volume)
            }
            _ => {
                let mut volume = Array4::<f32>::zeros(shape);
                for (i, frame) in self.frames.iter().enumerate() {
                    if let FramePixels::F32(a) = frame {
                        volume.index_axis_mut(Axis(3), i).assign(a);
                    }
                }
                EcatVolume::F32(volume)
            }
        })
    }
}

fn supported_data_type(code: i16) -> Result<DataType> {
    DataType::from_i16(code)
        .filter(|t| t.is_supported())
        .ok_or(EcatError::UnsupportedPixelFormat(code))
}

fn decode_array<T: PixelElement>(bytes: Vec<u8>, dims: [usize; 3]) -> Result<Array3<T>> {
    let values = T::from_raw_vec(bytes)?;
    let [x, y, z] = dims;
    Array::from_shape_vec((x, y, z).f(), values)
        .map_err(|_| EcatError::InvalidDimensions(dims.iter().map(|d| *d as i64).collect()))
}

fn encode_array<T: PixelElement>(array: ArrayView3<T>) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(array.len() * size_of::<T>());
    // the transposed view iterates the first axis fastest
    for v in array.t().iter() {
        v.write_be(&mut out)?;
    }
    Ok(out)
}

/// Read the pixel data of one frame from the given byte range.
///
/// The range covers whole blocks, so it may be longer than the pixel data
/// itself; only the leading `x * y * z` elements are decoded.
///
/// # Errors
///
/// - `EcatError::UnsupportedPixelFormat` if `data_type_code` is neither
/// 5 nor 6.
/// - `EcatError::InvalidDirectory` if the range is too short for the
/// pixel data.
/// - `EcatError::Io` if the source ends before the pixel data does.
pub fn read_frame_pixels<S>(
    source: &mut S,
    range: Range<u64>,
    dims: [usize; 3],
    data_type_code: i16,
) -> Result<FramePixels>
where
    S: Read + Seek,
{
    let data_type = supported_data_type(data_type_code)?;
    let nbytes = dims.iter().product::<usize>() * data_type.size_of();
    let available = range.end.saturating_sub(range.start);
    if nbytes as u64 > available {
        return Err(EcatError::InvalidDirectory(format!(
            "frame pixel data needs {} bytes, but its blocks hold {}",
            nbytes, available
        )));
    }
    debug!(start = range.start, end = range.end, nbytes, "reading frame pixels");

    let mut cursor = BlockCursor::new(source);
    cursor.seek_to(range.start)?;
    let bytes = cursor.read_bytes(nbytes)?;
    Ok(match data_type {
        DataType::SunI2 => FramePixels::U16(decode_array(bytes, dims)?),
        _ => FramePixels::F32(decode_array(bytes, dims)?),
    })
}

/// Write the pixel data of one frame at the given byte position, padded
/// with zeros to the end of its last block. Returns the byte offset right
/// after the padding.
pub fn write_frame_pixels<W>(dest: &mut W, position: u64, pixels: &FramePixels) -> Result<u64>
where
    W: Write + Seek,
{
    let bytes = match pixels {
        FramePixels::U16(a) => encode_array(a.view())?,
        FramePixels::F32(a) => encode_array(a.view())?,
    };
    let mut cursor = BlockCursor::new(dest);
    cursor.seek_to(position)?;
    cursor.write_bytes(&bytes)?;
    cursor.pad_to_block()?;
    Ok(cursor.position())
}

/// Apply calibration to a decoded frame: multiply by the frame's scale
/// factor and the file's calibration factor.
pub fn calibrate(pixels: &FramePixels, scale_factor: f32, calibration_factor: f32) -> Array3<f32> {
    pixels.scaled(scale_factor * calibration_factor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn column_major_bytes() {
        // element (i, j, k) holds i + 10 j + 100 k
        let a = Array3::from_shape_fn((2, 3, 2).f(), |(i, j, k)| (i + 10 * j + 100 * k) as u16);
        let mut file = Cursor::new(Vec::new());
        let end = write_frame_pixels(&mut file, 0, &FramePixels::U16(a.clone())).unwrap();
        assert_eq!(end, 512);
        let bytes = file.into_inner();
        assert_eq!(bytes.len(), 512);
        let first: Vec<u16> = bytes[..8]
            .chunks(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(first, vec![0, 1, 10, 11]);
        assert!(bytes[24..].iter().all(|b| *b == 0));

        let mut file = Cursor::new(bytes);
        let decoded = read_frame_pixels(&mut file, 0..512, [2, 3, 2], 6).unwrap();
        assert_eq!(decoded, FramePixels::U16(a));
    }

    #[test]
    fn float_frames() {
        let a = Array3::from_shape_fn((4, 4, 3).f(), |(i, j, k)| i as f32 * 0.5 - j as f32 + k as f32 * 1e3);
        let mut file = Cursor::new(vec![0u8; 512]);
        let end = write_frame_pixels(&mut file, 512, &FramePixels::F32(a.clone())).unwrap();
        assert_eq!(end, 1024);
        let decoded = read_frame_pixels(&mut file, 512..1024, [4, 4, 3], 5).unwrap();
        assert_eq!(decoded.data_type(), DataType::IeeeR4);
        assert_eq!(decoded, FramePixels::F32(a));
    }

    #[test]
    fn large_u16_values_are_unsigned() {
        let mut bytes = vec![0u8; 512];
        bytes[0] = 0xFF;
        bytes[1] = 0xFE;
        let mut file = Cursor::new(bytes);
        match read_frame_pixels(&mut file, 0..512, [1, 1, 1], 6).unwrap() {
            FramePixels::U16(a) => assert_eq!(a[[0, 0, 0]], 0xFFFE),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn unsupported_codes() {
        let mut file = Cursor::new(vec![0u8; 512]);
        for &code in &[0i16, 1, 2, 3, 4, 7, 8, -1] {
            match read_frame_pixels(&mut file, 0..512, [2, 2, 2], code) {
                Err(EcatError::UnsupportedPixelFormat(c)) => assert_eq!(c, code),
                other => panic!("unexpected result {:?}", other),
            }
        }
    }

    #[test]
    fn short_range_is_rejected() {
        let mut file = Cursor::new(vec![0u8; 1024]);
        assert!(matches!(
            read_frame_pixels(&mut file, 0..512, [16, 16, 2], 6),
            Err(EcatError::InvalidDirectory(_))
        ));
    }

    #[test]
    fn calibration_is_separate() {
        let a = Array3::from_elem((2, 2, 2), 7u16);
        let frame = FramePixels::U16(a);
        assert_eq!(frame.to_f32(), Array3::from_elem((2, 2, 2), 7.0f32));
        let calibrated = calibrate(&frame, 0.5, 3.0);
        assert_abs_diff_eq!(calibrated, Array3::from_elem((2, 2, 2), 10.5f32), epsilon = 1e-6);
    }

    #[test]
    fn builder_checks_consistency() {
        let mut builder = VolumeBuilder::new();
        builder
            .push(FramePixels::U16(Array3::from_elem((2, 2, 2), 1)))
            .unwrap();
        assert!(matches!(
            builder.push(FramePixels::F32(Array3::from_elem((2, 2, 2), 1.))),
            Err(EcatError::InconsistentPixelFormat(6, 5))
        ));
        assert!(matches!(
            builder.push(FramePixels::U16(Array3::from_elem((2, 2, 3), 1))),
            Err(EcatError::InvalidDimensions(_))
        ));
        builder
            .push(FramePixels::U16(Array3::from_elem((2, 2, 2), 2)))
            .unwrap();
        assert_eq!(builder.len(), 2);

        let volume = builder.finish().unwrap();
        assert_eq!(volume.dim(), [2, 2, 2, 2]);
        assert_eq!(volume.data_type(), DataType::SunI2);
        assert_eq!(
            volume.frame(1),
            Some(FramePixels::U16(Array3::from_elem((2, 2, 2), 2)))
        );
        assert_eq!(volume.frame(2), None);
    }

    #[test]
    fn empty_volume() {
        assert!(VolumeBuilder::new().finish().is_none());
        assert!(matches!(
            EcatVolume::from_frames(Vec::new()),
            Err(EcatError::NoVolumeData)
        ));
    }
}
