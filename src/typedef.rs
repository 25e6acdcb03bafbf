//! This module contains the numeric code tables defined by the format.
//! Raw integer codes found in headers can be converted to these types
//! with `FromPrimitive` and back with a plain cast.

/// The kind of matrix stored in the file, as declared by the main
/// header's `FILE_TYPE` field. It also names the subheader layout
/// which precedes each frame.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, FromPrimitive)]
pub enum FileType {
    /// Unknown matrix type.
    Unknown = 0,
    /// 2D sinogram.
    Sinogram = 1,
    /// 2D image, 16-bit.
    Image16 = 2,
    /// Attenuation correction.
    AttenuationCorrection = 3,
    /// 2D normalization.
    Normalization = 4,
    /// Polar map.
    PolarMap = 5,
    /// Volume, 8-bit.
    Volume8 = 6,
    /// Volume, 16-bit.
    Volume16 = 7,
    /// Projection, 8-bit.
    Projection8 = 8,
    /// Projection, 16-bit.
    Projection16 = 9,
    /// 2D image, 8-bit.
    Image8 = 10,
    /// 3D sinogram, 16-bit.
    Sinogram3d16 = 11,
    /// 3D sinogram, 8-bit.
    Sinogram3d8 = 12,
    /// 3D normalization.
    Normalization3d = 13,
    /// 3D sinogram fit.
    Sinogram3dFit = 14,
}

impl FileType {
    /// Whether frames of this type hold a 3D image volume whose pixels
    /// can be decoded by this crate.
    pub fn is_volume(self) -> bool {
        self == FileType::Volume16
    }
}

/// Data type of the pixels in a frame, as declared by the subheader's
/// `DATA_TYPE` field.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, FromPrimitive)]
pub enum DataType {
    /// Unknown data type.
    Unknown = 0,
    /// 8-bit bytes.
    ByteData = 1,
    /// VAX 16-bit integer.
    VaxI2 = 2,
    /// VAX 32-bit integer.
    VaxI4 = 3,
    /// VAX 32-bit float.
    VaxR4 = 4,
    /// IEEE 754 32-bit float, big endian.
    IeeeR4 = 5,
    /// 16-bit integer, big endian.
    SunI2 = 6,
    /// 32-bit integer, big endian.
    SunI4 = 7,
}

impl DataType {
    /// Retrieve the size of an element of this data type, in bytes.
    pub fn size_of(self) -> usize {
        use self::DataType::*;
        match self {
            Unknown => 0,
            ByteData => 1,
            VaxI2 | SunI2 => 2,
            VaxI4 | VaxR4 | IeeeR4 | SunI4 => 4,
        }
    }

    /// Whether pixels of this type can be decoded and encoded.
    pub fn is_supported(self) -> bool {
        self == DataType::IeeeR4 || self == DataType::SunI2
    }
}
