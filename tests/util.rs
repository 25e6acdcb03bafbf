//! Synthetic ECAT files shared by the integration tests.
#![allow(dead_code)]

use ecat::header::{
    encode_header, DATA_TYPE, ECAT_CALIBRATION_FACTOR, FILE_TYPE, FRAME_DURATION,
    FRAME_START_TIME, MAGIC_NUMBER, NUM_DIMENSIONS, NUM_FRAMES, SCALE_FACTOR, SW_VERSION,
    X_DIMENSION, X_PIXEL_SIZE, Y_DIMENSION, Y_PIXEL_SIZE, Z_DIMENSION, Z_PIXEL_SIZE,
};
use ecat::{
    EcatImage, EcatVolume, HeaderKind, HeaderValues, MatrixId, SchemaRegistry, BLOCK_SIZE,
};
use ndarray::{Array4, ShapeBuilder};

pub fn registry() -> SchemaRegistry {
    SchemaRegistry::builtin().unwrap()
}

/// A version 73 main header for a volume file of `frames` frames.
pub fn main_header(frames: usize) -> HeaderValues {
    let registry = registry();
    let mut values = registry
        .lookup(73, HeaderKind::MainHeader)
        .unwrap()
        .blank_values();
    let _ = values.set(MAGIC_NUMBER, "MATRIX73v");
    let _ = values.set(SW_VERSION, 73i16);
    let _ = values.set(FILE_TYPE, 7i16);
    let _ = values.set(NUM_FRAMES, frames as i16);
    let _ = values.set(ECAT_CALIBRATION_FACTOR, 1.0f32);
    let _ = values.set("PATIENT_NAME", "Doe^Jane");
    let _ = values.set("ISOTOPE_NAME", "F-18");
    values
}

/// A volume subheader for a frame of the given shape and data type code.
pub fn subheader(
    dims: [usize; 3],
    data_type: i16,
    scale_factor: f32,
    start: i32,
    duration: i32,
) -> HeaderValues {
    let registry = registry();
    let mut values = registry
        .lookup(73, HeaderKind::Subheader(7))
        .unwrap()
        .blank_values();
    let _ = values.set(DATA_TYPE, data_type);
    let _ = values.set(NUM_DIMENSIONS, 3i16);
    let _ = values.set(X_DIMENSION, dims[0] as i16);
    let _ = values.set(Y_DIMENSION, dims[1] as i16);
    let _ = values.set(Z_DIMENSION, dims[2] as i16);
    let _ = values.set(X_PIXEL_SIZE, 0.2f32);
    let _ = values.set(Y_PIXEL_SIZE, 0.2f32);
    let _ = values.set(Z_PIXEL_SIZE, 0.24f32);
    let _ = values.set(SCALE_FACTOR, scale_factor);
    let _ = values.set(FRAME_START_TIME, start);
    let _ = values.set(FRAME_DURATION, duration);
    let _ = values.set("ANNOTATION", "synthetic");
    values
}

/// A 16-bit image whose voxel (i, j, k, t) holds i + 4j + 16k + 100t.
pub fn u16_image(dims: [usize; 3], frames: usize) -> EcatImage {
    let [x, y, z] = dims;
    let volume = Array4::from_shape_fn((x, y, z, frames).f(), |(i, j, k, t)| {
        (i + 4 * j + 16 * k + 100 * t) as u16
    });
    let subheaders = (0..frames)
        .map(|t| subheader(dims, 6, 1.0, t as i32 * 60_000, 60_000))
        .collect();
    EcatImage::new(73, main_header(frames), subheaders, EcatVolume::U16(volume))
}

/// A float image whose voxel (i, j, k, t) holds (i - j) * 0.5 + k + t * 1e3.
pub fn f32_image(dims: [usize; 3], frames: usize) -> EcatImage {
    let [x, y, z] = dims;
    let volume = Array4::from_shape_fn((x, y, z, frames).f(), |(i, j, k, t)| {
        (i as f32 - j as f32) * 0.5 + k as f32 + t as f32 * 1e3
    });
    let subheaders = (0..frames)
        .map(|t| subheader(dims, 5, 1.0, t as i32 * 30_000, 30_000))
        .collect();
    EcatImage::new(73, main_header(frames), subheaders, EcatVolume::F32(volume))
}

fn be_words(words: &[i32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes().to_vec()).collect()
}

/// The bytes of a minimal file, laid out by hand: one 4x4x4 frame of
/// 16-bit pixels all equal to `value`, with the given main header file
/// type and factors.
pub fn minimal_file(file_type: i16, value: u16, scale_factor: f32, calibration: f32) -> Vec<u8> {
    let registry = registry();

    let mut main = main_header(1);
    let _ = main.set(FILE_TYPE, file_type);
    let _ = main.set(ECAT_CALIBRATION_FACTOR, calibration);
    let main_schema = registry.lookup(73, HeaderKind::MainHeader).unwrap();
    let mut bytes = encode_header(&main, main_schema).unwrap();

    // 30 free, last block, no previous, 1 used; then the single entry
    let mut directory = be_words(&[30, 2, 0, 1, MatrixId::volume(1).encode(), 3, 4, 1]);
    directory.resize(BLOCK_SIZE, 0);
    bytes.extend(directory);

    let sub = subheader([4, 4, 4], 6, scale_factor, 0, 120_000);
    let sub_schema = registry.lookup(73, HeaderKind::Subheader(7)).unwrap();
    bytes.extend(encode_header(&sub, sub_schema).unwrap());

    let mut pixels: Vec<u8> = (0..64).flat_map(|_| value.to_be_bytes().to_vec()).collect();
    pixels.resize(BLOCK_SIZE, 0);
    bytes.extend(pixels);

    assert_eq!(bytes.len(), 4 * BLOCK_SIZE);
    bytes
}
