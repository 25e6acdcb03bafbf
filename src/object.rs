//! Module for reading and writing complete ECAT images.
//!
//! An [`EcatImage`] holds everything decoded from one file: the main
//! header, one subheader per frame, the sorted directory and, unless the
//! caller opted out, the 4-D voxel buffer. [`ReaderOptions`] and
//! [`WriterOptions`] drive the decoding and encoding of whole files.
//!
//! [`EcatImage`]: ./struct.EcatImage.html
//! [`ReaderOptions`]: ./struct.ReaderOptions.html
//! [`WriterOptions`]: ./struct.WriterOptions.html

use crate::directory::{
    build_directory, read_directory, write_directory, DirectoryEntry, DirectoryTable,
};
use crate::error::{EcatError, Result, Stage};
use crate::field::FieldAnomaly;
use crate::header::{
    read_header, write_header, HeaderValues, DATA_TYPE, ECAT_CALIBRATION_FACTOR, FILE_TYPE,
    NUM_DIMENSIONS, NUM_FRAMES, SCALE_FACTOR, SW_VERSION, X_DIMENSION, Y_DIMENSION, Z_DIMENSION,
};
use crate::schema::{HeaderKind, HeaderSchema, SchemaRegistry};
use crate::typedef::FileType;
use crate::util::{align_to_block, is_gz_file};
use crate::version::detect_version_or;
use crate::volume::{
    calibrate, read_frame_pixels, write_frame_pixels, EcatVolume, FramePixels, VolumeBuilder,
};
use flate2::bufread::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use num_traits::FromPrimitive;
use std::convert::TryFrom;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// The decoded contents of an ECAT file.
#[derive(Debug, Clone, PartialEq)]
pub struct EcatImage {
    version: i16,
    main_header: HeaderValues,
    subheaders: Vec<HeaderValues>,
    directory: DirectoryTable,
    volume: Option<EcatVolume>,
    calibrated: bool,
    anomalies: Vec<FieldAnomaly>,
}

impl EcatImage {
    /// Create an image to be written. The directory is laid out when the
    /// image is written, and the structural header fields (frame count,
    /// dimensions and data type) are refreshed from `volume` at that time.
    pub fn new(
        version: i16,
        main_header: HeaderValues,
        subheaders: Vec<HeaderValues>,
        volume: EcatVolume,
    ) -> Self {
        EcatImage {
            version,
            main_header,
            subheaders,
            directory: DirectoryTable::default(),
            volume: Some(volume),
            calibrated: false,
            anomalies: Vec::new(),
        }
    }

    /// Read the file at the given path with the default options.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use ecat::EcatImage;
    /// # use ecat::error::Result;
    ///
    /// # fn run() -> Result<()> {
    /// let image = EcatImage::from_file("scan.v")?;
    /// println!("{} frames", image.subheaders().len());
    /// # Ok(())
    /// # }
    /// # run().unwrap()
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<EcatImage> {
        ReaderOptions::new().read_file(path)
    }

    /// Write the image to the given path with the default options.
    pub fn write_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        WriterOptions::new(path).write_ecat(self)
    }

    /// The main header version the file was decoded with.
    pub fn version(&self) -> i16 {
        self.version
    }

    /// The main header.
    pub fn main_header(&self) -> &HeaderValues {
        &self.main_header
    }

    /// The main header, for modification.
    pub fn main_header_mut(&mut self) -> &mut HeaderValues {
        &mut self.main_header
    }

    /// One subheader per frame, in frame order.
    pub fn subheaders(&self) -> &[HeaderValues] {
        &self.subheaders
    }

    /// The subheaders, for modification.
    pub fn subheaders_mut(&mut self) -> &mut Vec<HeaderValues> {
        &mut self.subheaders
    }

    /// The sorted directory the file was decoded from. Empty for images
    /// created in memory.
    pub fn directory(&self) -> &DirectoryTable {
        &self.directory
    }

    /// The voxel buffer, if pixels were collected.
    pub fn volume(&self) -> Option<&EcatVolume> {
        self.volume.as_ref()
    }

    /// Replace the voxel buffer.
    pub fn set_volume(&mut self, volume: Option<EcatVolume>) {
        self.volume = volume;
    }

    /// Whether the voxel buffer holds calibrated values, with the scale and
    /// calibration factors already applied.
    pub fn is_calibrated(&self) -> bool {
        self.calibrated
    }

    /// Mark the voxel buffer as calibrated or not. A calibrated image is
    /// written with its scale and calibration factors set to 1.
    pub fn set_calibrated(&mut self, calibrated: bool) {
        self.calibrated = calibrated;
    }

    /// Move the voxel buffer out of the image.
    pub fn into_volume(self) -> Option<EcatVolume> {
        self.volume
    }

    /// String fields which could not be decoded cleanly, over all headers.
    pub fn anomalies(&self) -> &[FieldAnomaly] {
        &self.anomalies
    }

    /// The `(start, duration)` of each frame, in milliseconds.
    pub fn frame_times(&self) -> Result<Vec<(i32, i32)>> {
        self.subheaders
            .iter()
            .map(|s| Ok((s.frame_start_time()?, s.frame_duration()?)))
            .collect()
    }

    /// Encode the image into the given destination. The scale and
    /// calibration factors of a calibrated image are written as 1, so the
    /// stored values are not calibrated twice when read back.
    ///
    /// # Errors
    ///
    /// - `EcatError::NoVolumeData` if the image holds no voxel buffer.
    /// - `EcatError::FrameCountMismatch` if there is not one subheader per
    /// frame.
    /// - `EcatError::UnsupportedSubheaderType` if the main header names a
    /// file type without a volume subheader schema.
    pub fn write_to<W>(&self, dest: &mut W, registry: &SchemaRegistry) -> Result<()>
    where
        W: Write + Seek,
    {
        let volume = self.volume.as_ref().ok_or(EcatError::NoVolumeData)?;
        let frames = volume.num_frames();
        if self.subheaders.len() != frames {
            return Err(EcatError::FrameCountMismatch(self.subheaders.len(), frames));
        }

        let blocks = build_directory(frames, volume.frame_dim(), volume.data_type().size_of())
            .map_err(|e| e.at(Stage::Directory))?;

        let main_header = self.structural_main_header(frames);
        let sub_schema = self
            .write_main_header(dest, registry, &main_header)
            .map_err(|e| e.at(Stage::MainHeader))?;
        debug!(version = self.version, frames, "wrote main header");

        write_directory(dest, &blocks).map_err(|e| e.at(Stage::Directory))?;
        let directory = DirectoryTable::from_blocks(&blocks);

        for (i, (entry, subheader)) in directory.iter().zip(&self.subheaders).enumerate() {
            let frame = i + 1;
            let subheader = self.structural_subheader(subheader, volume);
            let offset = entry
                .subheader_offset()
                .map_err(|e| e.at(Stage::Subheader(frame)))?;
            write_header(dest, sub_schema, &subheader, offset)
                .map_err(|e| e.at(Stage::Subheader(frame)))?;
            let end = write_frame(dest, entry, volume, i)
                .map_err(|e| e.at(Stage::PixelFrame(frame)))?;
            debug!(frame, offset, end, "wrote frame");
        }
        Ok(())
    }

    fn write_main_header<'r, W>(
        &self,
        dest: &mut W,
        registry: &'r SchemaRegistry,
        main_header: &HeaderValues,
    ) -> Result<&'r HeaderSchema>
    where
        W: Write + Seek,
    {
        let main_schema = registry.require(self.version, HeaderKind::MainHeader)?;
        let sub_schema =
            volume_subheader_schema(registry, self.version, main_header.file_type_code()?)?;
        write_header(dest, main_schema, main_header, 0)?;
        Ok(sub_schema)
    }

    fn structural_main_header(&self, frames: usize) -> HeaderValues {
        let mut main_header = self.main_header.clone();
        let _ = main_header.set(SW_VERSION, self.version);
        let _ = main_header.set(NUM_FRAMES, clamp_i32(frames));
        if main_header.get_int(FILE_TYPE).is_err() {
            let _ = main_header.set(FILE_TYPE, FileType::Volume16 as i16);
        }
        if self.calibrated {
            let _ = main_header.set(ECAT_CALIBRATION_FACTOR, 1f32);
        }
        main_header
    }

    fn structural_subheader(
        &self,
        subheader: &HeaderValues,
        volume: &EcatVolume,
    ) -> HeaderValues {
        let [x, y, z] = volume.frame_dim();
        let mut subheader = subheader.clone();
        let _ = subheader.set(DATA_TYPE, volume.data_type() as i16);
        let _ = subheader.set(NUM_DIMENSIONS, 3i16);
        let _ = subheader.set(X_DIMENSION, clamp_i32(x));
        let _ = subheader.set(Y_DIMENSION, clamp_i32(y));
        let _ = subheader.set(Z_DIMENSION, clamp_i32(z));
        if self.calibrated {
            let _ = subheader.set(SCALE_FACTOR, 1f32);
        }
        subheader
    }
}

fn write_frame<W>(
    dest: &mut W,
    entry: &DirectoryEntry,
    volume: &EcatVolume,
    index: usize,
) -> Result<u64>
where
    W: Write + Seek,
{
    let pixels = volume.frame(index).ok_or(EcatError::NoVolumeData)?;
    write_frame_pixels(dest, entry.pixel_range()?.start, &pixels)
}

// out of range values are rejected when the field is encoded
fn clamp_i32(v: usize) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

/// Resolve the subheader schema of a file type whose pixels can be
/// decoded.
fn volume_subheader_schema(
    registry: &SchemaRegistry,
    version: i16,
    code: i16,
) -> Result<&HeaderSchema> {
    let is_volume = FileType::from_i16(code).map_or(false, FileType::is_volume);
    match registry.lookup(version, HeaderKind::Subheader(code)) {
        Some(schema) if is_volume => Ok(schema),
        _ => Err(EcatError::UnsupportedSubheaderType(code)),
    }
}

/// Options and flags which can be used to configure how an ECAT file is
/// read.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    collect_pixels: bool,
    calibrate: bool,
    fallback_version: Option<i16>,
    registry: Option<Arc<SchemaRegistry>>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            collect_pixels: true,
            calibrate: false,
            fallback_version: None,
            registry: None,
        }
    }
}

impl ReaderOptions {
    /// Create the default reader options: pixels are collected without
    /// calibration, and version detection is strict.
    pub fn new() -> Self {
        ReaderOptions::default()
    }

    /// Whether to decode the pixel data. When disabled, only the headers
    /// and the directory are read.
    pub fn collect_pixels(&mut self, collect_pixels: bool) -> &mut Self {
        self.collect_pixels = collect_pixels;
        self
    }

    /// Whether to multiply each frame by its scale factor and the main
    /// header's calibration factor. Calibrated volumes hold 32-bit floats.
    pub fn calibrate(&mut self, calibrate: bool) -> &mut Self {
        self.calibrate = calibrate;
        self
    }

    /// The version to assume when no main header schema matches the file.
    /// `None` keeps detection strict.
    pub fn fallback_version(&mut self, version: Option<i16>) -> &mut Self {
        self.fallback_version = version;
        self
    }

    /// The schema registry to decode headers with. The built-in registry
    /// is used by default.
    pub fn registry(&mut self, registry: Arc<SchemaRegistry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Read the ECAT file at the given path. Files with a `.gz` extension
    /// are decompressed first.
    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> Result<EcatImage> {
        let path = path.as_ref();
        self.read_path(path).map_err(|e| e.in_file(path))
    }

    fn read_path(&self, path: &Path) -> Result<EcatImage> {
        let file = BufReader::new(File::open(path)?);
        if is_gz_file(path) {
            let mut buffer = Vec::new();
            let _ = GzDecoder::new(file).read_to_end(&mut buffer)?;
            self.read_stream(Cursor::new(buffer))
        } else {
            self.read_stream(file)
        }
    }

    /// Read an ECAT image from a seekable source.
    ///
    /// # Errors
    ///
    /// Errors are wrapped in `EcatError::Stage`, naming the step in which
    /// they were raised.
    pub fn read_stream<S>(&self, mut source: S) -> Result<EcatImage>
    where
        S: Read + Seek,
    {
        let registry = resolve_registry(&self.registry)?;

        let version = detect_version_or(&mut source, &registry, self.fallback_version)
            .map_err(|e| e.at(Stage::VersionDetection))?;
        let main = registry
            .require(version, HeaderKind::MainHeader)
            .and_then(|schema| read_header(&mut source, schema, 0))
            .map_err(|e| e.at(Stage::MainHeader))?;
        let main_header = main.values;
        let mut anomalies = main.anomalies;

        let directory = read_directory(&mut source, align_to_block(main.end_offset))
            .map_err(|e| e.at(Stage::Directory))?;
        if let Ok(declared) = main_header.num_frames() {
            if declared != directory.len() {
                warn!(declared, found = directory.len(), "frame count differs from the directory");
            }
        }

        let code = main_header
            .file_type_code()
            .map_err(|e| e.at(Stage::MainHeader))?;
        let sub_schema = if self.collect_pixels {
            volume_subheader_schema(&registry, version, code)
        } else {
            registry
                .lookup(version, HeaderKind::Subheader(code))
                .ok_or(EcatError::UnsupportedSubheaderType(code))
        };
        let sub_schema = sub_schema.map_err(|e| e.at(Stage::MainHeader))?;

        let calibration_factor = if self.calibrate && self.collect_pixels {
            main_header
                .calibration_factor()
                .map_err(|e| e.at(Stage::MainHeader))?
        } else {
            1.
        };

        let mut subheaders = Vec::with_capacity(directory.len());
        let mut builder = VolumeBuilder::new();
        for (i, entry) in directory.iter().enumerate() {
            let frame = i + 1;
            let sub = entry
                .subheader_offset()
                .and_then(|offset| read_header(&mut source, sub_schema, offset))
                .map_err(|e| e.at(Stage::Subheader(frame)))?;
            anomalies.extend(sub.anomalies);

            if self.collect_pixels {
                self.read_pixels(&mut source, entry, &sub.values, calibration_factor)
                    .and_then(|pixels| builder.push(pixels))
                    .map_err(|e| e.at(Stage::PixelFrame(frame)))?;
            }
            subheaders.push(sub.values);
        }

        Ok(EcatImage {
            version,
            main_header,
            subheaders,
            directory,
            volume: builder.finish(),
            calibrated: self.calibrate && self.collect_pixels,
            anomalies,
        })
    }

    fn read_pixels<S>(
        &self,
        source: &mut S,
        entry: &DirectoryEntry,
        subheader: &HeaderValues,
        calibration_factor: f32,
    ) -> Result<FramePixels>
    where
        S: Read + Seek,
    {
        let range = entry.pixel_range()?;
        let pixels = read_frame_pixels(
            source,
            range,
            subheader.dimensions()?,
            subheader.data_type_code()?,
        )?;
        if self.calibrate {
            let scale_factor = subheader.scale_factor()?;
            Ok(FramePixels::F32(calibrate(
                &pixels,
                scale_factor,
                calibration_factor,
            )))
        } else {
            Ok(pixels)
        }
    }
}

/// Options and flags which can be used to configure how an ECAT file is
/// written.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    path: PathBuf,
    compress: bool,
    registry: Option<Arc<SchemaRegistry>>,
}

impl WriterOptions {
    /// Write to the given path. Output is gzip compressed if the path has
    /// a `.gz` extension.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        WriterOptions {
            path: path.to_path_buf(),
            compress: is_gz_file(path),
            registry: None,
        }
    }

    /// Whether to gzip compress the output.
    pub fn compress(&mut self, compress: bool) -> &mut Self {
        self.compress = compress;
        self
    }

    /// The schema registry to encode headers with. The built-in registry
    /// is used by default.
    pub fn registry(&mut self, registry: Arc<SchemaRegistry>) -> &mut Self {
        self.registry = Some(registry);
        self
    }

    /// Write the image. The file is first written next to its destination
    /// and moved into place once complete, so a failed write leaves no
    /// file behind.
    pub fn write_ecat(&self, image: &EcatImage) -> Result<()> {
        let partial = self.partial_path();
        let result = resolve_registry(&self.registry)
            .and_then(|registry| self.write_path(&partial, image, &registry))
            .and_then(|_| fs::rename(&partial, &self.path).map_err(EcatError::from));
        if result.is_err() && partial.exists() {
            let _ = fs::remove_file(&partial);
        }
        result.map_err(|e| e.in_file(&self.path))
    }

    fn partial_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path
            .with_file_name(format!(".{}.{}.partial", name, std::process::id()))
    }

    fn write_path(&self, path: &Path, image: &EcatImage, registry: &SchemaRegistry) -> Result<()> {
        if self.compress {
            let mut buffer = Cursor::new(Vec::new());
            image.write_to(&mut buffer, registry)?;
            let file = BufWriter::new(File::create(path)?);
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder.write_all(buffer.get_ref())?;
            let mut file = encoder.finish()?;
            file.flush()?;
        } else {
            let mut file = BufWriter::new(File::create(path)?);
            image.write_to(&mut file, registry)?;
            file.flush()?;
        }
        Ok(())
    }
}

fn resolve_registry(registry: &Option<Arc<SchemaRegistry>>) -> Result<Arc<SchemaRegistry>> {
    match registry {
        Some(registry) => Ok(Arc::clone(registry)),
        None => Ok(Arc::new(SchemaRegistry::builtin()?)),
    }
}
