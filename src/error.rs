//! Types for error handling go here.

use crate::schema::HeaderKind;
use std::fmt;
use std::io::Error as IOError;
use std::path::PathBuf;

/// The step of a read or write operation in which an error was raised.
/// Frame numbers are 1-based, in directory order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Matching the main header against the registered schemas
    VersionDetection,
    /// Reading or writing the main header
    MainHeader,
    /// Reading or writing the directory chain
    Directory,
    /// Reading or writing the subheader of a frame
    Subheader(usize),
    /// Reading or writing the pixel data of a frame
    PixelFrame(usize),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Stage::VersionDetection => f.write_str("version detection"),
            Stage::MainHeader => f.write_str("main header"),
            Stage::Directory => f.write_str("directory"),
            Stage::Subheader(n) => write!(f, "subheader of frame {}", n),
            Stage::PixelFrame(n) => write!(f, "pixel data of frame {}", n),
        }
    }
}

quick_error! {
    /// Error type for all error variants originated by this crate.
    #[derive(Debug)]
    pub enum EcatError {
        /// No registered main header schema matches the file's
        /// self-reported software version.
        UnrecognizedFormat {
            display("unrecognized ECAT format: no main header schema matches its own version field")
        }
        /// The main header names a subheader kind without a registered
        /// schema or pixel support.
        UnsupportedSubheaderType(code: i16) {
            display("unsupported subheader type {}", code)
        }
        /// A frame declares a pixel data type which cannot be decoded.
        UnsupportedPixelFormat(code: i16) {
            display("unsupported pixel data type {}", code)
        }
        /// A frame's pixel data type differs from the preceding frames.
        InconsistentPixelFormat(expected: i16, got: i16) {
            display("pixel data type {} differs from the volume's data type {}", got, expected)
        }
        /// Frame dimensions are invalid or differ from the preceding frames.
        InvalidDimensions(dims: Vec<i64>) {
            display("invalid frame dimensions {:?}", dims)
        }
        /// No schema was registered for this version and header kind.
        MissingSchema(version: i16, kind: HeaderKind) {
            display("no schema registered for version {} and {}", version, kind)
        }
        /// A header schema definition is malformed.
        InvalidSchema(message: String) {
            display("invalid header schema: {}", message)
        }
        /// The schema table could not be parsed.
        SchemaJson(err: serde_json::Error) {
            from()
            source(err)
            display("malformed schema table: {}", err)
        }
        /// A required header field is absent.
        MissingField(name: String) {
            display("header field `{}` is missing", name)
        }
        /// A header value does not fit the kind of field it was given to.
        FieldTypeMismatch(name: String) {
            display("header field `{}` holds a value of the wrong kind", name)
        }
        /// A string value is wider than its fixed-width field.
        FieldTooWide(name: String, width: usize, len: usize) {
            display("value of {} bytes does not fit in field `{}` of {} bytes", len, name, width)
        }
        /// A numeric value is out of range for its field's encoding.
        FieldOutOfRange(name: String, value: i64) {
            display("value {} is out of range for field `{}`", value, name)
        }
        /// A list value does not hold as many elements as its field.
        FieldCountMismatch(name: String, expected: usize, got: usize) {
            display("field `{}` holds {} elements, but {} were given", name, expected, got)
        }
        /// The directory chain is malformed.
        InvalidDirectory(message: String) {
            display("invalid directory: {}", message)
        }
        /// The directory chain visits the same block twice.
        DirectoryCycle(block: i32) {
            display("directory chain revisits block {}", block)
        }
        /// The image holds no voxel data to write.
        NoVolumeData {
            display("no volume data available")
        }
        /// The number of subheaders does not match the number of frames.
        FrameCountMismatch(subheaders: usize, frames: usize) {
            display("{} subheaders given for {} frames", subheaders, frames)
        }
        /// An error raised during a specific stage of an operation.
        Stage(stage: Stage, err: Box<EcatError>) {
            display("{}: {}", stage, err)
            source(&**err)
        }
        /// An error raised while processing the given file.
        File(path: PathBuf, err: Box<EcatError>) {
            display("{}: {}", path.display(), err)
            source(&**err)
        }
        /// I/O Error
        Io(err: IOError) {
            from()
            source(err)
            display("I/O error: {}", err)
        }
    }
}

impl EcatError {
    /// Attach the stage in which this error was raised.
    pub(crate) fn at(self, stage: Stage) -> EcatError {
        EcatError::Stage(stage, Box::new(self))
    }

    /// Attach the file which was being processed.
    pub(crate) fn in_file<P: Into<PathBuf>>(self, path: P) -> EcatError {
        EcatError::File(path.into(), Box::new(self))
    }

    /// Retrieve the innermost error, skipping file and stage context.
    pub fn root(&self) -> &EcatError {
        match self {
            EcatError::Stage(_, err) | EcatError::File(_, err) => err.root(),
            err => err,
        }
    }

    /// Retrieve the stage in which this error was raised, if known.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            EcatError::Stage(stage, _) => Some(*stage),
            EcatError::File(_, err) => err.stage(),
            _ => None,
        }
    }
}

/// Alias type for results originated from this crate.
pub type Result<T> = ::std::result::Result<T, EcatError>;
