//! Rust implementation of the ECAT 7 PET image file format.
//!
//! ECAT files are made of 512-byte blocks: a main header, a chain of
//! directory blocks, and one subheader followed by pixel data per frame.
//! Header layouts are not hard-coded. They are described by a
//! [`SchemaRegistry`], which ships with the layouts of ECAT 7.2 and 7.3
//! and can be extended with other versions.
//!
//! # Example
//!
//! ```no_run
//! use ecat::{ReaderOptions, WriterOptions};
//! # use ecat::error::Result;
//!
//! # fn run() -> Result<()> {
//! let image = ReaderOptions::new().calibrate(true).read_file("scan.v.gz")?;
//! if let Some(volume) = image.volume() {
//!     println!("{:?}", volume.dim());
//! }
//! for (start, duration) in image.frame_times()? {
//!     println!("frame at {} ms, lasting {} ms", start, duration);
//! }
//!
//! let raw = ReaderOptions::new().read_file("scan.v")?;
//! WriterOptions::new("copy.v").write_ecat(&raw)?;
//! # Ok(())
//! # }
//! # run().unwrap()
//! ```
//!
//! [`SchemaRegistry`]: ./schema/struct.SchemaRegistry.html
#![deny(missing_debug_implementations)]
#![warn(missing_docs, unused_extern_crates, trivial_casts, unused_results)]

#[macro_use]
extern crate quick_error;
#[macro_use]
extern crate num_derive;

#[cfg(feature = "nalgebra_affine")]
pub mod affine;
pub mod directory;
pub mod error;
pub mod field;
pub mod header;
pub mod object;
pub mod schema;
pub mod typedef;
pub mod version;
pub mod volume;
mod util;

pub use crate::directory::{DirectoryEntry, DirectoryTable, MatrixId};
pub use crate::error::{EcatError, Result, Stage};
pub use crate::field::{FieldAnomaly, FieldValue};
pub use crate::header::HeaderValues;
pub use crate::object::{EcatImage, ReaderOptions, WriterOptions};
pub use crate::schema::{Encoding, FieldDescriptor, HeaderKind, HeaderSchema, SchemaRegistry};
pub use crate::typedef::{DataType, FileType};
pub use crate::util::{BlockCursor, BLOCK_SIZE};
pub use crate::volume::{EcatVolume, FramePixels};
