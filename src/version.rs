//! Detection of the main header version of a file.
//!
//! Each registered main header schema is tried against the first block
//! of the file. A schema matches when the `SW_VERSION` field it decodes
//! equals the version it is registered under. Detection is strict: a
//! file which matches no schema is rejected, unless the caller opts into
//! a fallback version.

use crate::error::{EcatError, Result};
use crate::header::decode_header;
use crate::schema::{HeaderKind, SchemaRegistry, HEADER_SIZE};
use crate::util::BlockCursor;
use std::io::{Read, Seek};
use tracing::{trace, warn};

/// Detect the main header version of the file in `source`.
///
/// # Errors
///
/// - `EcatError::UnrecognizedFormat` if no registered schema matches.
/// - `EcatError::Io` if the source is shorter than a header block.
pub fn detect_version<S>(source: &mut S, registry: &SchemaRegistry) -> Result<i16>
where
    S: Read + Seek,
{
    let mut cursor = BlockCursor::new(source);
    cursor.seek_to(0)?;
    let block = cursor.read_bytes(HEADER_SIZE)?;
    match_version(&block, registry).ok_or(EcatError::UnrecognizedFormat)
}

/// Detect the main header version of the file in `source`, using
/// `fallback` when no registered schema matches. The fallback must
/// itself have a registered main header schema.
pub fn detect_version_or<S>(
    source: &mut S,
    registry: &SchemaRegistry,
    fallback: Option<i16>,
) -> Result<i16>
where
    S: Read + Seek,
{
    match (detect_version(source, registry), fallback) {
        (Err(EcatError::UnrecognizedFormat), Some(version)) => {
            let _ = registry.require(version, HeaderKind::MainHeader)?;
            warn!(version, "no main header schema matched, falling back");
            Ok(version)
        }
        (result, _) => result,
    }
}

/// Match an in-memory main header block against every registered main
/// header schema.
pub fn match_version(block: &[u8], registry: &SchemaRegistry) -> Option<i16> {
    for version in registry.main_header_versions() {
        let schema = registry.lookup(version, HeaderKind::MainHeader)?;
        let values = match decode_header(block, schema) {
            Ok((values, _)) => values,
            Err(e) => {
                trace!(version, error = %e, "main header schema does not decode");
                continue;
            }
        };
        match values.sw_version() {
            Ok(reported) if reported == version => return Some(version),
            Ok(reported) => trace!(version, reported, "self-reported version differs"),
            Err(e) => trace!(version, error = %e, "no usable version field"),
        }
    }
    None
}
