//! Field layouts of the main header and subheaders.
//!
//! Each supported main header version and subheader kind is described by
//! a [`HeaderSchema`]: an ordered list of field descriptors which together
//! cover one 512-byte block. The built-in table lives in
//! `resources/ecat_headers.json` and is embedded into the crate; custom
//! tables in the same format can be loaded with
//! [`SchemaRegistry::from_json_str`].
//!
//! Field types are written as in the format's documentation:
//! `Character*N` for an `N`-byte string, `Integer*N` for an `N`-byte
//! signed integer (`N` in 1, 2 or 4) and `Real*4` for a 32-bit float.
//! An optional `count` turns a numeric field into a fixed-length array.
//!
//! [`HeaderSchema`]: ./struct.HeaderSchema.html
//! [`SchemaRegistry::from_json_str`]: ./struct.SchemaRegistry.html#method.from_json_str

use crate::error::{EcatError, Result};
use crate::header::HeaderValues;
use crate::field::FieldValue;
use crate::util::BLOCK_SIZE;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Read;

/// The schema table shipped with the crate.
pub const BUILTIN_SCHEMAS: &str = include_str!("../resources/ecat_headers.json");

/// Size of every header block, in bytes.
pub const HEADER_SIZE: usize = BLOCK_SIZE;

/// Binary encoding of a single header field. Numeric encodings carry
/// their element count; a count of 1 decodes to a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Fixed-width character string of the given number of bytes
    FixedString(usize),
    /// Signed 8-bit integers
    Int8(usize),
    /// Big endian signed 16-bit integers
    Int16(usize),
    /// Big endian signed 32-bit integers
    Int32(usize),
    /// Big endian IEEE 754 single precision floats
    Float32(usize),
}

impl Encoding {
    /// Resolve a type name from the schema table (such as `Integer*2`)
    /// and an element count into an encoding.
    pub fn parse(type_name: &str, count: usize) -> Result<Encoding> {
        let invalid = || EcatError::InvalidSchema(format!("unknown field type `{}`", type_name));
        let mut parts = type_name.splitn(2, '*');
        let kind = parts.next().unwrap_or_default().trim();
        let size: usize = parts
            .next()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(invalid)?;
        if count == 0 {
            return Err(EcatError::InvalidSchema(format!(
                "field type `{}` has a count of zero",
                type_name
            )));
        }

        match (kind, size) {
            ("Character", n) if n > 0 => {
                if count != 1 {
                    return Err(EcatError::InvalidSchema(
                        "character fields cannot be repeated".to_string(),
                    ));
                }
                Ok(Encoding::FixedString(n))
            }
            ("Integer", 1) => Ok(Encoding::Int8(count)),
            ("Integer", 2) => Ok(Encoding::Int16(count)),
            ("Integer", 4) => Ok(Encoding::Int32(count)),
            ("Real", 4) => Ok(Encoding::Float32(count)),
            _ => Err(invalid()),
        }
    }

    /// Number of values held by the field. Strings count as one.
    pub fn count(&self) -> usize {
        match *self {
            Encoding::FixedString(_) => 1,
            Encoding::Int8(n) | Encoding::Int16(n) | Encoding::Int32(n) | Encoding::Float32(n) => n,
        }
    }

    /// Total encoded width of the field, in bytes.
    pub fn width(&self) -> usize {
        match *self {
            Encoding::FixedString(w) => w,
            Encoding::Int8(n) => n,
            Encoding::Int16(n) => 2 * n,
            Encoding::Int32(n) | Encoding::Float32(n) => 4 * n,
        }
    }

    /// The value this field holds when nothing was given for it.
    pub fn zero_value(&self) -> FieldValue {
        match *self {
            Encoding::FixedString(_) => FieldValue::Str(String::new()),
            Encoding::Int8(1) | Encoding::Int16(1) | Encoding::Int32(1) => FieldValue::Int(0),
            Encoding::Int8(n) | Encoding::Int16(n) | Encoding::Int32(n) => {
                FieldValue::Ints(vec![0; n])
            }
            Encoding::Float32(1) => FieldValue::Float(0.),
            Encoding::Float32(n) => FieldValue::Floats(vec![0.; n]),
        }
    }
}

/// The location, name and encoding of one header field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDescriptor {
    /// Byte offset of the field from the start of its header block
    pub offset: usize,
    /// Field name, unique within its schema
    pub name: String,
    /// Binary encoding of the field
    pub encoding: Encoding,
}

impl FieldDescriptor {
    /// Create a new field descriptor.
    pub fn new<N: Into<String>>(offset: usize, name: N, encoding: Encoding) -> Self {
        FieldDescriptor {
            offset,
            name: name.into(),
            encoding,
        }
    }

    /// Byte offset right after the end of this field.
    pub fn end(&self) -> usize {
        self.offset + self.encoding.width()
    }
}

/// Which header block a schema describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeaderKind {
    /// The main header at the start of the file
    MainHeader,
    /// A per-frame subheader, by its `FILE_TYPE` code
    Subheader(i16),
}

impl fmt::Display for HeaderKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HeaderKind::MainHeader => f.write_str("main header"),
            HeaderKind::Subheader(code) => write!(f, "subheader type {}", code),
        }
    }
}

/// An ordered, contiguous list of field descriptors for one header
/// block of one format version.
#[derive(Debug, Clone, PartialEq)]
pub struct HeaderSchema {
    version: i16,
    kind: HeaderKind,
    fields: Vec<FieldDescriptor>,
}

impl HeaderSchema {
    /// Create a schema, validating that its fields are laid out back to
    /// back from offset 0, have unique names, and cover exactly one
    /// header block.
    pub fn new(version: i16, kind: HeaderKind, fields: Vec<FieldDescriptor>) -> Result<Self> {
        let schema = HeaderSchema {
            version,
            kind,
            fields,
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        let mut expected = 0;
        let mut names = HashSet::new();
        for field in &self.fields {
            if field.offset != expected {
                return Err(EcatError::InvalidSchema(format!(
                    "{} v{}: field `{}` starts at byte {}, expected {}",
                    self.kind, self.version, field.name, field.offset, expected
                )));
            }
            if !names.insert(field.name.as_str()) {
                return Err(EcatError::InvalidSchema(format!(
                    "{} v{}: duplicate field `{}`",
                    self.kind, self.version, field.name
                )));
            }
            expected = field.end();
        }
        if expected != HEADER_SIZE {
            return Err(EcatError::InvalidSchema(format!(
                "{} v{}: fields cover {} bytes, expected {}",
                self.kind, self.version, expected, HEADER_SIZE
            )));
        }
        Ok(())
    }

    /// The format version this schema belongs to.
    pub fn version(&self) -> i16 {
        self.version
    }

    /// The header block this schema describes.
    pub fn kind(&self) -> HeaderKind {
        self.kind
    }

    /// The field descriptors, in file order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field descriptor by name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Size of the header block, in bytes.
    pub fn size(&self) -> usize {
        self.fields.last().map(FieldDescriptor::end).unwrap_or(0)
    }

    /// Header values holding the zero value of every field, in schema
    /// order. Useful as a starting point for building new files.
    pub fn blank_values(&self) -> HeaderValues {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.encoding.zero_value()))
            .collect()
    }
}

/// The set of known header schemas, keyed by format version and header
/// kind. A registry is immutable once built and can be shared between
/// threads.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<(i16, HeaderKind), HeaderSchema>,
}

#[derive(Deserialize)]
struct RawTable {
    schemas: Vec<RawSchema>,
}

#[derive(Deserialize)]
struct RawSchema {
    versions: Vec<i16>,
    kind: RawKind,
    fields: Vec<RawField>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawKind {
    Subheader(i16),
    Named(String),
}

#[derive(Deserialize)]
struct RawField {
    offset: usize,
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default = "default_count")]
    count: usize,
}

fn default_count() -> usize {
    1
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Build the registry of schemas shipped with the crate: main header
    /// versions 72 and 73, and the 16-bit volume subheader (type 7).
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(BUILTIN_SCHEMAS)
    }

    /// Build a registry from a schema table in JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let table: RawTable = serde_json::from_str(json)?;
        Self::from_raw(table)
    }

    /// Build a registry from a schema table in JSON, read from the given
    /// source.
    pub fn from_reader<R: Read>(source: R) -> Result<Self> {
        let table: RawTable = serde_json::from_reader(source)?;
        Self::from_raw(table)
    }

    fn from_raw(table: RawTable) -> Result<Self> {
        let mut registry = SchemaRegistry::new();
        for raw in table.schemas {
            let kind = match raw.kind {
                RawKind::Subheader(code) => HeaderKind::Subheader(code),
                RawKind::Named(ref name) if name == "main" => HeaderKind::MainHeader,
                RawKind::Named(name) => {
                    return Err(EcatError::InvalidSchema(format!(
                        "unknown header kind `{}`",
                        name
                    )))
                }
            };
            let fields = raw
                .fields
                .into_iter()
                .map(|f| {
                    let encoding = Encoding::parse(&f.type_name, f.count)?;
                    Ok(FieldDescriptor::new(f.offset, f.name, encoding))
                })
                .collect::<Result<Vec<_>>>()?;
            for &version in &raw.versions {
                registry.insert(HeaderSchema::new(version, kind, fields.clone())?)?;
            }
        }
        Ok(registry)
    }

    /// Register a schema. Registering two schemas for the same version
    /// and kind is an error.
    pub fn insert(&mut self, schema: HeaderSchema) -> Result<()> {
        let key = (schema.version(), schema.kind());
        if self.schemas.contains_key(&key) {
            return Err(EcatError::InvalidSchema(format!(
                "{} v{} is defined twice",
                key.1, key.0
            )));
        }
        let _ = self.schemas.insert(key, schema);
        Ok(())
    }

    /// Look up the schema of the given version and header kind.
    pub fn lookup(&self, version: i16, kind: HeaderKind) -> Option<&HeaderSchema> {
        self.schemas.get(&(version, kind))
    }

    /// Look up a schema, failing with `MissingSchema` if it is not
    /// registered.
    pub fn require(&self, version: i16, kind: HeaderKind) -> Result<&HeaderSchema> {
        self.lookup(version, kind)
            .ok_or(EcatError::MissingSchema(version, kind))
    }

    /// All main header versions with a registered schema, in ascending
    /// order.
    pub fn main_header_versions(&self) -> Vec<i16> {
        let mut versions: Vec<i16> = self
            .schemas
            .keys()
            .filter(|(_, kind)| *kind == HeaderKind::MainHeader)
            .map(|(version, _)| *version)
            .collect();
        versions.sort_unstable();
        versions
    }

    /// Iterate over all registered schemas, in no particular order.
    pub fn schemas(&self) -> impl Iterator<Item = &HeaderSchema> {
        self.schemas.values()
    }

    /// Number of registered schemas.
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Whether no schema is registered.
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
