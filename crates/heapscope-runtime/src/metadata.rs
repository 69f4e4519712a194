//! Raw per-class type metadata.
//!
//! Each class carries a binary blob describing its declared fields. Byte 0 is
//! a flags byte; when [`FLAG_COMPACT`] is set the rest of the blob is a compact
//! field-descriptor table (name table, offsets, qualifiers, kind records),
//! otherwise it is the standard per-field table. Integers are big-endian and
//! strings are `u16`-length-prefixed UTF-8.
//!
//! The host side builds blobs with [`ClassBuilder`]; readers decode them with
//! [`MetaReader`].

use thiserror::Error;

use crate::encoding::{self, parse_encoding, EncodingError, ScalarKind, TypeTag};

/// Dialect marker bit in the metadata flags byte.
pub const FLAG_COMPACT: u8 = 0x01;

pub const KIND_RAW: u16 = 0x0001;
pub const KIND_OPTIONAL: u16 = 0x0002;
pub const KIND_FUNCTION: u16 = 0x000a;
pub const KIND_PROTOCOL: u16 = 0x000c;
pub const KIND_NATIVE_CLASS: u16 = 0x000e;
pub const KIND_POINTER: u16 = 0x0010;
/// Kinds at or above this value name a compact-dialect class.
pub const KIND_CLASS_MIN: u16 = 0x0100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("metadata truncated: need {need} bytes at offset {at}")]
    Truncated { at: usize, need: usize },
    #[error("?FLAGS#{0}")]
    UnknownKind(u16),
    #[error("unknown raw type identifier {0:?}")]
    UnknownIdent(String),
    #[error("name table lists {found} names for {expected} fields")]
    NameCountMismatch { expected: usize, found: usize },
    #[error("metadata string is not valid UTF-8")]
    InvalidUtf8,
    #[error("unknown ownership qualifier {0}")]
    UnknownQualifier(u8),
    #[error("{0} trailing bytes after field table")]
    TrailingBytes(usize),
    #[error("empty metadata")]
    Empty,
    #[error("optional kind records nested deeper than {0}")]
    NestingTooDeep(usize),
    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

/// Declared ownership qualifier of a reference field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Qualifier {
    Strong,
    Weak,
    Unretained,
}

impl Qualifier {
    pub fn to_byte(self) -> u8 {
        match self {
            Qualifier::Strong => 0,
            Qualifier::Weak => 1,
            Qualifier::Unretained => 2,
        }
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Qualifier::Strong),
            1 => Ok(Qualifier::Weak),
            2 => Ok(Qualifier::Unretained),
            other => Err(DecodeError::UnknownQualifier(other)),
        }
    }
}

/// Field kind record of the compact dialect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompactKind {
    /// Raw value type identifier (`Si`, `SS`, `V4main5Point_dd`, ...).
    Raw(String),
    /// Optional wrapping another kind record.
    Optional(Box<CompactKind>),
    /// Optional whose payload is given directly as a standard encoding.
    BareOptional(String),
    Function,
    Protocol(String),
    /// Class from the standard dialect.
    NativeClass(String),
    Pointer(String),
    /// Class from the compact dialect.
    Class(String),
    /// Arbitrary kind value; used to describe corrupt metadata.
    Unrecognized(u16),
}

impl CompactKind {
    /// Storage type of this kind, with optionals unwrapped.
    pub fn type_tag(&self) -> Result<TypeTag, DecodeError> {
        match self {
            CompactKind::Raw(ident) => translate_raw_ident(ident),
            CompactKind::Optional(inner) => inner.type_tag(),
            CompactKind::BareOptional(encoding) => Ok(parse_encoding(encoding)?),
            CompactKind::Function => Ok(TypeTag::Function),
            CompactKind::Protocol(name) => Ok(TypeTag::Protocol(name.clone())),
            CompactKind::NativeClass(name) | CompactKind::Class(name) => {
                Ok(TypeTag::Reference(Some(name.clone())))
            }
            CompactKind::Pointer(ident) => Ok(TypeTag::RawPointer(Some(demangle_name(ident)))),
            CompactKind::Unrecognized(kind) => Err(DecodeError::UnknownKind(*kind)),
        }
    }

    fn write(&self, w: &mut MetaWriter) {
        match self {
            CompactKind::Raw(ident) => {
                w.write_u16(KIND_RAW);
                w.write_str(ident);
            }
            CompactKind::Optional(inner) => {
                w.write_u16(KIND_OPTIONAL);
                w.write_u8(1);
                inner.write(w);
            }
            CompactKind::BareOptional(encoding) => {
                w.write_u16(KIND_OPTIONAL);
                w.write_u8(0);
                w.write_str(encoding);
            }
            CompactKind::Function => w.write_u16(KIND_FUNCTION),
            CompactKind::Protocol(name) => {
                w.write_u16(KIND_PROTOCOL);
                w.write_str(name);
            }
            CompactKind::NativeClass(name) => {
                w.write_u16(KIND_NATIVE_CLASS);
                w.write_str(name);
            }
            CompactKind::Pointer(ident) => {
                w.write_u16(KIND_POINTER);
                w.write_str(ident);
            }
            CompactKind::Class(name) => {
                w.write_u16(KIND_CLASS_MIN);
                w.write_str(name);
            }
            CompactKind::Unrecognized(kind) => w.write_u16(*kind),
        }
    }
}

/// Translate a compact raw type identifier into the shared vocabulary.
///
/// `S`-prefixed identifiers name standard scalars and strings. `V`-prefixed
/// identifiers name value aggregates as length-prefixed segments
/// (module, then type), optionally followed by `_` and the member codes in
/// standard notation.
pub fn translate_raw_ident(ident: &str) -> Result<TypeTag, DecodeError> {
    let unknown = || DecodeError::UnknownIdent(ident.to_string());
    match ident.as_bytes() {
        [b'S', code] => match *code {
            b'b' => Ok(TypeTag::Scalar(ScalarKind::Bool)),
            b'i' => Ok(TypeTag::Scalar(ScalarKind::I64)),
            b'u' => Ok(TypeTag::Scalar(ScalarKind::U64)),
            b'd' => Ok(TypeTag::Scalar(ScalarKind::F64)),
            b'f' => Ok(TypeTag::Scalar(ScalarKind::F32)),
            b'S' => Ok(TypeTag::String),
            _ => Err(unknown()),
        },
        [b'V', ..] => {
            let (segments, rest) = split_segments(&ident[1..]).ok_or_else(unknown)?;
            let name = segments.last().ok_or_else(unknown)?.to_string();
            let encoding = if rest.is_empty() || rest == "_" {
                format!("{{{name}}}")
            } else if let Some(codes) = rest.strip_prefix('_') {
                format!("{{{name}={codes}}}")
            } else {
                return Err(unknown());
            };
            // Validate member codes eagerly so corrupt identifiers surface here.
            parse_encoding(&encoding)?;
            Ok(TypeTag::Aggregate { name, encoding })
        }
        _ => Err(unknown()),
    }
}

/// Last name segment of a length-prefixed identifier, or the identifier itself.
pub fn demangle_name(ident: &str) -> String {
    match split_segments(ident) {
        Some((segments, _)) if !segments.is_empty() => segments[segments.len() - 1].to_string(),
        _ => ident.to_string(),
    }
}

fn split_segments(mut input: &str) -> Option<(Vec<&str>, &str)> {
    let mut segments = Vec::new();
    loop {
        let digits = input.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Some((segments, input));
        }
        let len: usize = input[..digits].parse().ok()?;
        let end = digits.checked_add(len)?;
        let segment = input.get(digits..end)?;
        segments.push(segment);
        input = &input[end..];
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum FieldKindSpec {
    Standard(String),
    Compact(CompactKind),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct FieldSpec {
    pub(crate) name: String,
    pub(crate) qualifier: Qualifier,
    pub(crate) kind: FieldKindSpec,
}

/// Declarative description of a class, laid out and encoded on registration.
#[derive(Clone, Debug)]
pub struct ClassBuilder {
    pub(crate) name: String,
    pub(crate) superclass: Option<String>,
    pub(crate) compact: bool,
    pub(crate) fields: Vec<FieldSpec>,
    pub(crate) methods: Vec<(String, String)>,
    pub(crate) metadata_override: Option<Vec<u8>>,
}

impl ClassBuilder {
    /// Class described with the standard field table.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            superclass: None,
            compact: false,
            fields: Vec::new(),
            methods: Vec::new(),
            metadata_override: None,
        }
    }

    /// Class described with the compact field table.
    pub fn compact(name: impl Into<String>) -> Self {
        Self {
            compact: true,
            ..Self::new(name)
        }
    }

    pub fn superclass(mut self, name: impl Into<String>) -> Self {
        self.superclass = Some(name.into());
        self
    }

    /// Strong field with a standard encoding.
    pub fn field(self, name: impl Into<String>, encoding: &str) -> Self {
        self.field_with(name, encoding, Qualifier::Strong)
    }

    pub fn weak_field(self, name: impl Into<String>, encoding: &str) -> Self {
        self.field_with(name, encoding, Qualifier::Weak)
    }

    pub fn unretained_field(self, name: impl Into<String>, encoding: &str) -> Self {
        self.field_with(name, encoding, Qualifier::Unretained)
    }

    pub fn field_with(
        mut self,
        name: impl Into<String>,
        encoding: &str,
        qualifier: Qualifier,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            qualifier,
            kind: FieldKindSpec::Standard(encoding.to_string()),
        });
        self
    }

    /// Field of a compact class, described by its kind record.
    pub fn compact_field(
        mut self,
        name: impl Into<String>,
        kind: CompactKind,
        qualifier: Qualifier,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            qualifier,
            kind: FieldKindSpec::Compact(kind),
        });
        self
    }

    pub fn method(mut self, name: impl Into<String>, signature: impl Into<String>) -> Self {
        self.methods.push((name.into(), signature.into()));
        self
    }

    /// Replace the generated metadata blob; instance layout still follows the
    /// declared fields.
    pub fn raw_metadata(mut self, bytes: Vec<u8>) -> Self {
        self.metadata_override = Some(bytes);
        self
    }
}

/// Result of laying out a [`ClassBuilder`] after its superclass storage.
#[derive(Clone, Debug)]
pub(crate) struct LaidOutClass {
    pub(crate) fields: Vec<(String, usize, TypeTag)>,
    pub(crate) instance_size: usize,
    pub(crate) metadata: Vec<u8>,
}

impl ClassBuilder {
    pub(crate) fn lay_out(&self, base: usize) -> Result<LaidOutClass, DecodeError> {
        let mut offset = base;
        let mut fields = Vec::with_capacity(self.fields.len());
        for spec in &self.fields {
            let tag = match &spec.kind {
                FieldKindSpec::Standard(encoding) => parse_encoding(encoding)?,
                FieldKindSpec::Compact(kind) => match kind.type_tag() {
                    Ok(tag) => tag,
                    // Corrupt kinds still occupy a pointer-sized slot.
                    Err(_) => TypeTag::RawPointer(None),
                },
            };
            let align = tag.alignment()?;
            offset = encoding::align_up(offset, align);
            fields.push((spec.name.clone(), offset, tag.clone()));
            offset += tag.size()?;
        }
        let instance_size = encoding::align_up(offset, 8);

        let metadata = match &self.metadata_override {
            Some(bytes) => bytes.clone(),
            None if self.compact => self.encode_compact(&fields),
            None => self.encode_standard(&fields),
        };

        Ok(LaidOutClass {
            fields,
            instance_size,
            metadata,
        })
    }

    fn encode_standard(&self, laid_out: &[(String, usize, TypeTag)]) -> Vec<u8> {
        let mut w = MetaWriter::new();
        w.write_u8(0);
        w.write_u16(self.fields.len() as u16);
        for (spec, (_, offset, tag)) in self.fields.iter().zip(laid_out) {
            w.write_str(&spec.name);
            w.write_u32(*offset as u32);
            match &spec.kind {
                FieldKindSpec::Standard(encoding) => w.write_str(encoding),
                FieldKindSpec::Compact(_) => w.write_str(&standard_encoding(tag)),
            }
            w.write_u8(spec.qualifier.to_byte());
        }
        w.into_vec()
    }

    fn encode_compact(&self, laid_out: &[(String, usize, TypeTag)]) -> Vec<u8> {
        let mut w = MetaWriter::new();
        w.write_u8(FLAG_COMPACT);
        w.write_u32(self.fields.len() as u32);

        let mut names = Vec::new();
        for spec in &self.fields {
            names.extend_from_slice(spec.name.as_bytes());
            names.push(0);
        }
        w.write_u32(names.len() as u32);
        w.write_bytes(&names);

        for (_, offset, _) in laid_out {
            w.write_u32(*offset as u32);
        }
        for spec in &self.fields {
            w.write_u8(spec.qualifier.to_byte());
        }
        for spec in &self.fields {
            match &spec.kind {
                FieldKindSpec::Compact(kind) => kind.write(&mut w),
                FieldKindSpec::Standard(encoding) => {
                    CompactKind::BareOptional(encoding.clone()).write(&mut w)
                }
            }
        }
        w.into_vec()
    }
}

/// Standard encoding for a decoded tag (used when a compact field is
/// re-described in a standard table).
pub fn standard_encoding(tag: &TypeTag) -> String {
    match tag {
        TypeTag::Void => "v".to_string(),
        TypeTag::Scalar(kind) => kind.code().to_string(),
        TypeTag::Selector => ":".to_string(),
        TypeTag::String => "*".to_string(),
        TypeTag::Reference(Some(name)) => format!("@\"{name}\""),
        TypeTag::Reference(None) => "@".to_string(),
        TypeTag::Protocol(name) => format!("@\"<{name}>\""),
        TypeTag::Function => "@?".to_string(),
        TypeTag::ClassMetatype => "#".to_string(),
        TypeTag::RawPointer(Some(pointee)) => match parse_encoding(pointee) {
            Ok(_) => format!("^{pointee}"),
            Err(_) => format!("^{{{pointee}}}"),
        },
        TypeTag::RawPointer(None) => "^v".to_string(),
        TypeTag::Aggregate { encoding, .. } => encoding.clone(),
        TypeTag::Unknown(_) => "?".to_string(),
    }
}

#[derive(Default)]
pub struct MetaWriter {
    buf: Vec<u8>,
}

impl MetaWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
}

pub struct MetaReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MetaReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or(DecodeError::Truncated {
                at: self.pos,
                need: n,
            })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.take(n)
    }

    pub fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| DecodeError::InvalidUtf8)
    }

    pub fn ensure_empty(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(DecodeError::TrailingBytes(n)),
        }
    }
}
