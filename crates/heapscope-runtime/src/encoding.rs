//! Type-encoding vocabulary shared by both metadata dialects.
//!
//! The standard dialect stores a compact type-encoding string per field
//! (`i`, `d`, `@"Widget"`, `{Point="x"d"y"d}`, ...). The compact dialect is
//! translated into the same [`TypeTag`] values, so everything downstream of
//! the resolver is dialect-agnostic.

use thiserror::Error;

use crate::REF_SIZE;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("empty type encoding")]
    Empty,
    #[error("unexpected {found:?} at byte {at} of type encoding {encoding:?}")]
    Unexpected {
        encoding: String,
        at: usize,
        found: char,
    },
    #[error("unterminated type encoding {0:?}")]
    Unterminated(String),
    #[error("aggregate {0:?} has no member layout")]
    OpaqueAggregate(String),
    #[error("type {0:?} has no storage size")]
    Unsized(String),
    #[error("value {value} does not fit in {kind:?}")]
    OutOfRange { kind: ScalarKind, value: String },
    #[error("type encoding nests deeper than {0} levels")]
    NestingTooDeep(usize),
}

pub type Result<T> = std::result::Result<T, EncodingError>;

/// Pointer and aggregate nesting beyond this is treated as corrupt metadata.
pub const MAX_NESTING: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScalarKind {
    Bool,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl ScalarKind {
    pub fn size(self) -> usize {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
        }
    }

    /// Standard-dialect code for this scalar.
    pub fn code(self) -> char {
        match self {
            ScalarKind::Bool => 'B',
            ScalarKind::I8 => 'c',
            ScalarKind::U8 => 'C',
            ScalarKind::I16 => 's',
            ScalarKind::U16 => 'S',
            ScalarKind::I32 => 'i',
            ScalarKind::U32 => 'I',
            ScalarKind::I64 => 'q',
            ScalarKind::U64 => 'Q',
            ScalarKind::F32 => 'f',
            ScalarKind::F64 => 'd',
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "int8",
            ScalarKind::U8 => "uint8",
            ScalarKind::I16 => "int16",
            ScalarKind::U16 => "uint16",
            ScalarKind::I32 => "int32",
            ScalarKind::U32 => "uint32",
            ScalarKind::I64 => "int64",
            ScalarKind::U64 => "uint64",
            ScalarKind::F32 => "float",
            ScalarKind::F64 => "double",
        }
    }

    /// Decode little-endian storage. Returns `None` when `bytes` is short.
    pub fn decode(self, bytes: &[u8]) -> Option<ScalarValue> {
        let bytes = bytes.get(..self.size())?;
        let value = match self {
            ScalarKind::Bool => ScalarValue::Bool(bytes[0] != 0),
            ScalarKind::I8 => ScalarValue::Int(i64::from(bytes[0] as i8)),
            ScalarKind::U8 => ScalarValue::UInt(u64::from(bytes[0])),
            ScalarKind::I16 => ScalarValue::Int(i64::from(i16::from_le_bytes([bytes[0], bytes[1]]))),
            ScalarKind::U16 => ScalarValue::UInt(u64::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            ScalarKind::I32 => ScalarValue::Int(i64::from(i32::from_le_bytes(bytes.try_into().ok()?))),
            ScalarKind::U32 => ScalarValue::UInt(u64::from(u32::from_le_bytes(bytes.try_into().ok()?))),
            ScalarKind::I64 => ScalarValue::Int(i64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::U64 => ScalarValue::UInt(u64::from_le_bytes(bytes.try_into().ok()?)),
            ScalarKind::F32 => ScalarValue::Float(f64::from(f32::from_le_bytes(bytes.try_into().ok()?))),
            ScalarKind::F64 => ScalarValue::Float(f64::from_le_bytes(bytes.try_into().ok()?)),
        };
        Some(value)
    }

    /// Encode `value` into little-endian storage, range-checking integers.
    pub fn encode(self, value: ScalarValue) -> Result<Vec<u8>> {
        let out_of_range = || EncodingError::OutOfRange {
            kind: self,
            value: value.to_string(),
        };
        let as_i128 = match value {
            ScalarValue::Bool(b) => i128::from(b),
            ScalarValue::Int(v) => i128::from(v),
            ScalarValue::UInt(v) => i128::from(v),
            ScalarValue::Float(v) => {
                return match self {
                    ScalarKind::F32 => Ok((v as f32).to_le_bytes().to_vec()),
                    ScalarKind::F64 => Ok(v.to_le_bytes().to_vec()),
                    _ => Err(out_of_range()),
                };
            }
        };
        let bytes = match self {
            ScalarKind::Bool => match as_i128 {
                0 | 1 => vec![as_i128 as u8],
                _ => return Err(out_of_range()),
            },
            ScalarKind::I8 => i8::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::U8 => u8::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::I16 => i16::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::U16 => u16::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::I32 => i32::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::U32 => u32::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::I64 => i64::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::U64 => u64::try_from(as_i128).map_err(|_| out_of_range())?.to_le_bytes().to_vec(),
            ScalarKind::F32 => (as_i128 as f32).to_le_bytes().to_vec(),
            ScalarKind::F64 => (as_i128 as f64).to_le_bytes().to_vec(),
        };
        Ok(bytes)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl std::fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScalarValue::Bool(v) => write!(f, "{v}"),
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::UInt(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => f.write_str(&trim_float(*v)),
        }
    }
}

/// Format a float without a trailing `.0` for integral values.
pub fn trim_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Decoded field type, common to both metadata dialects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Void,
    Scalar(ScalarKind),
    /// Interned selector/symbol (stored as a `u32` symbol index).
    Selector,
    /// Text stored as a reference to a `String` object.
    String,
    /// Object reference, optionally with the declared class name.
    Reference(Option<String>),
    /// Protocol existential: an object reference known only by its protocol.
    Protocol(String),
    /// Closure or block value (opaque code address).
    Function,
    /// Reference to a class (stored as raw class id + 1).
    ClassMetatype,
    /// Untyped pointer, rendered as an opaque address.
    RawPointer(Option<String>),
    /// Inline struct; `encoding` keeps the raw `{Name=...}` text including
    /// member name annotations.
    Aggregate { name: String, encoding: String },
    Unknown(String),
}

impl TypeTag {
    /// Whether values of this type are object references the sweep can follow.
    pub fn is_object(&self) -> bool {
        matches!(self, TypeTag::Reference(_) | TypeTag::Protocol(_))
    }

    pub fn size(&self) -> Result<usize> {
        Ok(self.layout()?.0)
    }

    pub fn alignment(&self) -> Result<usize> {
        Ok(self.layout()?.1)
    }

    fn layout(&self) -> Result<(usize, usize)> {
        self.layout_at(0)
    }

    fn layout_at(&self, depth: usize) -> Result<(usize, usize)> {
        if depth > MAX_NESTING {
            return Err(EncodingError::NestingTooDeep(MAX_NESTING));
        }
        match self {
            TypeTag::Void => Ok((0, 1)),
            TypeTag::Scalar(kind) => Ok((kind.size(), kind.size())),
            TypeTag::Selector | TypeTag::ClassMetatype => Ok((4, 4)),
            TypeTag::String
            | TypeTag::Reference(_)
            | TypeTag::Protocol(_)
            | TypeTag::Function
            | TypeTag::RawPointer(_) => Ok((REF_SIZE, REF_SIZE)),
            TypeTag::Aggregate { encoding, .. } => {
                let members = aggregate_members(encoding)?;
                let layout = member_layout_at(&members, depth + 1)?;
                Ok((layout.size, layout.alignment))
            }
            TypeTag::Unknown(enc) => Err(EncodingError::Unsized(enc.clone())),
        }
    }

    /// Short human-readable type name used by class views.
    pub fn describe(&self) -> String {
        match self {
            TypeTag::Void => "void".to_string(),
            TypeTag::Scalar(kind) => kind.name().to_string(),
            TypeTag::Selector => "selector".to_string(),
            TypeTag::String => "string".to_string(),
            TypeTag::Reference(Some(name)) => format!("{name} *"),
            TypeTag::Reference(None) => "object".to_string(),
            TypeTag::Protocol(name) => format!("<{name}>"),
            TypeTag::Function => "closure".to_string(),
            TypeTag::ClassMetatype => "class".to_string(),
            TypeTag::RawPointer(Some(pointee)) => format!("{pointee} *"),
            TypeTag::RawPointer(None) => "pointer".to_string(),
            TypeTag::Aggregate { name, .. } => format!("struct {name}"),
            TypeTag::Unknown(enc) => format!("unknown {enc}"),
        }
    }
}

/// Parse a complete standard-dialect type encoding.
pub fn parse_encoding(encoding: &str) -> Result<TypeTag> {
    if encoding.is_empty() {
        return Err(EncodingError::Empty);
    }
    let (tag, consumed) = parse_one(encoding, 0, 0)?;
    if consumed != encoding.len() {
        let found = encoding[consumed..].chars().next().unwrap_or('\0');
        return Err(EncodingError::Unexpected {
            encoding: encoding.to_string(),
            at: consumed,
            found,
        });
    }
    Ok(tag)
}

/// Parse one type starting at byte `at`; returns the tag and the end offset.
fn parse_one(encoding: &str, at: usize, depth: usize) -> Result<(TypeTag, usize)> {
    if depth > MAX_NESTING {
        return Err(EncodingError::NestingTooDeep(MAX_NESTING));
    }
    let bytes = encoding.as_bytes();
    let Some(&first) = bytes.get(at) else {
        return Err(EncodingError::Unterminated(encoding.to_string()));
    };
    let scalar = |kind| Ok((TypeTag::Scalar(kind), at + 1));
    match first {
        b'B' => scalar(ScalarKind::Bool),
        b'c' => scalar(ScalarKind::I8),
        b'C' => scalar(ScalarKind::U8),
        b's' => scalar(ScalarKind::I16),
        b'S' => scalar(ScalarKind::U16),
        b'i' => scalar(ScalarKind::I32),
        b'I' => scalar(ScalarKind::U32),
        b'l' | b'q' => scalar(ScalarKind::I64),
        b'L' | b'Q' => scalar(ScalarKind::U64),
        b'f' => scalar(ScalarKind::F32),
        b'd' => scalar(ScalarKind::F64),
        b'v' => Ok((TypeTag::Void, at + 1)),
        b':' => Ok((TypeTag::Selector, at + 1)),
        b'#' => Ok((TypeTag::ClassMetatype, at + 1)),
        b'*' => Ok((TypeTag::String, at + 1)),
        b'?' => Ok((TypeTag::Unknown("?".to_string()), at + 1)),
        b'@' => match bytes.get(at + 1) {
            Some(b'?') => Ok((TypeTag::Function, at + 2)),
            Some(b'"') => {
                let start = at + 2;
                let end = encoding[start..]
                    .find('"')
                    .map(|rel| start + rel)
                    .ok_or_else(|| EncodingError::Unterminated(encoding.to_string()))?;
                let name = &encoding[start..end];
                let tag = match name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
                    Some(protocol) => TypeTag::Protocol(protocol.to_string()),
                    None => TypeTag::Reference(Some(name.to_string())),
                };
                Ok((tag, end + 1))
            }
            _ => Ok((TypeTag::Reference(None), at + 1)),
        },
        b'^' => {
            let (_, end) = parse_one(encoding, at + 1, depth + 1)?;
            let pointee = &encoding[at + 1..end];
            Ok((TypeTag::RawPointer(Some(pointee.to_string())), end))
        }
        b'{' => {
            let end = matching_brace(encoding, at)?;
            let body = &encoding[at + 1..end];
            let name_end = body.find('=').unwrap_or(body.len());
            Ok((
                TypeTag::Aggregate {
                    name: body[..name_end].to_string(),
                    encoding: encoding[at..=end].to_string(),
                },
                end + 1,
            ))
        }
        other => Err(EncodingError::Unexpected {
            encoding: encoding.to_string(),
            at,
            found: other as char,
        }),
    }
}

/// Offset of the `}` closing the `{` at `open`, skipping quoted annotations.
fn matching_brace(encoding: &str, open: usize) -> Result<usize> {
    let mut depth = 0usize;
    let mut in_quotes = false;
    for (idx, b) in encoding.bytes().enumerate().skip(open) {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'{' if !in_quotes => {
                depth += 1;
                if depth > MAX_NESTING {
                    return Err(EncodingError::NestingTooDeep(MAX_NESTING));
                }
            }
            b'}' if !in_quotes => {
                depth -= 1;
                if depth == 0 {
                    return Ok(idx);
                }
            }
            _ => {}
        }
    }
    Err(EncodingError::Unterminated(encoding.to_string()))
}

/// Remove inline `"name"` annotations so only storage codes remain.
pub fn strip_names(encoding: &str) -> String {
    let mut out = String::with_capacity(encoding.len());
    let mut in_quotes = false;
    for ch in encoding.chars() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if !in_quotes {
            out.push(ch);
        }
    }
    out
}

/// Member types of an aggregate encoding, after stripping name annotations.
pub fn aggregate_members(encoding: &str) -> Result<Vec<TypeTag>> {
    let clean = strip_names(encoding);
    let (tag, _) = parse_one(&clean, 0, 0)?;
    let TypeTag::Aggregate { name, encoding } = tag else {
        return Err(EncodingError::Unexpected {
            found: clean.chars().next().unwrap_or('\0'),
            encoding: clean,
            at: 0,
        });
    };
    let Some(eq) = encoding.find('=') else {
        return Err(EncodingError::OpaqueAggregate(name));
    };
    let inner_end = encoding.len() - 1;
    let mut members = Vec::new();
    let mut pos = eq + 1;
    while pos < inner_end {
        let (member, next) = parse_one(&encoding, pos, 1)?;
        members.push(member);
        pos = next;
    }
    Ok(members)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemberLayout {
    pub offsets: Vec<usize>,
    pub size: usize,
    pub alignment: usize,
}

/// Natural-alignment layout of a member sequence.
pub fn member_layout(members: &[TypeTag]) -> Result<MemberLayout> {
    member_layout_at(members, 0)
}

fn member_layout_at(members: &[TypeTag], depth: usize) -> Result<MemberLayout> {
    let mut offsets = Vec::with_capacity(members.len());
    let mut offset = 0usize;
    let mut alignment = 1usize;
    for member in members {
        let (size, align) = member.layout_at(depth)?;
        offset = align_up(offset, align);
        offsets.push(offset);
        offset += size;
        alignment = alignment.max(align);
    }
    Ok(MemberLayout {
        offsets,
        size: align_up(offset, alignment),
        alignment,
    })
}

pub fn align_up(offset: usize, align: usize) -> usize {
    if align <= 1 {
        offset
    } else {
        offset.div_ceil(align) * align
    }
}
