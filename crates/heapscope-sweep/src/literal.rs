//! Literal parsing for field writes.

use heapscope_runtime::encoding::{aggregate_members, member_layout, EncodingError, ScalarValue};
use heapscope_runtime::{protect, Heap, ScalarKind, TypeTag, REF_SIZE};
use thiserror::Error;

use crate::path_table::{PathId, PathTable};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LiteralError {
    #[error("expected {expected}, got {literal:?}")]
    Malformed {
        expected: &'static str,
        literal: String,
    },
    #[error(transparent)]
    Range(#[from] EncodingError),
    #[error("unknown class {0:?}")]
    UnknownClass(String),
    #[error("unknown path id {0:?}")]
    UnknownPath(String),
    #[error("node {0} does not address a live object")]
    DeadTarget(PathId),
    #[error("fields of type {0} cannot be written")]
    Unsupported(String),
}

fn malformed(expected: &'static str, literal: &str) -> LiteralError {
    LiteralError::Malformed {
        expected,
        literal: literal.to_owned(),
    }
}

fn is_nil(literal: &str) -> bool {
    matches!(literal, "nil" | "null" | "NULL" | "None")
}

/// Encode `literal` as storage bytes for a field of type `tag`.
///
/// Strings allocate a fresh text object; `@<pathId>` stores the object behind
/// another node of the same session.
pub fn encode_literal(
    heap: &Heap,
    table: &PathTable,
    tag: &TypeTag,
    literal: &str,
) -> Result<Vec<u8>, LiteralError> {
    let literal = literal.trim();
    match tag {
        TypeTag::Scalar(kind) => Ok(kind.encode(parse_scalar(*kind, literal)?)?),
        TypeTag::String => {
            if is_nil(literal) {
                return Ok(vec![0; REF_SIZE]);
            }
            let text = heap.alloc_text(unquote(literal));
            Ok(text.to_le_bytes().to_vec())
        }
        TypeTag::Reference(_) | TypeTag::Protocol(_) => {
            if is_nil(literal) {
                return Ok(vec![0; REF_SIZE]);
            }
            let raw = literal
                .strip_prefix('@')
                .ok_or_else(|| malformed("nil or @<pathId>", literal))?;
            let id: PathId = raw
                .parse()
                .map_err(|_| LiteralError::UnknownPath(raw.to_owned()))?;
            let obj = table
                .node(id)
                .and_then(|node| node.object())
                .ok_or_else(|| LiteralError::UnknownPath(raw.to_owned()))?;
            protect(|| heap.resolve(obj)).map_err(|_| LiteralError::DeadTarget(id))?;
            Ok(obj.to_le_bytes().to_vec())
        }
        TypeTag::ClassMetatype => {
            if is_nil(literal) {
                return Ok(0u32.to_le_bytes().to_vec());
            }
            let meta = heap
                .class_by_name(literal)
                .ok_or_else(|| LiteralError::UnknownClass(literal.to_owned()))?;
            Ok(meta.id.to_raw().to_le_bytes().to_vec())
        }
        TypeTag::Selector => {
            if literal.is_empty() || literal.contains(char::is_whitespace) {
                return Err(malformed("selector name", literal));
            }
            Ok(heap.intern_symbol(literal).to_le_bytes().to_vec())
        }
        TypeTag::RawPointer(_) | TypeTag::Function => {
            let address = if is_nil(literal) {
                0
            } else {
                parse_unsigned(literal).ok_or_else(|| malformed("address", literal))?
            };
            Ok(address.to_le_bytes().to_vec())
        }
        TypeTag::Aggregate { encoding, .. } => encode_aggregate(encoding, literal),
        TypeTag::Void | TypeTag::Unknown(_) => Err(LiteralError::Unsupported(tag.describe())),
    }
}

fn parse_scalar(kind: ScalarKind, literal: &str) -> Result<ScalarValue, LiteralError> {
    match kind {
        ScalarKind::Bool => match literal.to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(ScalarValue::Bool(true)),
            "false" | "no" | "0" => Ok(ScalarValue::Bool(false)),
            _ => Err(malformed("boolean", literal)),
        },
        ScalarKind::F32 | ScalarKind::F64 => literal
            .parse::<f64>()
            .map(ScalarValue::Float)
            .map_err(|_| malformed("number", literal)),
        _ => {
            let value = parse_integer(literal).ok_or_else(|| malformed("integer", literal))?;
            let converted = if value < 0 {
                i64::try_from(value).map(ScalarValue::Int)
            } else {
                u64::try_from(value).map(ScalarValue::UInt)
            };
            converted.map_err(|_| {
                LiteralError::Range(EncodingError::OutOfRange {
                    kind,
                    value: literal.to_owned(),
                })
            })
        }
    }
}

fn parse_integer(literal: &str) -> Option<i128> {
    let (negative, digits) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal.strip_prefix('+').unwrap_or(literal)),
    };
    let hex = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"));
    // Only one sign, and only before the radix prefix.
    if hex.unwrap_or(digits).starts_with(['+', '-']) {
        return None;
    }
    let magnitude = match hex {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn parse_unsigned(literal: &str) -> Option<u64> {
    u64::try_from(parse_integer(literal)?).ok()
}

fn unquote(literal: &str) -> String {
    let Some(inner) = literal
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return literal.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            },
            other => out.push(other),
        }
    }
    out
}

/// `{1, 2.5}` or `{x=1, y=2.5}` for aggregates of scalars.
fn encode_aggregate(encoding: &str, literal: &str) -> Result<Vec<u8>, LiteralError> {
    let members = aggregate_members(encoding)?;
    let layout = member_layout(&members)?;
    let body = literal
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| malformed("{v1, v2, ...}", literal))?;
    let values: Vec<&str> = body.split(',').map(str::trim).collect();
    if values.len() != members.len() {
        return Err(malformed("one value per struct member", literal));
    }

    let mut bytes = vec![0u8; layout.size];
    for ((member, offset), value) in members.iter().zip(&layout.offsets).zip(values) {
        let TypeTag::Scalar(kind) = member else {
            return Err(LiteralError::Unsupported(member.describe()));
        };
        let value = value.split_once('=').map_or(value, |(_, v)| v.trim());
        let encoded = kind.encode(parse_scalar(*kind, value)?)?;
        bytes[*offset..*offset + encoded.len()].copy_from_slice(&encoded);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use heapscope_runtime::ObjectRef;

    use super::*;

    fn encode(tag: &TypeTag, literal: &str) -> Result<Vec<u8>, LiteralError> {
        encode_literal(&Heap::new(), &PathTable::new(), tag, literal)
    }

    #[test]
    fn integers_are_range_checked_per_width() {
        let i8_tag = TypeTag::Scalar(ScalarKind::I8);
        assert_eq!(encode(&i8_tag, "-128").unwrap(), vec![0x80]);
        assert!(matches!(encode(&i8_tag, "128"), Err(LiteralError::Range(_))));
        let u16_tag = TypeTag::Scalar(ScalarKind::U16);
        assert_eq!(encode(&u16_tag, "0xff").unwrap(), vec![0xff, 0]);
        assert!(matches!(encode(&u16_tag, "-1"), Err(LiteralError::Range(_))));
        assert!(matches!(
            encode(&u16_tag, "twelve"),
            Err(LiteralError::Malformed { .. })
        ));
    }

    #[test]
    fn integers_take_a_single_leading_sign() {
        let tag = TypeTag::Scalar(ScalarKind::I32);
        assert_eq!(encode(&tag, "+5").unwrap(), 5i32.to_le_bytes());
        assert_eq!(encode(&tag, "-0x10").unwrap(), (-16i32).to_le_bytes());
        for bad in ["--5", "+-5", "-+5", "-0x-5", "0x+5"] {
            assert!(
                matches!(encode(&tag, bad), Err(LiteralError::Malformed { .. })),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn booleans_accept_common_spellings() {
        let tag = TypeTag::Scalar(ScalarKind::Bool);
        for yes in ["true", "YES", "1"] {
            assert_eq!(encode(&tag, yes).unwrap(), vec![1]);
        }
        for no in ["false", "no", "0"] {
            assert_eq!(encode(&tag, no).unwrap(), vec![0]);
        }
        assert!(encode(&tag, "maybe").is_err());
    }

    #[test]
    fn strings_allocate_text_objects() {
        let heap = Heap::new();
        let bytes =
            encode_literal(&heap, &PathTable::new(), &TypeTag::String, "\"a \\\"b\\\"\"").unwrap();
        let obj = ObjectRef::from_le_bytes(bytes.try_into().unwrap()).unwrap();
        assert_eq!(heap.text(obj).unwrap(), "a \"b\"");
        assert_eq!(encode(&TypeTag::String, "nil").unwrap(), vec![0; REF_SIZE]);
    }

    #[test]
    fn references_need_known_path_ids() {
        let tag = TypeTag::Reference(None);
        assert_eq!(encode(&tag, "nil").unwrap(), vec![0; REF_SIZE]);
        assert!(matches!(encode(&tag, "@7"), Err(LiteralError::UnknownPath(_))));
        assert!(matches!(encode(&tag, "7"), Err(LiteralError::Malformed { .. })));
    }

    #[test]
    fn aggregates_take_one_value_per_member() {
        let encoding = "{Point=\"x\"d\"y\"d}";
        let tag = TypeTag::Aggregate {
            name: "Point".into(),
            encoding: encoding.into(),
        };
        let bytes = encode(&tag, "{x=1.5, y=-2}").unwrap();
        assert_eq!(&bytes[..8], &1.5f64.to_le_bytes());
        assert_eq!(&bytes[8..], &(-2.0f64).to_le_bytes());
        assert!(encode(&tag, "{1}").is_err());
    }

    #[test]
    fn class_and_pointer_literals() {
        let heap = Heap::new();
        let table = PathTable::new();
        let object = heap.class_by_name("Object").unwrap();
        assert_eq!(
            encode_literal(&heap, &table, &TypeTag::ClassMetatype, "Object").unwrap(),
            object.id.to_raw().to_le_bytes().to_vec()
        );
        assert!(matches!(
            encode_literal(&heap, &table, &TypeTag::ClassMetatype, "Nope"),
            Err(LiteralError::UnknownClass(_))
        ));
        assert_eq!(
            encode(&TypeTag::RawPointer(None), "0x10").unwrap(),
            16u64.to_le_bytes().to_vec()
        );
    }
}
