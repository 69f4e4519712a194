//! Render-time reads of field storage.
//!
//! Scalars are never cached: every render re-reads the bytes under the guard,
//! so a fragment always shows the current value (or `#INVALID` once the owning
//! object is gone).

use heapscope_runtime::encoding::{aggregate_members, member_layout, EncodingError};
use heapscope_runtime::{protect, ClassId, Fault, Heap, ObjectRef, TypeTag, REF_SIZE};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rendered {
    Text(String),
    Nil,
    Invalid,
    /// Aggregate decoding failed.
    RaisedException,
}

pub fn read_field(heap: &Heap, obj: ObjectRef, offset: usize, tag: &TypeTag) -> Rendered {
    match protect(|| read_guarded(heap, obj, offset, tag)) {
        Ok(rendered) => rendered,
        Err(Fault::IllegalInstruction(_)) if matches!(tag, TypeTag::Aggregate { .. }) => {
            Rendered::RaisedException
        }
        Err(_) => Rendered::Invalid,
    }
}

fn read_guarded(
    heap: &Heap,
    obj: ObjectRef,
    offset: usize,
    tag: &TypeTag,
) -> Result<Rendered, Fault> {
    let rendered = match tag {
        TypeTag::Void => Rendered::Text("void".to_owned()),
        TypeTag::Scalar(kind) => {
            let bytes = heap.read_bytes(obj, offset, kind.size())?;
            match kind.decode(&bytes) {
                Some(value) => Rendered::Text(value.to_string()),
                None => return Err(Fault::Bus(format!("short read of {}", kind.name()))),
            }
        }
        TypeTag::String => match heap.read_ref(obj, offset)? {
            None => Rendered::Nil,
            Some(text) => Rendered::Text(format!("\"{}\"", heap.text(text)?)),
        },
        TypeTag::Selector => {
            let index = read_u32(heap, obj, offset)?;
            Rendered::Text(heap.symbol(index).unwrap_or_else(|| format!("?sel#{index}")))
        }
        TypeTag::ClassMetatype => match ClassId::from_raw(read_u32(heap, obj, offset)?) {
            None => Rendered::Nil,
            Some(class) => match heap.class(class) {
                Some(meta) => Rendered::Text(meta.name.clone()),
                None => return Err(Fault::Segmentation(format!("no class #{}", class.index()))),
            },
        },
        TypeTag::RawPointer(_) | TypeTag::Function => {
            Rendered::Text(format_address(read_u64(heap, obj, offset)?))
        }
        TypeTag::Reference(_) | TypeTag::Protocol(_) => match heap.read_ref(obj, offset)? {
            None => Rendered::Nil,
            Some(target) => Rendered::Text(target.to_string()),
        },
        TypeTag::Aggregate { encoding, .. } => {
            let size = match tag.size() {
                Ok(size) => size,
                Err(_) => return Ok(Rendered::RaisedException),
            };
            let bytes = heap.read_bytes(obj, offset, size)?;
            match format_aggregate(&bytes, encoding) {
                Ok(text) => Rendered::Text(text),
                Err(_) => Rendered::RaisedException,
            }
        }
        TypeTag::Unknown(_) => Rendered::Text("?".to_owned()),
    };
    Ok(rendered)
}

fn read_u32(heap: &Heap, obj: ObjectRef, offset: usize) -> Result<u32, Fault> {
    let bytes = heap.read_bytes(obj, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_u64(heap: &Heap, obj: ObjectRef, offset: usize) -> Result<u64, Fault> {
    let bytes = heap.read_bytes(obj, offset, REF_SIZE)?;
    let mut raw = [0u8; REF_SIZE];
    raw.copy_from_slice(&bytes);
    Ok(u64::from_le_bytes(raw))
}

pub fn format_address(address: u64) -> String {
    if address == 0 {
        "NULL".to_owned()
    } else {
        format!("0x{address:x}")
    }
}

/// Format inline struct storage. Name annotations are used for labels only;
/// layout is computed from the stripped encoding.
pub fn format_aggregate(bytes: &[u8], encoding: &str) -> Result<String, EncodingError> {
    let members = aggregate_members(encoding)?;
    let layout = member_layout(&members)?;
    let names = member_names(encoding);

    let mut parts = Vec::with_capacity(members.len());
    for (index, (member, offset)) in members.iter().zip(&layout.offsets).enumerate() {
        let value = format_member(bytes.get(*offset..).unwrap_or_default(), member)?;
        match names.get(index).filter(|_| names.len() == members.len()) {
            Some(name) => parts.push(format!("{name}={value}")),
            None => parts.push(value),
        }
    }
    Ok(format!("{{{}}}", parts.join(", ")))
}

fn format_member(bytes: &[u8], member: &TypeTag) -> Result<String, EncodingError> {
    let short = || EncodingError::Unsized(member.describe());
    match member {
        TypeTag::Scalar(kind) => kind.decode(bytes).map(|v| v.to_string()).ok_or_else(short),
        TypeTag::Aggregate { encoding, .. } => {
            let size = member.size()?;
            format_aggregate(bytes.get(..size).ok_or_else(short)?, encoding)
        }
        TypeTag::Selector | TypeTag::ClassMetatype => {
            let raw = bytes.get(..4).ok_or_else(short)?;
            Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]).to_string())
        }
        TypeTag::String
        | TypeTag::Reference(_)
        | TypeTag::Protocol(_)
        | TypeTag::Function
        | TypeTag::RawPointer(_) => {
            let raw = bytes.get(..REF_SIZE).ok_or_else(short)?;
            let mut word = [0u8; REF_SIZE];
            word.copy_from_slice(raw);
            Ok(format_address(u64::from_le_bytes(word)))
        }
        TypeTag::Void | TypeTag::Unknown(_) => Ok("?".to_owned()),
    }
}

/// Top-level member names of an annotated aggregate (`{P="x"d"y"d}`).
fn member_names(encoding: &str) -> Vec<String> {
    let Some(eq) = encoding.find('=') else {
        return Vec::new();
    };
    let mut names = Vec::new();
    let mut depth = 0usize;
    let mut chars = encoding[eq + 1..].chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                let name: String = chars.by_ref().take_while(|c| *c != '"').collect();
                if depth == 0 {
                    names.push(name);
                }
            }
            '{' => depth += 1,
            '}' if depth == 0 => break,
            '}' => depth -= 1,
            _ => {}
        }
    }
    names
}
