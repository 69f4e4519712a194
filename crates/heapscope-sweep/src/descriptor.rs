//! Type descriptors decoded from raw class metadata.
//!
//! Both metadata dialects normalize into [`TypeDescriptor`]; nothing past this
//! module knows which one a class used.

use std::collections::HashMap;
use std::sync::Arc;

use heapscope_runtime::encoding::parse_encoding;
use heapscope_runtime::metadata::{
    standard_encoding, DecodeError, MetaReader, FLAG_COMPACT, KIND_CLASS_MIN,
    KIND_FUNCTION, KIND_NATIVE_CLASS, KIND_OPTIONAL, KIND_POINTER, KIND_PROTOCOL, KIND_RAW,
};
use heapscope_runtime::{protect, ClassId, CompactKind, Fault, Heap, ObjectRef, Qualifier, TypeTag};
use thiserror::Error;

/// Optional records nested deeper than this are rejected as corrupt.
const MAX_OPTIONAL_DEPTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Standard,
    Compact,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: String,
    pub storage_offset: usize,
    pub encoded_type: TypeTag,
    pub qualifier: Qualifier,
    /// Standard-notation encoding, shown by class views.
    pub encoding: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub type_name: String,
    pub class: ClassId,
    pub superclass: Option<ClassId>,
    pub superclass_name: Option<String>,
    pub dialect: Dialect,
    /// Fields declared by this class only, in declaration order.
    pub fields: Vec<FieldDescriptor>,
}

impl TypeDescriptor {
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Fault(#[from] Fault),
    #[error("unknown class #{0}")]
    UnknownClass(usize),
}

/// Decode a raw metadata blob into its dialect and field list.
pub fn decode_fields(blob: &[u8]) -> Result<(Dialect, Vec<FieldDescriptor>), DecodeError> {
    if blob.is_empty() {
        return Err(DecodeError::Empty);
    }
    let mut r = MetaReader::new(blob);
    let flags = r.read_u8()?;
    let decoded = if flags & FLAG_COMPACT != 0 {
        (Dialect::Compact, decode_compact(&mut r)?)
    } else {
        (Dialect::Standard, decode_standard(&mut r)?)
    };
    r.ensure_empty()?;
    Ok(decoded)
}

fn decode_standard(r: &mut MetaReader<'_>) -> Result<Vec<FieldDescriptor>, DecodeError> {
    let count = r.read_u16()?;
    let mut fields = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = r.read_str()?;
        let storage_offset = r.read_u32()? as usize;
        let encoding = r.read_str()?;
        let qualifier = Qualifier::from_byte(r.read_u8()?)?;
        let encoded_type = parse_encoding(&encoding)?;
        fields.push(FieldDescriptor {
            name,
            storage_offset,
            encoded_type,
            qualifier,
            encoding,
        });
    }
    Ok(fields)
}

fn decode_compact(r: &mut MetaReader<'_>) -> Result<Vec<FieldDescriptor>, DecodeError> {
    let count = r.read_u32()? as usize;
    let names_len = r.read_u32()? as usize;
    let names = split_name_table(r.read_bytes(names_len)?)?;
    if names.len() != count {
        return Err(DecodeError::NameCountMismatch {
            expected: count,
            found: names.len(),
        });
    }

    let offsets = (0..count)
        .map(|_| r.read_u32().map(|offset| offset as usize))
        .collect::<Result<Vec<_>, _>>()?;
    let qualifiers = (0..count)
        .map(|_| r.read_u8().and_then(Qualifier::from_byte))
        .collect::<Result<Vec<_>, _>>()?;

    let mut fields = Vec::with_capacity(count);
    for ((name, storage_offset), qualifier) in names.into_iter().zip(offsets).zip(qualifiers) {
        let kind = read_kind(r, 0)?;
        let encoded_type = kind.type_tag()?;
        fields.push(FieldDescriptor {
            name,
            storage_offset,
            encoding: standard_encoding(&encoded_type),
            encoded_type,
            qualifier,
        });
    }
    Ok(fields)
}

fn split_name_table(bytes: &[u8]) -> Result<Vec<String>, DecodeError> {
    let mut parts: Vec<&[u8]> = bytes.split(|b| *b == 0).collect();
    // The table is NUL-terminated, so splitting leaves one empty tail.
    if parts.last().is_some_and(|last| last.is_empty()) {
        parts.pop();
    }
    parts
        .into_iter()
        .map(|part| {
            std::str::from_utf8(part)
                .map(str::to_owned)
                .map_err(|_| DecodeError::InvalidUtf8)
        })
        .collect()
}

fn read_kind(r: &mut MetaReader<'_>, depth: usize) -> Result<CompactKind, DecodeError> {
    if depth > MAX_OPTIONAL_DEPTH {
        return Err(DecodeError::NestingTooDeep(MAX_OPTIONAL_DEPTH));
    }
    let kind = r.read_u16()?;
    let decoded = match kind {
        KIND_RAW => CompactKind::Raw(r.read_str()?),
        KIND_OPTIONAL => match r.read_u8()? {
            0 => CompactKind::BareOptional(r.read_str()?),
            _ => CompactKind::Optional(Box::new(read_kind(r, depth + 1)?)),
        },
        KIND_FUNCTION => CompactKind::Function,
        KIND_PROTOCOL => CompactKind::Protocol(r.read_str()?),
        KIND_NATIVE_CLASS => CompactKind::NativeClass(r.read_str()?),
        KIND_POINTER => CompactKind::Pointer(r.read_str()?),
        k if k >= KIND_CLASS_MIN => CompactKind::Class(r.read_str()?),
        other => return Err(DecodeError::UnknownKind(other)),
    };
    Ok(decoded)
}

/// Session-scoped descriptor cache.
///
/// Classes are immutable for the lifetime of a session, so a class is decoded
/// at most once; failures are cached too.
pub struct TypeResolver {
    heap: Arc<Heap>,
    cache: HashMap<ClassId, Result<Arc<TypeDescriptor>, ResolveError>>,
}

impl TypeResolver {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self {
            heap,
            cache: HashMap::new(),
        }
    }

    /// Descriptor of the concrete class of `obj`.
    pub fn describe(&mut self, obj: ObjectRef) -> Result<Arc<TypeDescriptor>, ResolveError> {
        let class = protect(|| self.heap.resolve(obj))?.class;
        self.describe_class(class)
    }

    pub fn describe_class(&mut self, class: ClassId) -> Result<Arc<TypeDescriptor>, ResolveError> {
        if let Some(cached) = self.cache.get(&class) {
            return cached.clone();
        }
        let resolved = self.decode_class(class);
        if let Err(err) = &resolved {
            tracing::debug!(target: "heapscope.sweep", class = class.index(), error = %err, "type descriptor unavailable");
        }
        self.cache.insert(class, resolved.clone());
        resolved
    }

    fn decode_class(&self, class: ClassId) -> Result<Arc<TypeDescriptor>, ResolveError> {
        let meta = self
            .heap
            .class(class)
            .ok_or(ResolveError::UnknownClass(class.index()))?;
        // Decoding foreign metadata runs under the guard like any other probe.
        let (dialect, fields) = protect(|| Ok(decode_fields(&meta.metadata)))??;
        let superclass_name = meta
            .superclass
            .and_then(|id| self.heap.class(id))
            .map(|superclass| superclass.name.clone());
        Ok(Arc::new(TypeDescriptor {
            type_name: meta.name.clone(),
            class,
            superclass: meta.superclass,
            superclass_name,
            dialect,
            fields,
        }))
    }

    /// Find a field by name along the class chain starting at `class`,
    /// most-derived declaration first.
    pub fn find_field(
        &mut self,
        class: ClassId,
        name: &str,
    ) -> Result<Option<FieldDescriptor>, ResolveError> {
        let mut current = Some(class);
        while let Some(id) = current {
            let descriptor = self.describe_class(id)?;
            if let Some(field) = descriptor.field(name) {
                return Ok(Some(field.clone()));
            }
            current = descriptor.superclass;
        }
        Ok(None)
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }
}
