use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use crate::encoding::TypeTag;
use crate::guard::Fault;
use crate::metadata::{ClassBuilder, DecodeError};
use crate::{
    ClassId, ObjectRef, ARRAY_CLASS, DICTIONARY_CLASS, REF_SIZE, ROOT_CLASS, SET_CLASS,
    STRING_CLASS,
};

#[derive(Debug, Error)]
pub enum HeapError {
    #[error("class {0:?} is already registered")]
    DuplicateClass(String),
    #[error("unknown class {0:?}")]
    UnknownClass(String),
    #[error("class {class:?} has no field {field:?}")]
    UnknownField { class: String, field: String },
    #[error("invalid metadata for class {class:?}: {source}")]
    Metadata {
        class: String,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Fault(#[from] Fault),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub name: String,
    pub signature: String,
}

/// Registered class. `metadata` is the raw descriptor blob readers decode;
/// `layout` is the host's own bookkeeping used when populating instances.
#[derive(Debug)]
pub struct ClassMeta {
    pub id: ClassId,
    pub name: String,
    pub superclass: Option<ClassId>,
    pub instance_size: usize,
    pub metadata: Vec<u8>,
    pub methods: Vec<MethodInfo>,
    layout: Vec<(String, usize, TypeTag)>,
}

impl ClassMeta {
    /// Offset and type of a declared field of this class (not its superclasses).
    pub fn field_layout(&self, name: &str) -> Option<(usize, &TypeTag)> {
        self.layout
            .iter()
            .find(|(field, _, _)| field == name)
            .map(|(_, offset, tag)| (*offset, tag))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BodyKind {
    Instance,
    Text,
    Array,
    Set,
    Dictionary,
}

#[derive(Clone, Debug)]
pub struct ObjectInfo {
    pub class: ClassId,
    pub kind: BodyKind,
}

/// Members of a collection object, in storage order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Elements {
    Indexed(Vec<Option<ObjectRef>>),
    Unordered(Vec<ObjectRef>),
    Keyed(Vec<(String, Option<ObjectRef>)>),
}

#[derive(Debug)]
enum Body {
    Instance(Vec<u8>),
    Text(String),
    Array(Vec<Option<ObjectRef>>),
    Set(Vec<ObjectRef>),
    Dictionary(Vec<(String, Option<ObjectRef>)>),
}

impl Body {
    fn kind(&self) -> BodyKind {
        match self {
            Body::Instance(_) => BodyKind::Instance,
            Body::Text(_) => BodyKind::Text,
            Body::Array(_) => BodyKind::Array,
            Body::Set(_) => BodyKind::Set,
            Body::Dictionary(_) => BodyKind::Dictionary,
        }
    }
}

#[derive(Debug)]
struct HeapObject {
    class: ClassId,
    body: Body,
    related: Vec<(String, Vec<ObjectRef>)>,
    holds: u32,
    /// Destroyed by the host while a hold was outstanding; reclaimed when the
    /// last hold is released.
    doomed: bool,
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

#[derive(Debug, Default)]
struct HeapInner {
    classes: Vec<Arc<ClassMeta>>,
    class_by_name: HashMap<String, ClassId>,
    /// Index `i` holds slot number `i + 1`.
    slots: Vec<Slot>,
    free: Vec<u32>,
    symbols: Vec<String>,
    symbol_by_name: HashMap<String, u32>,
}

impl HeapInner {
    fn live(&self, obj: ObjectRef) -> Result<&HeapObject, Fault> {
        self.slots
            .get(obj.slot() as usize - 1)
            .filter(|slot| slot.generation == obj.generation())
            .and_then(|slot| slot.object.as_ref())
            .ok_or_else(|| Fault::Segmentation(format!("dangling reference {obj}")))
    }

    fn live_mut(&mut self, obj: ObjectRef) -> Result<&mut HeapObject, Fault> {
        self.slots
            .get_mut(obj.slot() as usize - 1)
            .filter(|slot| slot.generation == obj.generation())
            .and_then(|slot| slot.object.as_mut())
            .ok_or_else(|| Fault::Segmentation(format!("dangling reference {obj}")))
    }

    fn insert(&mut self, class: ClassId, body: Body) -> ObjectRef {
        let object = HeapObject {
            class,
            body,
            related: Vec::new(),
            holds: 0,
            doomed: false,
        };
        if let Some(slot_no) = self.free.pop() {
            let slot = &mut self.slots[slot_no as usize - 1];
            slot.object = Some(object);
            return ObjectRef::new(slot_no, slot.generation);
        }
        self.slots.push(Slot {
            generation: 1,
            object: Some(object),
        });
        ObjectRef::new(self.slots.len() as u32, 1)
    }

    fn free_slot(&mut self, slot_no: u32) {
        let slot = &mut self.slots[slot_no as usize - 1];
        slot.object = None;
        // Exhausted slots are never reused.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(slot_no);
        }
    }

    fn class_named(&self, name: &str) -> Result<ClassId, HeapError> {
        self.class_by_name
            .get(name)
            .copied()
            .ok_or_else(|| HeapError::UnknownClass(name.to_string()))
    }
}

/// The inspected object heap.
///
/// All accessors are checked: a stale reference yields
/// [`Fault::Segmentation`], an access outside an object's storage or of the
/// wrong shape yields [`Fault::Bus`].
#[derive(Debug)]
pub struct Heap {
    inner: RwLock<HeapInner>,
}

impl Heap {
    /// A heap with the built-in classes registered.
    pub fn new() -> Arc<Self> {
        let heap = Self {
            inner: RwLock::new(HeapInner::default()),
        };
        for builder in [
            ClassBuilder::new(ROOT_CLASS),
            ClassBuilder::new(STRING_CLASS),
            ClassBuilder::new(ARRAY_CLASS),
            ClassBuilder::new(SET_CLASS),
            ClassBuilder::new(DICTIONARY_CLASS),
        ] {
            if let Err(err) = heap.register_class(builder) {
                tracing::error!(target: "heapscope.runtime", error = %err, "failed to register built-in class");
            }
        }
        Arc::new(heap)
    }

    pub fn register_class(&self, builder: ClassBuilder) -> Result<ClassId, HeapError> {
        let mut inner = self.inner.write();
        if inner.class_by_name.contains_key(&builder.name) {
            return Err(HeapError::DuplicateClass(builder.name));
        }

        let superclass = match builder.superclass.as_deref() {
            Some(name) => Some(inner.class_named(name)?),
            None if builder.name == ROOT_CLASS => None,
            None => Some(inner.class_named(ROOT_CLASS)?),
        };
        let base = superclass
            .map(|id| inner.classes[id.index()].instance_size)
            .unwrap_or(0);
        let laid_out = builder.lay_out(base).map_err(|source| HeapError::Metadata {
            class: builder.name.clone(),
            source,
        })?;

        let id = ClassId::from_index(inner.classes.len());
        let meta = ClassMeta {
            id,
            name: builder.name.clone(),
            superclass,
            instance_size: laid_out.instance_size,
            metadata: laid_out.metadata,
            methods: builder
                .methods
                .into_iter()
                .map(|(name, signature)| MethodInfo { name, signature })
                .collect(),
            layout: laid_out.fields,
        };
        tracing::debug!(
            target: "heapscope.runtime",
            class = %meta.name,
            size = meta.instance_size,
            "registered class"
        );
        inner.classes.push(Arc::new(meta));
        inner.class_by_name.insert(builder.name, id);
        Ok(id)
    }

    pub fn class(&self, id: ClassId) -> Option<Arc<ClassMeta>> {
        self.inner.read().classes.get(id.index()).cloned()
    }

    pub fn class_by_name(&self, name: &str) -> Option<Arc<ClassMeta>> {
        let inner = self.inner.read();
        let id = inner.class_by_name.get(name)?;
        inner.classes.get(id.index()).cloned()
    }

    pub fn alloc(&self, class: ClassId) -> Result<ObjectRef, HeapError> {
        let meta = self
            .class(class)
            .ok_or_else(|| HeapError::UnknownClass(format!("#{}", class.index())))?;
        let body = Body::Instance(vec![0; meta.instance_size]);
        Ok(self.inner.write().insert(class, body))
    }

    pub fn alloc_named(&self, class: &str) -> Result<ObjectRef, HeapError> {
        let id = self.inner.read().class_named(class)?;
        self.alloc(id)
    }

    pub fn alloc_text(&self, text: impl Into<String>) -> ObjectRef {
        self.alloc_builtin(STRING_CLASS, Body::Text(text.into()))
    }

    pub fn alloc_array(&self, elements: Vec<Option<ObjectRef>>) -> ObjectRef {
        self.alloc_builtin(ARRAY_CLASS, Body::Array(elements))
    }

    pub fn alloc_set(&self, members: Vec<ObjectRef>) -> ObjectRef {
        self.alloc_builtin(SET_CLASS, Body::Set(members))
    }

    pub fn alloc_dictionary(&self, entries: Vec<(String, Option<ObjectRef>)>) -> ObjectRef {
        self.alloc_builtin(DICTIONARY_CLASS, Body::Dictionary(entries))
    }

    fn alloc_builtin(&self, class: &str, body: Body) -> ObjectRef {
        let mut inner = self.inner.write();
        // Built-in classes are registered by `Heap::new` and cannot be removed.
        let id = inner.class_by_name[class];
        inner.insert(id, body)
    }

    /// Attach a host-declared related-object collection (e.g. sub-views).
    pub fn set_related(
        &self,
        obj: ObjectRef,
        name: impl Into<String>,
        members: Vec<ObjectRef>,
    ) -> Result<(), Fault> {
        let mut inner = self.inner.write();
        let object = inner.live_mut(obj)?;
        let name = name.into();
        match object.related.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, existing)) => *existing = members,
            None => object.related.push((name, members)),
        }
        Ok(())
    }

    pub fn related(&self, obj: ObjectRef) -> Result<Vec<(String, Vec<ObjectRef>)>, Fault> {
        Ok(self.inner.read().live(obj)?.related.clone())
    }

    pub fn resolve(&self, obj: ObjectRef) -> Result<ObjectInfo, Fault> {
        let inner = self.inner.read();
        let object = inner.live(obj)?;
        Ok(ObjectInfo {
            class: object.class,
            kind: object.body.kind(),
        })
    }

    pub fn is_live(&self, obj: ObjectRef) -> bool {
        self.inner.read().live(obj).is_ok()
    }

    pub fn read_bytes(&self, obj: ObjectRef, offset: usize, len: usize) -> Result<Vec<u8>, Fault> {
        let inner = self.inner.read();
        let Body::Instance(storage) = &inner.live(obj)?.body else {
            return Err(Fault::Bus(format!("{obj} has no instance storage")));
        };
        offset
            .checked_add(len)
            .and_then(|end| storage.get(offset..end))
            .map(<[u8]>::to_vec)
            .ok_or_else(|| {
                Fault::Bus(format!(
                    "read of {len} bytes at offset {offset} outside {} bytes of {obj}",
                    storage.len()
                ))
            })
    }

    pub fn write_bytes(&self, obj: ObjectRef, offset: usize, bytes: &[u8]) -> Result<(), Fault> {
        let mut inner = self.inner.write();
        let Body::Instance(storage) = &mut inner.live_mut(obj)?.body else {
            return Err(Fault::Bus(format!("{obj} has no instance storage")));
        };
        let size = storage.len();
        let target = offset
            .checked_add(bytes.len())
            .and_then(|end| storage.get_mut(offset..end))
            .ok_or_else(|| {
                Fault::Bus(format!(
                    "write of {} bytes at offset {offset} outside {size} bytes of {obj}",
                    bytes.len()
                ))
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    pub fn read_ref(&self, obj: ObjectRef, offset: usize) -> Result<Option<ObjectRef>, Fault> {
        let bytes = self.read_bytes(obj, offset, REF_SIZE)?;
        let mut raw = [0u8; REF_SIZE];
        raw.copy_from_slice(&bytes);
        Ok(ObjectRef::from_le_bytes(raw))
    }

    pub fn write_ref(
        &self,
        obj: ObjectRef,
        offset: usize,
        value: Option<ObjectRef>,
    ) -> Result<(), Fault> {
        let bytes = value.map(ObjectRef::to_le_bytes).unwrap_or([0; REF_SIZE]);
        self.write_bytes(obj, offset, &bytes)
    }

    /// Host-side convenience: store into a field declared by `obj`'s class
    /// chain, looked up through the host layout.
    pub fn set_field(&self, obj: ObjectRef, field: &str, bytes: &[u8]) -> Result<(), HeapError> {
        let (offset, _) = self.host_field(obj, field)?;
        Ok(self.write_bytes(obj, offset, bytes)?)
    }

    pub fn set_ref_field(
        &self,
        obj: ObjectRef,
        field: &str,
        value: Option<ObjectRef>,
    ) -> Result<(), HeapError> {
        let (offset, _) = self.host_field(obj, field)?;
        Ok(self.write_ref(obj, offset, value)?)
    }

    fn host_field(&self, obj: ObjectRef, field: &str) -> Result<(usize, TypeTag), HeapError> {
        let mut class = Some(self.resolve(obj)?.class);
        let mut class_name = None;
        while let Some(id) = class {
            let Some(meta) = self.class(id) else { break };
            if let Some((offset, tag)) = meta.field_layout(field) {
                return Ok((offset, tag.clone()));
            }
            class_name.get_or_insert_with(|| meta.name.clone());
            class = meta.superclass;
        }
        Err(HeapError::UnknownField {
            class: class_name.unwrap_or_default(),
            field: field.to_string(),
        })
    }

    pub fn text(&self, obj: ObjectRef) -> Result<String, Fault> {
        match &self.inner.read().live(obj)?.body {
            Body::Text(text) => Ok(text.clone()),
            _ => Err(Fault::Bus(format!("{obj} is not a string"))),
        }
    }

    pub fn elements(&self, obj: ObjectRef) -> Result<Elements, Fault> {
        match &self.inner.read().live(obj)?.body {
            Body::Array(items) => Ok(Elements::Indexed(items.clone())),
            Body::Set(items) => Ok(Elements::Unordered(items.clone())),
            Body::Dictionary(entries) => Ok(Elements::Keyed(entries.clone())),
            _ => Err(Fault::Bus(format!("{obj} is not a collection"))),
        }
    }

    pub fn intern_symbol(&self, name: &str) -> u32 {
        let mut inner = self.inner.write();
        if let Some(index) = inner.symbol_by_name.get(name) {
            return *index;
        }
        let index = inner.symbols.len() as u32;
        inner.symbols.push(name.to_string());
        inner.symbol_by_name.insert(name.to_string(), index);
        index
    }

    pub fn symbol(&self, index: u32) -> Option<String> {
        self.inner.read().symbols.get(index as usize).cloned()
    }

    /// Take a protective hold: the object stays live through
    /// [`Heap::dealloc`] until every hold is released.
    pub fn hold(self: &Arc<Self>, obj: ObjectRef) -> Result<Hold, Fault> {
        self.inner.write().live_mut(obj)?.holds += 1;
        Ok(Hold {
            heap: Arc::clone(self),
            object: obj,
        })
    }

    pub fn hold_count(&self, obj: ObjectRef) -> u32 {
        self.inner
            .read()
            .live(obj)
            .map(|object| object.holds)
            .unwrap_or(0)
    }

    /// Host destroys `obj`. Without outstanding holds the slot is reclaimed at
    /// once and every reference to it goes stale; otherwise reclamation waits
    /// for the last hold.
    pub fn dealloc(&self, obj: ObjectRef) -> Result<(), Fault> {
        let mut inner = self.inner.write();
        let object = inner.live_mut(obj)?;
        if object.holds > 0 {
            tracing::debug!(target: "heapscope.runtime", %obj, holds = object.holds, "dealloc deferred by protective hold");
            object.doomed = true;
            return Ok(());
        }
        inner.free_slot(obj.slot());
        Ok(())
    }

    fn release(&self, obj: ObjectRef) {
        let mut inner = self.inner.write();
        let Some(slot) = inner
            .slots
            .get_mut(obj.slot() as usize - 1)
            .filter(|slot| slot.generation == obj.generation())
        else {
            return;
        };
        let Some(object) = slot.object.as_mut() else {
            return;
        };
        object.holds = object.holds.saturating_sub(1);
        if object.holds == 0 && object.doomed {
            inner.free_slot(obj.slot());
        }
    }
}

/// Protective hold on a heap object, released on drop.
#[derive(Debug)]
pub struct Hold {
    heap: Arc<Heap>,
    object: ObjectRef,
}

impl Hold {
    pub fn object(&self) -> ObjectRef {
        self.object
    }
}

impl Drop for Hold {
    fn drop(&mut self) {
        self.heap.release(self.object);
    }
}
