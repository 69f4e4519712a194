//! Incremental graph sweep.
//!
//! Seeds are registered as roots without expanding them; an object's fields
//! are only swept when its node is opened. Every object is admitted into the
//! session at most once: later references to it become back-references to the
//! node that owns it, which is what terminates cycles.

use std::sync::Arc;

use heapscope_runtime::{
    protect, BodyKind, ClassId, Elements, Heap, ObjectRef, Qualifier, TypeTag,
};

use crate::descriptor::{FieldDescriptor, TypeResolver};
use crate::error::{Result, SweepError};
use crate::exclusion::ExclusionSet;
use crate::literal;
use crate::path_table::{NodeKind, NodeSpec, NodeState, Ownership, PathId, PathTable, Target};
use crate::strategy::{StrategyRegistry, SweepStrategy};

/// Host collaborator supplying the roots of a sweep. Evaluated again on
/// every sweep.
pub trait SeedProvider: Send + Sync {
    fn seeds(&self) -> Vec<ObjectRef>;
}

/// Fixed seed list.
#[derive(Clone, Debug, Default)]
pub struct StaticSeeds(pub Vec<ObjectRef>);

impl SeedProvider for StaticSeeds {
    fn seeds(&self) -> Vec<ObjectRef> {
        self.0.clone()
    }
}

/// Seeds computed by a closure.
pub struct SeedFn<F>(pub F);

impl<F> SeedProvider for SeedFn<F>
where
    F: Fn() -> Vec<ObjectRef> + Send + Sync,
{
    fn seeds(&self) -> Vec<ObjectRef> {
        (self.0)()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SweepOptions {
    /// Hold strongly referenced objects alive for the session.
    pub retain_objects: bool,
    /// Superclass chains stop before this type.
    pub root_base_type: String,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            retain_objects: true,
            root_base_type: heapscope_runtime::ROOT_CLASS.to_owned(),
        }
    }
}

/// Process-wide, read-only probe configuration shared by every session.
pub struct Probe {
    heap: Arc<Heap>,
    seeds: Arc<dyn SeedProvider>,
    exclusions: ExclusionSet,
    strategies: StrategyRegistry,
    options: SweepOptions,
}

impl Probe {
    pub fn new(heap: Arc<Heap>, seeds: impl SeedProvider + 'static) -> Self {
        Self {
            heap,
            seeds: Arc::new(seeds),
            exclusions: ExclusionSet::default(),
            strategies: StrategyRegistry::default(),
            options: SweepOptions::default(),
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategyRegistry) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn with_options(mut self, options: SweepOptions) -> Self {
        self.options = options;
        self
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }

    pub fn seeds(&self) -> Vec<ObjectRef> {
        self.seeds.seeds()
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn options(&self) -> &SweepOptions {
        &self.options
    }
}

/// Session-scoped sweep state: the path table (with its seen set) and the
/// descriptor cache. Never shared between sessions.
pub struct SweepContext {
    pub(crate) table: PathTable,
    pub(crate) resolver: TypeResolver,
}

impl SweepContext {
    pub fn table(&self) -> &PathTable {
        &self.table
    }

    pub fn resolver_mut(&mut self) -> &mut TypeResolver {
        &mut self.resolver
    }
}

/// One row of a node's expansion, in render order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Entry {
    /// Non-reference field; read at render time.
    Scalar {
        label: String,
        obj: ObjectRef,
        offset: usize,
        tag: TypeTag,
    },
    Link { label: String, id: PathId },
    /// Object already owned by another node.
    BackRef { label: String, id: PathId },
    Nil { label: String },
    /// Faulted during admission; `id` is set when a node was still registered.
    Invalid { label: String, id: Option<PathId> },
    Undecodable { label: String, reason: String },
    Text { label: String, text: String },
}

impl Entry {
    pub fn label(&self) -> &str {
        match self {
            Entry::Scalar { label, .. }
            | Entry::Link { label, .. }
            | Entry::BackRef { label, .. }
            | Entry::Nil { label }
            | Entry::Invalid { label, .. }
            | Entry::Undecodable { label, .. }
            | Entry::Text { label, .. } => label,
        }
    }

    /// Node this entry links to, if any.
    pub fn target(&self) -> Option<PathId> {
        match self {
            Entry::Link { id, .. } | Entry::BackRef { id, .. } => Some(*id),
            Entry::Invalid { id, .. } => *id,
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct GraphSweeper {
    probe: Arc<Probe>,
}

impl GraphSweeper {
    pub fn new(probe: Arc<Probe>) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> &Arc<Probe> {
        &self.probe
    }

    fn heap(&self) -> &Heap {
        &self.probe.heap
    }

    pub fn new_context(&self) -> SweepContext {
        SweepContext {
            table: PathTable::new(),
            resolver: TypeResolver::new(Arc::clone(&self.probe.heap)),
        }
    }

    /// Register each seed as a root node. A seed that already has a root in
    /// this session keeps its existing id.
    pub fn sweep(&self, cx: &mut SweepContext, seeds: &[ObjectRef]) -> Vec<PathId> {
        let ownership = self.strong_ownership();
        let roots: Vec<PathId> = seeds
            .iter()
            .enumerate()
            .map(|(index, obj)| match cx.table.root_for(*obj) {
                Some(existing) => existing,
                None => self.register_object(
                    cx,
                    NodeKind::RootSeed,
                    None,
                    format!("seeds[{index}]"),
                    ownership,
                    *obj,
                ),
            })
            .collect();
        tracing::debug!(target: "heapscope.sweep", roots = roots.len(), nodes = cx.table.len(), "swept seeds");
        roots
    }

    /// Evaluate the seed provider and sweep its result.
    pub fn sweep_seeds(&self, cx: &mut SweepContext) -> Vec<PathId> {
        let seeds = self.probe.seeds();
        self.sweep(cx, &seeds)
    }

    /// Children of `id`, sweeping them on first use.
    pub fn expand(&self, cx: &mut SweepContext, id: PathId) -> Result<Vec<Entry>> {
        let node = cx.table.node(id).ok_or(SweepError::UnknownPath(id))?;
        if let Some(children) = &node.children {
            return Ok(children.clone());
        }
        match &node.state {
            NodeState::Excluded => {
                return Err(SweepError::Excluded {
                    id,
                    type_name: node.type_name.clone(),
                })
            }
            NodeState::Invalid(reason) => {
                return Err(SweepError::Invalid {
                    id,
                    reason: reason.clone(),
                })
            }
            NodeState::Undecodable(reason) => {
                return Err(SweepError::Undecodable {
                    id,
                    reason: reason.clone(),
                })
            }
            NodeState::Expandable | NodeState::Leaf => {}
        }

        let kind = node.kind;
        let label = node.label.clone();
        let class = node.class;
        let entries = match node.target.clone() {
            Target::Object(obj) => match cx.table.seen(obj) {
                Some(owner) if owner != id && kind != NodeKind::Superclass => {
                    vec![Entry::BackRef { label, id: owner }]
                }
                _ => self.expand_object(cx, id, obj, class, kind != NodeKind::Superclass)?,
            },
            Target::Class(class) => self.expand_class(cx, id, class)?,
            Target::Method { class, index } => self.expand_method(class, index),
            Target::View { owner, name } => self.expand_view(cx, id, owner, &name)?,
        };

        if let Some(node) = cx.table.node_mut(id) {
            node.children = Some(entries.clone());
        }
        Ok(entries)
    }

    /// Class-only node for the concrete class behind `id`, registered on
    /// first request.
    pub fn class_view(&self, cx: &mut SweepContext, id: PathId) -> Result<PathId> {
        let node = cx.table.node(id).ok_or(SweepError::UnknownPath(id))?;
        if let Some(existing) = node.class_view {
            return Ok(existing);
        }
        let class = match &node.target {
            Target::Class(_) => return Ok(id),
            Target::Method { class, .. } => *class,
            Target::Object(_) => match (&node.state, node.class) {
                (NodeState::Invalid(reason), _) => {
                    return Err(SweepError::Invalid {
                        id,
                        reason: reason.clone(),
                    })
                }
                (_, Some(class)) => class,
                (_, None) => return Err(SweepError::NotAnObject(id)),
            },
            Target::View { .. } => return Err(SweepError::NotAnObject(id)),
        };

        let view = self.register_class_node(cx, id, class);
        if let Some(node) = cx.table.node_mut(id) {
            node.class_view = Some(view);
        }
        Ok(view)
    }

    /// Store `literal` into `field` of the object behind `id` and return the
    /// field's post-write entry.
    pub fn write(
        &self,
        cx: &mut SweepContext,
        id: PathId,
        field: &str,
        literal: &str,
    ) -> Result<Entry> {
        let node = cx.table.node(id).ok_or(SweepError::UnknownPath(id))?;
        let obj = node.object().ok_or(SweepError::NotAnObject(id))?;
        match &node.state {
            NodeState::Invalid(reason) => {
                return Err(SweepError::Invalid {
                    id,
                    reason: reason.clone(),
                })
            }
            NodeState::Excluded => {
                return Err(SweepError::Excluded {
                    id,
                    type_name: node.type_name.clone(),
                })
            }
            _ => {}
        }
        let class = node.class.ok_or(SweepError::NotAnObject(id))?;
        let type_name = node.type_name.clone();

        let heap = self.heap();
        protect(|| heap.resolve(obj)).map_err(|fault| SweepError::Invalid {
            id,
            reason: fault.to_string(),
        })?;

        let descriptor = cx
            .resolver
            .find_field(class, field)
            .map_err(|err| SweepError::Undecodable {
                id,
                reason: err.to_string(),
            })?
            .ok_or_else(|| SweepError::NoSuchField {
                type_name,
                field: field.to_owned(),
            })?;

        let bytes = literal::encode_literal(heap, &cx.table, &descriptor.encoded_type, literal)?;
        protect(|| heap.write_bytes(obj, descriptor.storage_offset, &bytes)).map_err(|fault| {
            SweepError::Invalid {
                id,
                reason: fault.to_string(),
            }
        })?;
        tracing::info!(
            target: "heapscope.sweep",
            node = id.get(),
            field,
            literal,
            "wrote field"
        );

        let entry = self.field_entry(cx, id, obj, &descriptor);
        if descriptor.encoded_type.is_object() {
            patch_cached_entries(&mut cx.table, obj, &entry);
        }
        Ok(entry)
    }

    fn strong_ownership(&self) -> Ownership {
        if self.probe.options.retain_objects {
            Ownership::Retained
        } else {
            Ownership::Assigned
        }
    }

    fn field_ownership(&self, qualifier: Qualifier) -> Ownership {
        match qualifier {
            Qualifier::Strong => self.strong_ownership(),
            Qualifier::Weak => Ownership::Weak,
            Qualifier::Unretained => Ownership::Assigned,
        }
    }

    /// Exclusion first, then strategy, then whether metadata decodes.
    fn classify(&self, cx: &mut SweepContext, class: ClassId, type_name: &str) -> NodeState {
        if self.probe.exclusions.is_excluded(type_name) {
            return NodeState::Excluded;
        }
        match self.probe.strategies.strategy_for(self.heap(), class) {
            SweepStrategy::Leaf => NodeState::Leaf,
            SweepStrategy::Elements => NodeState::Expandable,
            SweepStrategy::Fields => match cx.resolver.describe_class(class) {
                Ok(_) => NodeState::Expandable,
                Err(err) => NodeState::Undecodable(err.to_string()),
            },
        }
    }

    fn register_object(
        &self,
        cx: &mut SweepContext,
        kind: NodeKind,
        parent: Option<PathId>,
        label: String,
        ownership: Ownership,
        obj: ObjectRef,
    ) -> PathId {
        let heap = Arc::clone(&self.probe.heap);
        let (state, class, type_name, hold) = match protect(|| heap.resolve(obj)) {
            Err(fault) => {
                tracing::debug!(target: "heapscope.sweep", %obj, %fault, "admitting invalid reference");
                (NodeState::Invalid(fault.to_string()), None, String::new(), None)
            }
            Ok(info) => {
                let type_name = heap
                    .class(info.class)
                    .map(|meta| meta.name.clone())
                    .unwrap_or_default();
                let mut state = self.classify(cx, info.class, &type_name);
                let hold = match ownership {
                    Ownership::Retained => match heap.hold(obj) {
                        Ok(hold) => Some(hold),
                        Err(fault) => {
                            state = NodeState::Invalid(fault.to_string());
                            None
                        }
                    },
                    _ => None,
                };
                (state, Some(info.class), type_name, hold)
            }
        };

        let invalid = matches!(state, NodeState::Invalid(_));
        let id = cx.table.register(NodeSpec {
            kind,
            target: Target::Object(obj),
            ownership,
            parent,
            label,
            type_name,
            class,
            state,
            hold,
        });
        if !invalid {
            cx.table.mark_seen(obj, id);
        }
        id
    }

    /// Entry for a reference to `obj` found while sweeping `parent`.
    fn admit(
        &self,
        cx: &mut SweepContext,
        parent: PathId,
        kind: NodeKind,
        label: String,
        ownership: Ownership,
        obj: ObjectRef,
    ) -> Entry {
        if let Some(existing) = cx.table.seen(obj) {
            return Entry::BackRef {
                label,
                id: existing,
            };
        }
        let id = self.register_object(cx, kind, Some(parent), label.clone(), ownership, obj);
        match cx.table.node(id).map(|node| &node.state) {
            Some(NodeState::Invalid(_)) => Entry::Invalid {
                label,
                id: Some(id),
            },
            _ => Entry::Link { label, id },
        }
    }

    fn field_entry(
        &self,
        cx: &mut SweepContext,
        parent: PathId,
        obj: ObjectRef,
        field: &FieldDescriptor,
    ) -> Entry {
        let label = field.name.clone();
        if !field.encoded_type.is_object() {
            return Entry::Scalar {
                label,
                obj,
                offset: field.storage_offset,
                tag: field.encoded_type.clone(),
            };
        }
        let heap = self.heap();
        match protect(|| heap.read_ref(obj, field.storage_offset)) {
            Err(_) => Entry::Invalid { label, id: None },
            Ok(None) => Entry::Nil { label },
            Ok(Some(child)) => {
                let ownership = self.field_ownership(field.qualifier);
                self.admit(cx, parent, NodeKind::Field, label, ownership, child)
            }
        }
    }

    fn expand_object(
        &self,
        cx: &mut SweepContext,
        id: PathId,
        obj: ObjectRef,
        class: Option<ClassId>,
        concrete: bool,
    ) -> Result<Vec<Entry>> {
        let heap = Arc::clone(&self.probe.heap);
        let info = protect(|| heap.resolve(obj)).map_err(|fault| SweepError::Invalid {
            id,
            reason: fault.to_string(),
        })?;
        let class = class.unwrap_or(info.class);

        if concrete {
            match self.probe.strategies.strategy_for(&heap, info.class) {
                SweepStrategy::Leaf => return Ok(self.leaf_entries(obj, info.kind)),
                SweepStrategy::Elements => return self.expand_elements(cx, id, obj),
                SweepStrategy::Fields => {}
            }
        }

        let descriptor =
            cx.resolver
                .describe_class(class)
                .map_err(|err| SweepError::Undecodable {
                    id,
                    reason: err.to_string(),
                })?;

        let mut entries = Vec::with_capacity(descriptor.fields.len() + 1);
        for field in &descriptor.fields {
            let entry = self.field_entry(cx, id, obj, field);
            entries.push(entry);
        }

        if concrete {
            if let Ok(views) = protect(|| heap.related(obj)) {
                for (name, _) in views {
                    let view = cx.table.register(NodeSpec {
                        kind: NodeKind::CollectionView,
                        target: Target::View {
                            owner: obj,
                            name: name.clone(),
                        },
                        ownership: Ownership::NotApplicable,
                        parent: Some(id),
                        label: name.clone(),
                        type_name: heapscope_runtime::ARRAY_CLASS.to_owned(),
                        class: None,
                        state: NodeState::Expandable,
                        hold: None,
                    });
                    entries.push(Entry::Link {
                        label: name,
                        id: view,
                    });
                }
            }
        }

        if let (Some(superclass), Some(name)) =
            (descriptor.superclass, descriptor.superclass_name.clone())
        {
            if name != self.probe.options.root_base_type {
                let state = self.classify(cx, superclass, &name);
                let sup = cx.table.register(NodeSpec {
                    kind: NodeKind::Superclass,
                    target: Target::Object(obj),
                    ownership: Ownership::NotApplicable,
                    parent: Some(id),
                    label: name.clone(),
                    type_name: name,
                    class: Some(superclass),
                    state,
                    hold: None,
                });
                entries.push(Entry::Link {
                    label: "super".to_owned(),
                    id: sup,
                });
            }
        }
        Ok(entries)
    }

    fn leaf_entries(&self, obj: ObjectRef, kind: BodyKind) -> Vec<Entry> {
        let heap = self.heap();
        if kind != BodyKind::Text {
            return Vec::new();
        }
        let label = "value".to_owned();
        match protect(|| heap.text(obj)) {
            Ok(text) => vec![Entry::Text {
                label,
                text: format!("\"{text}\""),
            }],
            Err(_) => vec![Entry::Invalid { label, id: None }],
        }
    }

    fn expand_elements(
        &self,
        cx: &mut SweepContext,
        id: PathId,
        obj: ObjectRef,
    ) -> Result<Vec<Entry>> {
        let heap = self.heap();
        let elements = protect(|| heap.elements(obj)).map_err(|fault| SweepError::Invalid {
            id,
            reason: fault.to_string(),
        })?;
        let ownership = self.strong_ownership();
        let entries = match elements {
            Elements::Indexed(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, item)| {
                    let label = format!("[{index}]");
                    match item {
                        None => Entry::Nil { label },
                        Some(member) => {
                            self.admit(cx, id, NodeKind::ArrayElement, label, ownership, member)
                        }
                    }
                })
                .collect(),
            Elements::Unordered(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, member)| {
                    let label = format!("{{{index}}}");
                    self.admit(cx, id, NodeKind::SetElement, label, ownership, member)
                })
                .collect(),
            Elements::Keyed(pairs) => pairs
                .into_iter()
                .map(|(key, value)| {
                    let label = format!("[{key:?}]");
                    match value {
                        None => Entry::Nil { label },
                        Some(member) => {
                            self.admit(cx, id, NodeKind::DictEntry, label, ownership, member)
                        }
                    }
                })
                .collect(),
        };
        Ok(entries)
    }

    fn expand_view(
        &self,
        cx: &mut SweepContext,
        id: PathId,
        owner: ObjectRef,
        name: &str,
    ) -> Result<Vec<Entry>> {
        let heap = self.heap();
        let views = protect(|| heap.related(owner)).map_err(|fault| SweepError::Invalid {
            id,
            reason: fault.to_string(),
        })?;
        let members = views
            .into_iter()
            .find(|(view, _)| view == name)
            .map(|(_, members)| members)
            .unwrap_or_default();
        let ownership = self.strong_ownership();
        Ok(members
            .into_iter()
            .enumerate()
            .map(|(index, member)| {
                let label = format!("[{index}]");
                self.admit(cx, id, NodeKind::ArrayElement, label, ownership, member)
            })
            .collect())
    }

    fn register_class_node(&self, cx: &mut SweepContext, parent: PathId, class: ClassId) -> PathId {
        let name = self
            .heap()
            .class(class)
            .map(|meta| meta.name.clone())
            .unwrap_or_default();
        let state = if self.probe.exclusions.is_excluded(&name) {
            NodeState::Excluded
        } else {
            match cx.resolver.describe_class(class) {
                Ok(_) => NodeState::Expandable,
                Err(err) => NodeState::Undecodable(err.to_string()),
            }
        };
        cx.table.register(NodeSpec {
            kind: NodeKind::ClassOnly,
            target: Target::Class(class),
            ownership: Ownership::NotApplicable,
            parent: Some(parent),
            label: name.clone(),
            type_name: name,
            class: Some(class),
            state,
            hold: None,
        })
    }

    fn expand_class(
        &self,
        cx: &mut SweepContext,
        id: PathId,
        class: ClassId,
    ) -> Result<Vec<Entry>> {
        let descriptor =
            cx.resolver
                .describe_class(class)
                .map_err(|err| SweepError::Undecodable {
                    id,
                    reason: err.to_string(),
                })?;

        let mut entries: Vec<Entry> = descriptor
            .fields
            .iter()
            .map(|field| {
                let qualifier = match field.qualifier {
                    Qualifier::Strong => "",
                    Qualifier::Weak => "weak ",
                    Qualifier::Unretained => "unretained ",
                };
                Entry::Text {
                    label: field.name.clone(),
                    text: format!(
                        "{qualifier}{} [{}]",
                        field.encoded_type.describe(),
                        field.encoding
                    ),
                }
            })
            .collect();

        let methods = self
            .heap()
            .class(class)
            .map(|meta| meta.methods.clone())
            .unwrap_or_default();
        for (index, method) in methods.into_iter().enumerate() {
            let method_id = cx.table.register(NodeSpec {
                kind: NodeKind::Method,
                target: Target::Method { class, index },
                ownership: Ownership::NotApplicable,
                parent: Some(id),
                label: method.name.clone(),
                type_name: descriptor.type_name.clone(),
                class: Some(class),
                state: NodeState::Expandable,
                hold: None,
            });
            entries.push(Entry::Link {
                label: format!("-{}", method.name),
                id: method_id,
            });
        }

        if let (Some(superclass), Some(name)) =
            (descriptor.superclass, descriptor.superclass_name.as_deref())
        {
            if name != self.probe.options.root_base_type {
                let sup = self.register_class_node(cx, id, superclass);
                entries.push(Entry::Link {
                    label: "super".to_owned(),
                    id: sup,
                });
            }
        }
        Ok(entries)
    }

    fn expand_method(&self, class: ClassId, index: usize) -> Vec<Entry> {
        let Some(meta) = self.heap().class(class) else {
            return Vec::new();
        };
        let Some(method) = meta.methods.get(index) else {
            return Vec::new();
        };
        vec![
            Entry::Text {
                label: "name".to_owned(),
                text: method.name.clone(),
            },
            Entry::Text {
                label: "signature".to_owned(),
                text: method.signature.clone(),
            },
            Entry::Text {
                label: "class".to_owned(),
                text: meta.name.clone(),
            },
        ]
    }
}

/// Replace the cached entry for a rewritten reference field in every cached
/// view of `obj` (the owning node and its superclass views).
fn patch_cached_entries(table: &mut PathTable, obj: ObjectRef, entry: &Entry) {
    for node in table.iter_mut() {
        if node.object() != Some(obj) {
            continue;
        }
        if let Some(children) = node.children.as_mut() {
            for child in children.iter_mut() {
                if child.label() == entry.label() && !matches!(child, Entry::Scalar { .. }) {
                    *child = entry.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use heapscope_runtime::{fixtures, ClassBuilder};
    use pretty_assertions::assert_eq;

    use super::*;

    fn sweeper(heap: &Arc<Heap>, seeds: Vec<ObjectRef>) -> GraphSweeper {
        let probe = Probe::new(Arc::clone(heap), StaticSeeds(seeds))
            .with_exclusions(ExclusionSet::parse(["^_", "Internal$"]).unwrap());
        GraphSweeper::new(Arc::new(probe))
    }

    fn link(entries: &[Entry], label: &str) -> PathId {
        match entries.iter().find(|entry| entry.label() == label) {
            Some(Entry::Link { id, .. }) => *id,
            other => panic!("expected link {label:?}, got {other:?}"),
        }
    }

    #[test]
    fn cycle_resolves_to_back_reference() {
        let heap = Heap::new();
        let cycle = fixtures::cycle(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![cycle.a]);
        let mut cx = sweeper.new_context();

        let roots = sweeper.sweep_seeds(&mut cx);
        assert_eq!(roots.len(), 1);
        let a = roots[0];
        // Roots are registered but not expanded.
        assert!(!cx.table().node(a).unwrap().is_expanded());

        let a_children = sweeper.expand(&mut cx, a).unwrap();
        let b = link(&a_children, "b");
        let b_node = cx.table().node(b).unwrap();
        assert_eq!(b_node.kind, NodeKind::Field);
        assert_eq!(b_node.ownership, Ownership::Retained);
        assert!(b_node.is_held());
        assert!(matches!(&a_children[1], Entry::Scalar { label, .. } if label == "score"));

        let issued = cx.table().len();
        let b_children = sweeper.expand(&mut cx, b).unwrap();
        assert_eq!(
            b_children[0],
            Entry::BackRef {
                label: "a".to_owned(),
                id: a
            }
        );
        assert_eq!(cx.table().len(), issued, "back-reference must not issue a node");
    }

    #[test]
    fn shared_objects_are_swept_once() {
        let heap = Heap::new();
        heap.register_class(
            ClassBuilder::new("Pair")
                .field("left", "@")
                .unretained_field("right", "@"),
        )
        .unwrap();
        let pair = heap.alloc_named("Pair").unwrap();
        let shared = heap.alloc_text("shared");
        heap.set_ref_field(pair, "left", Some(shared)).unwrap();
        heap.set_ref_field(pair, "right", Some(shared)).unwrap();

        let sweeper = sweeper(&heap, vec![pair, pair]);
        let mut cx = sweeper.new_context();
        let roots = sweeper.sweep_seeds(&mut cx);
        assert_eq!(roots[0], roots[1]);

        let children = sweeper.expand(&mut cx, roots[0]).unwrap();
        let left = link(&children, "left");
        assert_eq!(
            children[1],
            Entry::BackRef {
                label: "right".to_owned(),
                id: left
            }
        );
        assert_eq!(
            sweeper.expand(&mut cx, left).unwrap(),
            vec![Entry::Text {
                label: "value".to_owned(),
                text: "\"shared\"".to_owned()
            }]
        );
    }

    #[test]
    fn excluded_types_are_never_expanded() {
        let heap = Heap::new();
        let widgets = fixtures::widgets(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![widgets.view, widgets.internal]);
        let mut cx = sweeper.new_context();
        let roots = sweeper.sweep_seeds(&mut cx);

        let internal = cx.table().node(roots[1]).unwrap();
        assert_eq!(internal.state, NodeState::Excluded);
        for _ in 0..2 {
            assert!(matches!(
                sweeper.expand(&mut cx, roots[1]),
                Err(SweepError::Excluded { .. })
            ));
        }
        let class_view = sweeper.class_view(&mut cx, roots[1]).unwrap();
        assert!(matches!(
            sweeper.expand(&mut cx, class_view),
            Err(SweepError::Excluded { .. })
        ));
    }

    #[test]
    fn superclass_chain_stops_at_root_base_type() {
        let heap = Heap::new();
        let widgets = fixtures::widgets(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![widgets.view]);
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];

        let children = sweeper.expand(&mut cx, root).unwrap();
        let labels: Vec<&str> = children.iter().map(Entry::label).collect();
        assert_eq!(labels, vec!["title", "delegate", "super"]);

        let view = link(&children, "super");
        assert_eq!(cx.table().node(view).unwrap().kind, NodeKind::Superclass);
        let view_children = sweeper.expand(&mut cx, view).unwrap();
        let labels: Vec<&str> = view_children.iter().map(Entry::label).collect();
        // `View` derives directly from `Object`, so the chain ends here.
        assert_eq!(labels, vec!["frame", "tag", "hidden", "superview"]);
    }

    #[test]
    fn undecodable_metadata_yields_terminal_node() {
        let heap = Heap::new();
        let mangled = fixtures::corrupt(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![mangled]);
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];
        assert!(matches!(
            &cx.table().node(root).unwrap().state,
            NodeState::Undecodable(reason) if reason == "?FLAGS#66"
        ));
        assert!(matches!(
            sweeper.expand(&mut cx, root),
            Err(SweepError::Undecodable { .. })
        ));
    }

    #[test]
    fn stale_weak_target_still_registers_a_node() {
        let heap = Heap::new();
        let cycle = fixtures::cycle(&heap).unwrap();
        heap.register_class(ClassBuilder::new("Watcher").weak_field("target", "@\"B\""))
            .unwrap();
        let watcher = heap.alloc_named("Watcher").unwrap();
        heap.set_ref_field(watcher, "target", Some(cycle.b)).unwrap();
        heap.dealloc(cycle.b).unwrap();

        let sweeper = sweeper(&heap, vec![watcher]);
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];
        let children = sweeper.expand(&mut cx, root).unwrap();
        let Entry::Invalid { id: Some(id), .. } = &children[0] else {
            panic!("expected invalid entry, got {children:?}");
        };
        let node = cx.table().node(*id).unwrap();
        assert_eq!(node.parent, Some(root));
        assert_eq!(node.ownership, Ownership::Weak);
        assert!(matches!(
            sweeper.expand(&mut cx, *id),
            Err(SweepError::Invalid { .. })
        ));
    }

    #[test]
    fn collections_expand_per_element() {
        let heap = Heap::new();
        let library = fixtures::collections(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![library.library]);
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];
        let children = sweeper.expand(&mut cx, root).unwrap();

        let shelf = link(&children, "shelf");
        let featured = link(&children, "featured");
        assert_eq!(
            cx.table().node(featured).unwrap().ownership,
            Ownership::Assigned
        );

        let shelf_items = sweeper.expand(&mut cx, shelf).unwrap();
        let labels: Vec<&str> = shelf_items.iter().map(Entry::label).collect();
        assert_eq!(labels, vec!["[0]", "[1]", "[2]", "[3]"]);
        let first = link(&shelf_items, "[0]");
        assert_eq!(cx.table().node(first).unwrap().kind, NodeKind::ArrayElement);
        assert_eq!(shelf_items[1], Entry::Nil { label: "[1]".into() });
        // `featured` was admitted first, so the shelf only refers back to it.
        assert_eq!(
            shelf_items[2],
            Entry::BackRef {
                label: "[2]".into(),
                id: featured
            }
        );

        let by_title = link(&children, "byTitle");
        let entries = sweeper.expand(&mut cx, by_title).unwrap();
        assert_eq!(
            entries[0],
            Entry::BackRef {
                label: "[\"Dune\"]".into(),
                id: first
            }
        );
        assert_eq!(entries[1], Entry::Nil { label: "[\"Missing\"]".into() });
    }

    #[test]
    fn retain_toggle_disables_holds() {
        let heap = Heap::new();
        let cycle = fixtures::cycle(&heap).unwrap();
        let probe = Probe::new(Arc::clone(&heap), StaticSeeds(vec![cycle.a])).with_options(
            SweepOptions {
                retain_objects: false,
                ..SweepOptions::default()
            },
        );
        let sweeper = GraphSweeper::new(Arc::new(probe));
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];
        let b = link(&sweeper.expand(&mut cx, root).unwrap(), "b");
        let node = cx.table().node(b).unwrap();
        assert_eq!(node.ownership, Ownership::Assigned);
        assert!(!node.is_held());
        assert_eq!(heap.hold_count(cycle.b), 0);
    }

    #[test]
    fn class_view_lists_fields_methods_and_chain() {
        let heap = Heap::new();
        let widgets = fixtures::widgets(&heap).unwrap();
        let sweeper = sweeper(&heap, vec![widgets.view]);
        let mut cx = sweeper.new_context();
        let root = sweeper.sweep_seeds(&mut cx)[0];

        let class_node = sweeper.class_view(&mut cx, root).unwrap();
        assert_eq!(sweeper.class_view(&mut cx, root).unwrap(), class_node);
        let entries = sweeper.expand(&mut cx, class_node).unwrap();
        let labels: Vec<&str> = entries.iter().map(Entry::label).collect();
        assert_eq!(labels, vec!["title", "delegate", "-reload", "super"]);
        assert_eq!(
            entries[1],
            Entry::Text {
                label: "delegate".into(),
                text: "weak <WidgetDelegate> [@\"<WidgetDelegate>\"]".into()
            }
        );

        let method = link(&entries, "-reload");
        let method_entries = sweeper.expand(&mut cx, method).unwrap();
        assert_eq!(method_entries[1].label(), "signature");

        let view_class = link(&entries, "super");
        let node = cx.table().node(view_class).unwrap();
        assert_eq!(node.kind, NodeKind::ClassOnly);
        assert_eq!(node.label, "View");
    }
}
