use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use heapscope_runtime::{ClassId, Hold, ObjectRef};

use crate::sweeper::Entry;

/// Stable, session-scoped node address. Issued in strictly increasing order
/// and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathId(NonZeroU32);

impl PathId {
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }

    fn index(self) -> usize {
        self.0.get() as usize - 1
    }
}

impl fmt::Display for PathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl FromStr for PathId {
    type Err = std::num::ParseIntError;

    /// Accepts `12` and `#12`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        digits.parse::<NonZeroU32>().map(Self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    RootSeed,
    Field,
    Superclass,
    ClassOnly,
    ArrayElement,
    SetElement,
    DictEntry,
    CollectionView,
    Method,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// The session holds the object alive.
    Retained,
    /// Never extends the lifetime; may go stale.
    Weak,
    /// Raw reference; may dangle.
    Assigned,
    NotApplicable,
}

impl Ownership {
    pub fn as_str(self) -> &'static str {
        match self {
            Ownership::Retained => "retained",
            Ownership::Weak => "weak",
            Ownership::Assigned => "assigned",
            Ownership::NotApplicable => "n/a",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Object(ObjectRef),
    Class(ClassId),
    Method { class: ClassId, index: usize },
    /// Host-declared related collection of `owner`.
    View { owner: ObjectRef, name: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeState {
    Expandable,
    /// Type matched an exclusion pattern.
    Excluded,
    /// Rendered inline by its strategy.
    Leaf,
    /// Identity resolution faulted when the node was admitted.
    Invalid(String),
    /// Type metadata could not be decoded.
    Undecodable(String),
}

impl NodeState {
    /// Terminal nodes are never expanded.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeState::Expandable)
    }
}

/// Everything needed to register a node; the table assigns the id.
#[derive(Debug)]
pub struct NodeSpec {
    pub kind: NodeKind,
    pub target: Target,
    pub ownership: Ownership,
    pub parent: Option<PathId>,
    pub label: String,
    pub type_name: String,
    pub class: Option<ClassId>,
    pub state: NodeState,
    pub hold: Option<Hold>,
}

#[derive(Debug)]
pub struct Node {
    pub id: PathId,
    pub kind: NodeKind,
    pub target: Target,
    pub ownership: Ownership,
    pub parent: Option<PathId>,
    pub label: String,
    pub type_name: String,
    /// Class whose declared fields this node shows. For superclass nodes this
    /// is the ancestor, not the concrete class.
    pub class: Option<ClassId>,
    pub state: NodeState,
    hold: Option<Hold>,
    pub(crate) children: Option<Vec<Entry>>,
    pub(crate) class_view: Option<PathId>,
}

impl Node {
    pub fn object(&self) -> Option<ObjectRef> {
        match &self.target {
            Target::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn is_held(&self) -> bool {
        self.hold.is_some()
    }

    pub fn is_expanded(&self) -> bool {
        self.children.is_some()
    }

    fn key_segment(&self) -> Option<String> {
        match self.kind {
            NodeKind::RootSeed => Some(self.label.clone()),
            NodeKind::Field | NodeKind::CollectionView | NodeKind::Method => {
                Some(format!(".{}", self.label))
            }
            NodeKind::ArrayElement | NodeKind::SetElement | NodeKind::DictEntry => {
                Some(self.label.clone())
            }
            NodeKind::ClassOnly => Some(format!("({})", self.label)),
            // Same object viewed as an ancestor type.
            NodeKind::Superclass => None,
        }
    }
}

/// Registry of every node issued in a session, plus the seen set that keeps
/// each object swept at most once.
#[derive(Debug, Default)]
pub struct PathTable {
    nodes: Vec<Node>,
    seen: HashMap<ObjectRef, PathId>,
    roots: Vec<PathId>,
    root_by_object: HashMap<ObjectRef, PathId>,
}

impl PathTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: NodeSpec) -> PathId {
        debug_assert!(
            spec.parent.map_or(true, |parent| parent.index() < self.nodes.len()),
            "parent must be issued before its children"
        );
        let raw = u32::try_from(self.nodes.len() + 1).unwrap_or(u32::MAX);
        let id = PathId::new(raw).unwrap_or(PathId(NonZeroU32::MAX));

        if spec.kind == NodeKind::RootSeed {
            if let Target::Object(obj) = spec.target {
                self.root_by_object.entry(obj).or_insert(id);
            }
            self.roots.push(id);
        }
        tracing::trace!(
            target: "heapscope.sweep",
            id = id.get(),
            kind = ?spec.kind,
            label = %spec.label,
            "registered node"
        );
        self.nodes.push(Node {
            id,
            kind: spec.kind,
            target: spec.target,
            ownership: spec.ownership,
            parent: spec.parent,
            label: spec.label,
            type_name: spec.type_name,
            class: spec.class,
            state: spec.state,
            hold: spec.hold,
            children: None,
            class_view: None,
        });
        id
    }

    pub fn node(&self, id: PathId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub(crate) fn node_mut(&mut self, id: PathId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index())
    }

    pub fn seen(&self, obj: ObjectRef) -> Option<PathId> {
        self.seen.get(&obj).copied()
    }

    /// Record `id` as the node that sweeps `obj`. Returns the node already
    /// recorded if there is one.
    pub fn mark_seen(&mut self, obj: ObjectRef, id: PathId) -> PathId {
        *self.seen.entry(obj).or_insert(id)
    }

    pub fn root_for(&self, obj: ObjectRef) -> Option<PathId> {
        self.root_by_object.get(&obj).copied()
    }

    pub fn roots(&self) -> &[PathId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    /// Dotted path from the node's root, e.g. `seeds[0].window.subviews[2]`.
    pub fn key_path(&self, id: PathId) -> Option<String> {
        let mut segments = Vec::new();
        let mut current = Some(self.node(id)?);
        while let Some(node) = current {
            if let Some(segment) = node.key_segment() {
                segments.push(segment);
            }
            current = node.parent.and_then(|parent| self.node(parent));
        }
        segments.reverse();
        let mut path = segments.concat();
        if let Some(stripped) = path.strip_prefix('.') {
            path = stripped.to_owned();
        }
        Some(path)
    }
}
