//! Turns sweep results into fragments.

use heapscope_runtime::{protect, Heap};

use crate::error::SweepError;
use crate::fragment::{Cell, Fragment};
use crate::path_table::{Node, NodeKind, NodeState, Ownership, PathId, PathTable, Target};
use crate::sweeper::Entry;
use crate::value::{read_field, Rendered};

/// Stateless renderer over one session's table. Scalars are read from the
/// heap on every render.
pub struct RenderEngine<'a> {
    heap: &'a Heap,
    table: &'a PathTable,
}

impl<'a> RenderEngine<'a> {
    pub fn new(heap: &'a Heap, table: &'a PathTable) -> Self {
        Self { heap, table }
    }

    /// Fragment listing `roots`, in the order given.
    pub fn render_roots(&self, title: &str, roots: &[PathId]) -> Fragment {
        let mut fragment = Fragment::new(None, title);
        for id in roots {
            let Some(node) = self.table.node(*id) else {
                continue;
            };
            fragment.push(node.label.clone(), self.link_cell(node));
        }
        fragment
    }

    pub fn render_entries(&self, id: PathId, entries: &[Entry]) -> Fragment {
        let mut fragment = Fragment::new(Some(id), self.title(id));
        for entry in entries {
            fragment.push(entry.label(), self.cell(entry));
        }
        fragment
    }

    /// Fragment for a node that could not be expanded. Sentinel states render
    /// as a node fragment; anything else is a plain error.
    pub fn render_failure(&self, err: &SweepError) -> Fragment {
        match err {
            SweepError::Excluded { id, type_name } => {
                let mut fragment = Fragment::new(Some(*id), self.title(*id));
                fragment.push("excluded", Cell::Text(format!("{type_name} is not swept")));
                fragment
            }
            SweepError::Invalid { id, .. } => {
                let mut fragment = Fragment::new(Some(*id), self.title(*id));
                fragment.push("value", Cell::Invalid(None));
                fragment
            }
            SweepError::Undecodable { id, reason } => {
                let mut fragment = Fragment::new(Some(*id), self.title(*id));
                fragment.push("type", Cell::Undecodable(reason.clone()));
                fragment
            }
            other => Fragment::error(other.to_string()),
        }
    }

    pub fn render_key_path(&self, id: PathId) -> Fragment {
        match self.table.key_path(id) {
            Some(path) => {
                let mut fragment = Fragment::new(Some(id), self.title(id));
                fragment.push("path", Cell::Text(path));
                fragment
            }
            None => Fragment::error(SweepError::UnknownPath(id).to_string()),
        }
    }

    /// Single-row fragment showing a field after it was written.
    pub fn render_write(&self, id: PathId, entry: &Entry) -> Fragment {
        self.render_entries(id, std::slice::from_ref(entry))
    }

    /// Like `render_write`, for a write that faulted.
    pub fn render_invalid_write(&self, id: PathId, field: &str) -> Fragment {
        let mut fragment = Fragment::new(Some(id), self.title(id));
        fragment.push(field, Cell::Invalid(None));
        fragment
    }

    pub fn title(&self, id: PathId) -> String {
        let Some(node) = self.table.node(id) else {
            return id.to_string();
        };
        let path = self.table.key_path(id).unwrap_or_default();
        format!("{id} {path}: {}", self.describe(node))
    }

    fn describe(&self, node: &Node) -> String {
        match (&node.target, node.kind) {
            (Target::Object(_), NodeKind::Superclass) => format!("as {}", node.type_name),
            (Target::Object(obj), _) if matches!(node.state, NodeState::Invalid(_)) => {
                format!("{obj}")
            }
            (Target::Object(obj), _) => format!("{} {obj}", node.type_name),
            (Target::Class(_), _) => format!("class {}", node.type_name),
            (Target::Method { .. }, _) => format!("-{} of {}", node.label, node.type_name),
            (Target::View { name, .. }, _) => format!("related {name}"),
        }
    }

    fn link_cell(&self, node: &Node) -> Cell {
        let id = node.id;
        // Unheld targets may have been freed since they were admitted.
        if let (Some(obj), false) = (node.object(), node.is_held()) {
            if protect(|| self.heap.resolve(obj)).is_err() {
                return Cell::Invalid(Some(id));
            }
        }
        match &node.state {
            NodeState::Invalid(_) => return Cell::Invalid(Some(id)),
            NodeState::Leaf => {
                if let Some(obj) = node.object() {
                    if let Ok(text) = protect(|| self.heap.text(obj)) {
                        return Cell::Link {
                            id,
                            text: format!("\"{text}\""),
                        };
                    }
                }
            }
            _ => {}
        }

        let mut text = self.describe(node);
        if matches!(node.ownership, Ownership::Weak | Ownership::Assigned) {
            text.push_str(&format!(" ({})", node.ownership.as_str()));
        }
        match &node.state {
            NodeState::Excluded => text.push_str(" [excluded]"),
            NodeState::Undecodable(_) => text.push_str(" [#TYPE]"),
            _ => {}
        }
        Cell::Link { id, text }
    }

    fn cell(&self, entry: &Entry) -> Cell {
        match entry {
            Entry::Scalar { obj, offset, tag, .. } => {
                match read_field(self.heap, *obj, *offset, tag) {
                    Rendered::Text(text) => Cell::Text(text),
                    Rendered::Nil => Cell::Nil,
                    Rendered::Invalid => Cell::Invalid(None),
                    Rendered::RaisedException => Cell::RaisedException,
                }
            }
            Entry::Link { id, .. } => match self.table.node(*id) {
                Some(node) => self.link_cell(node),
                None => Cell::Invalid(None),
            },
            Entry::BackRef { id, .. } => Cell::BackRef {
                id: *id,
                text: format!("see {id}"),
            },
            Entry::Nil { .. } => Cell::Nil,
            Entry::Invalid { id, .. } => Cell::Invalid(*id),
            Entry::Undecodable { reason, .. } => Cell::Undecodable(reason.clone()),
            Entry::Text { text, .. } => Cell::Text(text.clone()),
        }
    }
}
