use crate::path_table::PathId;

pub const NIL: &str = "None";
pub const INVALID: &str = "#INVALID";
pub const UNDECODABLE: &str = "#TYPE";
pub const RAISED_EXCEPTION: &str = "raised exception";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Link { id: PathId, text: String },
    BackRef { id: PathId, text: String },
    Nil,
    /// Faulted access; still links to the registered node when there is one.
    Invalid(Option<PathId>),
    Undecodable(String),
    RaisedException,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Row {
    pub label: String,
    pub cell: Cell,
}

/// Ordered (label, value-or-link) list describing one node, or an error.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub node: Option<PathId>,
    pub title: String,
    pub rows: Vec<Row>,
    pub error: Option<String>,
}

impl Fragment {
    pub fn new(node: Option<PathId>, title: impl Into<String>) -> Self {
        Self {
            node,
            title: title.into(),
            rows: Vec::new(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            node: None,
            title: "error".to_owned(),
            rows: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn push(&mut self, label: impl Into<String>, cell: Cell) {
        self.rows.push(Row {
            label: label.into(),
            cell,
        });
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Path ids this fragment links to, in row order.
    pub fn links(&self) -> impl Iterator<Item = PathId> + '_ {
        self.rows.iter().filter_map(|row| match &row.cell {
            Cell::Link { id, .. } | Cell::BackRef { id, .. } => Some(*id),
            Cell::Invalid(id) => *id,
            _ => None,
        })
    }

    pub fn row(&self, label: &str) -> Option<&Row> {
        self.rows.iter().find(|row| row.label == label)
    }
}
