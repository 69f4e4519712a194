//! One client's view of the graph: a sweeper plus its private context.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::SweepError;
use crate::fragment::Fragment;
use crate::path_table::{NodeState, PathId, PathTable};
use crate::render::RenderEngine;
use crate::sweeper::{GraphSweeper, Probe, SweepContext};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Expand the node.
    #[default]
    Open,
    /// Show the node's class: fields, methods and superclass chain.
    Class,
    /// Show the node's key path from its root.
    Path,
}

impl FromStr for OpenMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "open" => Ok(OpenMode::Open),
            "class" => Ok(OpenMode::Class),
            "path" => Ok(OpenMode::Path),
            other => Err(format!("unknown open mode {other:?}")),
        }
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OpenMode::Open => "open",
            OpenMode::Class => "class",
            OpenMode::Path => "path",
        })
    }
}

pub struct Session {
    sweeper: GraphSweeper,
    cx: SweepContext,
}

impl Session {
    pub fn new(probe: Arc<Probe>) -> Self {
        let sweeper = GraphSweeper::new(probe);
        let cx = sweeper.new_context();
        Self { sweeper, cx }
    }

    pub fn table(&self) -> &PathTable {
        self.cx.table()
    }

    pub fn sweeper(&self) -> &GraphSweeper {
        &self.sweeper
    }

    fn engine(&self) -> RenderEngine<'_> {
        RenderEngine::new(self.sweeper.probe().heap(), self.cx.table())
    }

    /// Sweep the current seeds and list every root.
    pub fn summary(&mut self) -> Fragment {
        let roots = self.sweeper.sweep_seeds(&mut self.cx);
        let title = format!("{} roots", roots.len());
        self.engine().render_roots(&title, &roots)
    }

    /// Roots whose type name or label contains `pattern`, ignoring case.
    /// Excluded roots never match.
    pub fn search(&mut self, pattern: &str) -> Fragment {
        let roots = self.sweeper.sweep_seeds(&mut self.cx);
        let needle = pattern.to_lowercase();
        let table = self.cx.table();
        let matches: Vec<PathId> = roots
            .into_iter()
            .filter(|id| {
                table.node(*id).is_some_and(|node| {
                    node.state != NodeState::Excluded
                        && (node.type_name.to_lowercase().contains(&needle)
                            || node.label.to_lowercase().contains(&needle))
                })
            })
            .collect();
        tracing::debug!(target: "heapscope.session", pattern, matches = matches.len(), "search");
        let title = format!("{} roots matching {pattern:?}", matches.len());
        self.engine().render_roots(&title, &matches)
    }

    pub fn open(&mut self, id: PathId, mode: OpenMode) -> Fragment {
        let result = match mode {
            OpenMode::Open => self.sweeper.expand(&mut self.cx, id).map(|entries| (id, entries)),
            OpenMode::Class => self
                .sweeper
                .class_view(&mut self.cx, id)
                .and_then(|view| {
                    self.sweeper
                        .expand(&mut self.cx, view)
                        .map(|entries| (view, entries))
                }),
            OpenMode::Path => return self.engine().render_key_path(id),
        };
        let engine = self.engine();
        match result {
            Ok((shown, entries)) => engine.render_entries(shown, &entries),
            Err(err) => engine.render_failure(&err),
        }
    }

    pub fn write(&mut self, id: PathId, field: &str, literal: &str) -> Fragment {
        let result = self.sweeper.write(&mut self.cx, id, field, literal);
        let engine = self.engine();
        match result {
            Ok(entry) => engine.render_write(id, &entry),
            Err(SweepError::Invalid { .. }) => engine.render_invalid_write(id, field),
            Err(err) => {
                tracing::debug!(target: "heapscope.session", node = id.get(), field, error = %err, "write rejected");
                Fragment::error(err.to_string())
            }
        }
    }
}
