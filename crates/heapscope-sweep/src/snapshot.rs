//! Offline export of everything reachable from a seed list.
//!
//! The snapshot runs its own sweep context, so it never touches a live
//! session's ids, and expands breadth-first so ids (and therefore the
//! document) depend only on the graph.

use std::collections::{HashSet, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;

use heapscope_runtime::ObjectRef;

use crate::fragment::Fragment;
use crate::markup::escape_html;
use crate::path_table::PathId;
use crate::render::RenderEngine;
use crate::sweeper::{GraphSweeper, Probe};

pub const SNAPSHOT_TITLE: &str = "heapscope snapshot";

/// Render every node reachable from `seeds` as one HTML document. Links
/// point at in-document anchors `#node-<id>`.
pub fn snapshot(probe: Arc<Probe>, seeds: &[ObjectRef]) -> String {
    let sweeper = GraphSweeper::new(probe);
    let mut cx = sweeper.new_context();
    let roots = sweeper.sweep(&mut cx, seeds);

    let mut queue: VecDeque<PathId> = roots.iter().copied().collect();
    let mut queued: HashSet<PathId> = queue.iter().copied().collect();
    let mut sections: Vec<(PathId, Fragment)> = Vec::new();
    while let Some(id) = queue.pop_front() {
        let result = sweeper.expand(&mut cx, id);
        let engine = RenderEngine::new(sweeper.probe().heap(), cx.table());
        let fragment = match result {
            Ok(entries) => {
                for child in entries.iter().filter_map(|entry| entry.target()) {
                    if queued.insert(child) {
                        queue.push_back(child);
                    }
                }
                engine.render_entries(id, &entries)
            }
            Err(err) => engine.render_failure(&err),
        };
        sections.push((id, fragment));
    }
    sections.sort_by_key(|(id, _)| *id);

    let engine = RenderEngine::new(sweeper.probe().heap(), cx.table());
    let index = engine.render_roots("roots", &roots);
    tracing::info!(
        target: "heapscope.snapshot",
        roots = roots.len(),
        nodes = sections.len(),
        "snapshot rendered"
    );

    let mut out = String::new();
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(out, "<title>{}</title>", escape_html(SNAPSHOT_TITLE));
    out.push_str("</head>\n<body>\n");
    let _ = writeln!(out, "<h1>{}</h1>", escape_html(SNAPSHOT_TITLE));
    out.push_str("<nav>\n");
    out.push_str(&index.to_markup());
    out.push_str("</nav>\n");
    for (id, fragment) in &sections {
        let _ = writeln!(out, "<section id=\"node-{}\">", id.get());
        out.push_str(&fragment.to_markup());
        out.push_str("</section>\n");
    }
    out.push_str("</body>\n</html>\n");
    out
}
