use std::sync::Arc;

use heapscope_runtime::metadata::MetaWriter;
use heapscope_runtime::{fixtures, ClassBuilder, Heap, ObjectRef, Qualifier};
use heapscope_sweep::{
    Cell, ExclusionSet, Fragment, OpenMode, PathId, Probe, Session, StaticSeeds,
};
use pretty_assertions::assert_eq;

fn session(heap: &Arc<Heap>, seeds: Vec<ObjectRef>) -> Session {
    let probe = Probe::new(Arc::clone(heap), StaticSeeds(seeds))
        .with_exclusions(ExclusionSet::parse(["^_", "Internal$"]).unwrap());
    Session::new(Arc::new(probe))
}

fn link(fragment: &Fragment, label: &str) -> PathId {
    match fragment.row(label).map(|row| &row.cell) {
        Some(Cell::Link { id, .. }) => *id,
        other => panic!("expected link {label:?} in {fragment:?}, got {other:?}"),
    }
}

fn text<'a>(fragment: &'a Fragment, label: &str) -> &'a str {
    match fragment.row(label).map(|row| &row.cell) {
        Some(Cell::Text(text)) => text,
        other => panic!("expected text {label:?} in {fragment:?}, got {other:?}"),
    }
}

#[test]
fn cycle_renders_back_reference_to_root() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let mut session = session(&heap, vec![cycle.a]);

    let summary = session.summary();
    let a = link(&summary, "seeds[0]");
    let a_view = session.open(a, OpenMode::Open);
    assert_eq!(text(&a_view, "score"), "42");
    let b = link(&a_view, "b");

    let b_view = session.open(b, OpenMode::Open);
    assert_eq!(
        b_view.row("a").unwrap().cell,
        Cell::BackRef {
            id: a,
            text: format!("see {a}")
        }
    );
    assert_eq!(text(&b_view, "ratio"), "0.5");
    assert!(b_view
        .to_markup()
        .contains(&format!("class=\"backref\" href=\"#node-{0}\" data-path=\"{0}\"", a.get())));
}

#[test]
fn search_matches_type_names_and_skips_excluded_roots() {
    let heap = Heap::new();
    let widgets = fixtures::widgets(&heap).unwrap();
    let cycle = fixtures::cycle(&heap).unwrap();
    let mut session = session(&heap, vec![widgets.view, widgets.internal, cycle.a]);

    let found = session.search("Widget");
    assert_eq!(found.rows.len(), 1, "{found:?}");
    let root = link(&found, "seeds[0]");
    assert_eq!(session.table().node(root).unwrap().type_name, "WidgetView");

    // Searching again reuses the same root ids.
    let again = session.search("widget");
    assert_eq!(link(&again, "seeds[0]"), root);
    assert_eq!(session.search("").rows.len(), 2);
}

#[test]
fn write_to_invalidated_weak_target_renders_invalid() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    heap.register_class(ClassBuilder::new("Watcher").weak_field("target", "@\"B\""))
        .unwrap();
    let watcher = heap.alloc_named("Watcher").unwrap();
    heap.set_ref_field(watcher, "target", Some(cycle.b)).unwrap();

    let mut session = session(&heap, vec![watcher]);
    let root = link(&session.summary(), "seeds[0]");
    let target = link(&session.open(root, OpenMode::Open), "target");
    assert!(!session.table().node(target).unwrap().is_held());

    heap.dealloc(cycle.b).unwrap();

    let written = session.write(target, "ratio", "1.0");
    assert_eq!(written.row("ratio").unwrap().cell, Cell::Invalid(None));
    assert!(written.to_markup().contains("#INVALID"));

    let reopened = session.open(target, OpenMode::Open);
    assert!(!reopened.is_error());
    assert!(reopened.to_markup().contains("#INVALID"));
}

#[test]
fn writes_update_scalars_and_references() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let mut session = session(&heap, vec![cycle.a]);
    let a = link(&session.summary(), "seeds[0]");

    let written = session.write(a, "score", "-7");
    assert_eq!(text(&written, "score"), "-7");
    assert_eq!(text(&session.open(a, OpenMode::Open), "score"), "-7");

    let cleared = session.write(a, "b", "nil");
    assert_eq!(cleared.row("b").unwrap().cell, Cell::Nil);
    assert_eq!(session.open(a, OpenMode::Open).row("b").unwrap().cell, Cell::Nil);

    let rejected = session.write(a, "score", "lots");
    assert!(rejected.is_error());
    let missing = session.write(a, "nope", "1");
    assert_eq!(missing.error.as_deref(), Some("A has no field \"nope\""));
}

#[test]
fn ids_strictly_increase_across_operations() {
    let heap = Heap::new();
    let roots = fixtures::demo_app(&heap).unwrap();
    let mut session = session(&heap, roots);
    let delegate = link(&session.summary(), "seeds[0]");
    let delegate_view = session.open(delegate, OpenMode::Open);
    let window = link(&delegate_view, "window");
    session.open(window, OpenMode::Open);
    session.open(delegate, OpenMode::Class);
    let library = link(&delegate_view, "library");
    session.open(library, OpenMode::Open);

    let ids: Vec<u32> = session.table().iter().map(|node| node.id.get()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] + 1 == pair[1]), "{ids:?}");
    assert_eq!(ids.first(), Some(&1));
}

#[test]
fn compact_dialect_objects_render_like_standard_ones() {
    let heap = Heap::new();
    let model = fixtures::compact_model(&heap).unwrap();
    let mut session = session(&heap, vec![model]);
    let root = link(&session.summary(), "seeds[0]");

    let view = session.open(root, OpenMode::Open);
    let labels: Vec<&str> = view.rows.iter().map(|row| row.label.as_str()).collect();
    assert_eq!(
        labels,
        vec!["count", "theme", "origin", "onChange", "observer", "enabled"]
    );
    assert_eq!(text(&view, "count"), "3");
    assert_eq!(text(&view, "theme"), "\"dark\"");
    assert_eq!(text(&view, "onChange"), "0x1000");
    match &view.row("observer").unwrap().cell {
        Cell::Link { text, .. } => assert!(text.ends_with("(weak)"), "{text}"),
        other => panic!("unexpected observer cell {other:?}"),
    }
}

#[test]
fn unknown_path_ids_yield_error_fragments() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let mut session = session(&heap, vec![cycle.a]);
    session.summary();

    let missing = PathId::new(999).unwrap();
    for mode in [OpenMode::Open, OpenMode::Class, OpenMode::Path] {
        let fragment = session.open(missing, mode);
        assert_eq!(fragment.error.as_deref(), Some("unknown path id #999"));
    }
    assert!(session
        .open(missing, OpenMode::Open)
        .to_markup()
        .starts_with("<div class=\"fragment error\">"));
}

#[test]
fn key_paths_follow_field_and_element_labels() {
    let heap = Heap::new();
    let library = fixtures::collections(&heap).unwrap();
    let mut session = session(&heap, vec![library.library]);
    let root = link(&session.summary(), "seeds[0]");
    let shelf = link(&session.open(root, OpenMode::Open), "shelf");
    let first = link(&session.open(shelf, OpenMode::Open), "[0]");

    let path = session.open(first, OpenMode::Path);
    assert_eq!(text(&path, "path"), "seeds[0].shelf[0]");
}

#[test]
fn sessions_do_not_share_ids() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let mut first = session(&heap, vec![cycle.a]);
    let mut second = session(&heap, vec![cycle.a]);

    let a = link(&first.summary(), "seeds[0]");
    first.open(a, OpenMode::Open);
    assert_eq!(first.table().len(), 2);
    assert_eq!(second.table().len(), 0);

    let b_in_first = PathId::new(2).unwrap();
    assert!(second.open(b_in_first, OpenMode::Open).is_error());
}

#[test]
fn deeply_nested_encodings_render_as_undecodable() {
    // Small stack, so unbounded recursion in the decoder would abort the test binary.
    let worker = std::thread::Builder::new()
        .stack_size(256 * 1024)
        .spawn(|| {
            let mut w = MetaWriter::new();
            w.write_u8(0);
            w.write_u16(1);
            w.write_str("p");
            w.write_u32(0);
            w.write_str(&format!("{}i", "^".repeat(60_000)));
            w.write_u8(Qualifier::Unretained.to_byte());

            let heap = Heap::new();
            heap.register_class(ClassBuilder::new("Evil").field("p", "^i").raw_metadata(w.into_vec()))
                .unwrap();
            let evil = heap.alloc_named("Evil").unwrap();
            let mut session = session(&heap, vec![evil]);

            let summary = session.summary();
            let root = link(&summary, "seeds[0]");
            assert!(summary.to_markup().contains("[#TYPE]"));
            session.open(root, OpenMode::Open)
        })
        .unwrap();

    let view = worker.join().unwrap();
    match view.row("type").map(|row| &row.cell) {
        Some(Cell::Undecodable(reason)) => assert!(reason.contains("nests deeper"), "{reason}"),
        other => panic!("expected #TYPE row, got {other:?}"),
    }
}
