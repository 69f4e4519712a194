use std::sync::Arc;

use heapscope_runtime::{fixtures, Heap, ObjectRef};
use heapscope_sweep::{snapshot, ExclusionSet, Probe, StaticSeeds};

fn probe(heap: &Arc<Heap>, seeds: &[ObjectRef]) -> Arc<Probe> {
    Arc::new(
        Probe::new(Arc::clone(heap), StaticSeeds(seeds.to_vec()))
            .with_exclusions(ExclusionSet::parse(["^_", "Internal$"]).unwrap()),
    )
}

#[test]
fn snapshots_of_an_unchanged_graph_are_identical() {
    let heap = Heap::new();
    let seeds = fixtures::demo_app(&heap).unwrap();

    let first = snapshot(probe(&heap, &seeds), &seeds);
    let second = snapshot(probe(&heap, &seeds), &seeds);
    assert_eq!(first, second);
    assert!(first.starts_with("<!DOCTYPE html>"));
    assert!(first.ends_with("</html>\n"));
}

#[test]
fn snapshot_covers_every_reachable_node() {
    let heap = Heap::new();
    let seeds = fixtures::demo_app(&heap).unwrap();
    let document = snapshot(probe(&heap, &seeds), &seeds);

    // Every in-document link resolves to a section.
    for (index, _) in document.match_indices("href=\"#node-") {
        let rest = &document[index + "href=\"#node-".len()..];
        let id: String = rest.chars().take_while(char::is_ascii_digit).collect();
        assert!(
            document.contains(&format!("<section id=\"node-{id}\">")),
            "dangling link to node {id}"
        );
    }
    assert!(document.contains("&quot;Main &lt;Window&gt;&quot;"));
    assert!(document.contains("&quot;Demo &amp; Co&quot;"));
    assert!(document.contains("applicationDidFinishLaunching:"));
}

#[test]
fn excluded_types_appear_but_are_not_expanded() {
    let heap = Heap::new();
    let seeds = fixtures::demo_app(&heap).unwrap();
    let document = snapshot(probe(&heap, &seeds), &seeds);

    assert!(document.contains("_PrivateCache is not swept"));
    assert!(document.contains("WidgetInternal is not swept"));
    // The cache's only field is never read.
    assert!(!document.contains(">hits<"));
}

#[test]
fn snapshot_leaves_no_holds_behind() {
    let heap = Heap::new();
    let cycle = fixtures::cycle(&heap).unwrap();
    let seeds = [cycle.a];
    let document = snapshot(probe(&heap, &seeds), &seeds);
    assert!(document.contains("<section id=\"node-1\">"));
    assert!(document.contains("<section id=\"node-2\">"));
    assert!(!document.contains("<section id=\"node-3\">"));
    assert_eq!(heap.hold_count(cycle.a), 0);
    assert_eq!(heap.hold_count(cycle.b), 0);
}
