use std::sync::Arc;

use heapscope_config::ProbeConfig;
use heapscope_runtime::{fixtures, Heap};
use heapscope_server::{probe_from_config, snapshot_probe};
use heapscope_sweep::{snapshot, StaticSeeds};

#[test]
fn snapshot_honours_configured_exclusions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("heapscope.toml");
    std::fs::write(
        &path,
        r#"
[snapshot]
exclusions = ["^_", "Internal$", "^Library$"]
"#,
    )
    .unwrap();
    let config = ProbeConfig::load_from_path(&path).unwrap();

    let heap = Heap::new();
    let seeds = fixtures::demo_app(&heap).unwrap();
    let probe = snapshot_probe(
        Arc::clone(&heap),
        StaticSeeds(seeds.clone()),
        &config.sweep,
        &config.snapshot,
    )
    .unwrap();
    let document = snapshot(Arc::new(probe), &seeds);
    assert!(document.contains("Library is not swept"));
    assert!(!document.contains(">shelf<"));
}

#[test]
fn leaf_types_are_not_expanded_into_fields() {
    let config = ProbeConfig::load_from_str(
        r#"
[sweep]
leaf_types = ["Book"]
"#,
    )
    .unwrap();
    let heap = Heap::new();
    let library = fixtures::collections(&heap).unwrap();
    let probe = probe_from_config(
        Arc::clone(&heap),
        StaticSeeds(vec![library.books[0]]),
        &config.sweep,
    )
    .unwrap();
    let document = snapshot(Arc::new(probe), &[library.books[0]]);
    assert!(!document.contains(">pages<"), "{document}");
}
