use heapscope_runtime::{protect, ClassBuilder, Fault, Heap, REF_SIZE};

#[test]
fn weak_target_goes_stale_after_dealloc() {
    let heap = Heap::new();
    heap.register_class(ClassBuilder::new("Owner").weak_field("peer", "@\"Owner\""))
        .unwrap();
    let owner = heap.alloc_named("Owner").unwrap();
    let peer = heap.alloc_named("Owner").unwrap();
    heap.set_ref_field(owner, "peer", Some(peer)).unwrap();

    heap.dealloc(peer).unwrap();

    let stored = protect(|| heap.read_ref(owner, 0)).unwrap();
    assert_eq!(stored, Some(peer));
    let fault = protect(|| heap.resolve(peer)).unwrap_err();
    assert_eq!(fault.signal_name(), "SIGSEGV");
}

#[test]
fn held_objects_outlive_host_dealloc_until_released() {
    let heap = Heap::new();
    let text = heap.alloc_text("kept");
    let hold = heap.hold(text).unwrap();
    heap.dealloc(text).unwrap();
    assert!(heap.is_live(text));
    assert_eq!(heap.hold_count(text), 1);
    assert_eq!(heap.text(text).unwrap(), "kept");

    drop(hold);
    let next = heap.alloc_text("next");
    assert_eq!(next.slot(), text.slot());
    assert!(matches!(heap.text(text), Err(Fault::Segmentation(_))));
}

#[test]
fn guarded_writes_outside_storage_report_bus_errors() {
    let heap = Heap::new();
    heap.register_class(ClassBuilder::new("Tiny").field("n", "c"))
        .unwrap();
    let tiny = heap.alloc_named("Tiny").unwrap();
    let status = protect(|| heap.write_bytes(tiny, 4, &[0; REF_SIZE]));
    assert!(matches!(status, Err(Fault::Bus(_))));
    // The object itself is untouched and still readable.
    assert_eq!(protect(|| heap.read_bytes(tiny, 0, 1)).unwrap(), vec![0]);
}
