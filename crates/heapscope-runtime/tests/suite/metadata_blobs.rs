use heapscope_runtime::metadata::{MetaReader, FLAG_COMPACT, KIND_CLASS_MIN, KIND_RAW};
use heapscope_runtime::{ClassBuilder, CompactKind, Heap, Qualifier};

#[test]
fn standard_blob_lists_fields_in_declaration_order() {
    let heap = Heap::new();
    let id = heap
        .register_class(
            ClassBuilder::new("Pair")
                .field("left", "i")
                .weak_field("right", "@\"Pair\""),
        )
        .unwrap();
    let meta = heap.class(id).unwrap();

    let mut r = MetaReader::new(&meta.metadata);
    assert_eq!(r.read_u8().unwrap() & FLAG_COMPACT, 0);
    assert_eq!(r.read_u16().unwrap(), 2);
    assert_eq!(r.read_str().unwrap(), "left");
    assert_eq!(r.read_u32().unwrap(), 0);
    assert_eq!(r.read_str().unwrap(), "i");
    assert_eq!(r.read_u8().unwrap(), Qualifier::Strong.to_byte());
    assert_eq!(r.read_str().unwrap(), "right");
    assert_eq!(r.read_u32().unwrap(), 8);
    assert_eq!(r.read_str().unwrap(), "@\"Pair\"");
    assert_eq!(r.read_u8().unwrap(), Qualifier::Weak.to_byte());
    r.ensure_empty().unwrap();
}

#[test]
fn compact_blob_carries_name_table_and_kind_records() {
    let heap = Heap::new();
    let id = heap
        .register_class(
            ClassBuilder::compact("Model")
                .compact_field("count", CompactKind::Raw("Si".to_string()), Qualifier::Strong)
                .compact_field("next", CompactKind::Class("Model".to_string()), Qualifier::Weak),
        )
        .unwrap();
    let meta = heap.class(id).unwrap();

    let mut r = MetaReader::new(&meta.metadata);
    assert_eq!(r.read_u8().unwrap(), FLAG_COMPACT);
    assert_eq!(r.read_u32().unwrap(), 2);
    let names_len = r.read_u32().unwrap() as usize;
    assert_eq!(r.read_bytes(names_len).unwrap(), b"count\0next\0");
    assert_eq!(r.read_u32().unwrap(), 0);
    assert_eq!(r.read_u32().unwrap(), 8);
    assert_eq!(r.read_u8().unwrap(), 0);
    assert_eq!(r.read_u8().unwrap(), 1);
    assert_eq!(r.read_u16().unwrap(), KIND_RAW);
    assert_eq!(r.read_str().unwrap(), "Si");
    assert_eq!(r.read_u16().unwrap(), KIND_CLASS_MIN);
    assert_eq!(r.read_str().unwrap(), "Model");
    r.ensure_empty().unwrap();
    assert_eq!(meta.instance_size, 16);
}
