//! Sample object graphs.
//!
//! Used by the demo host in `heapscope-server` and by integration suites that
//! need a realistic heap to sweep.

use crate::metadata::{CompactKind, MetaWriter, Qualifier, FLAG_COMPACT};
use crate::{ClassBuilder, Heap, HeapError, ObjectRef};

fn f64s(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn set_text(heap: &Heap, obj: ObjectRef, field: &str, text: &str) -> Result<(), HeapError> {
    let text = heap.alloc_text(text);
    heap.set_ref_field(obj, field, Some(text))
}

/// Two objects referencing each other: `a.b` is strong, `b.a` is weak.
#[derive(Clone, Copy, Debug)]
pub struct Cycle {
    pub a: ObjectRef,
    pub b: ObjectRef,
}

pub fn cycle(heap: &Heap) -> Result<Cycle, HeapError> {
    heap.register_class(ClassBuilder::new("A").field("b", "@\"B\"").field("score", "i"))?;
    heap.register_class(ClassBuilder::new("B").weak_field("a", "@\"A\"").field("ratio", "d"))?;

    let a = heap.alloc_named("A")?;
    let b = heap.alloc_named("B")?;
    heap.set_ref_field(a, "b", Some(b))?;
    heap.set_field(a, "score", &42i32.to_le_bytes())?;
    heap.set_ref_field(b, "a", Some(a))?;
    heap.set_field(b, "ratio", &0.5f64.to_le_bytes())?;
    Ok(Cycle { a, b })
}

/// A public widget and an internal one, both under a shared `View` base.
#[derive(Clone, Copy, Debug)]
pub struct Widgets {
    pub view: ObjectRef,
    pub internal: ObjectRef,
}

pub fn widgets(heap: &Heap) -> Result<Widgets, HeapError> {
    register_view(heap)?;
    heap.register_class(
        ClassBuilder::new("WidgetView")
            .superclass("View")
            .field("title", "*")
            .weak_field("delegate", "@\"<WidgetDelegate>\"")
            .method("reload", "v16@0:8"),
    )?;
    heap.register_class(
        ClassBuilder::new("WidgetInternal")
            .superclass("View")
            .field("token", "Q"),
    )?;

    let view = heap.alloc_named("WidgetView")?;
    heap.set_field(view, "frame", &f64s(&[0.0, 0.0, 320.0, 44.0]))?;
    heap.set_field(view, "tag", &7i64.to_le_bytes())?;
    set_text(heap, view, "title", "Inbox")?;

    let internal = heap.alloc_named("WidgetInternal")?;
    heap.set_field(internal, "token", &0xfeedu64.to_le_bytes())?;
    Ok(Widgets { view, internal })
}

fn register_view(heap: &Heap) -> Result<(), HeapError> {
    if heap.class_by_name("View").is_some() {
        return Ok(());
    }
    heap.register_class(
        ClassBuilder::new("View")
            .field("frame", "{Rect=\"x\"d\"y\"d\"w\"d\"h\"d}")
            .field("tag", "q")
            .field("hidden", "B")
            .weak_field("superview", "@\"View\"")
            .method("layout", "v16@0:8")
            .method("setHidden:", "v20@0:8B16"),
    )?;
    Ok(())
}

/// Instance of a class described with the compact metadata dialect.
pub fn compact_model(heap: &Heap) -> Result<ObjectRef, HeapError> {
    register_view(heap)?;
    heap.register_class(
        ClassBuilder::compact("SettingsModel")
            .compact_field("count", CompactKind::Raw("Si".to_string()), Qualifier::Strong)
            .compact_field("theme", CompactKind::Raw("SS".to_string()), Qualifier::Strong)
            .compact_field(
                "origin",
                CompactKind::Raw("V4main5Point_dd".to_string()),
                Qualifier::Strong,
            )
            .compact_field("onChange", CompactKind::Function, Qualifier::Strong)
            .compact_field(
                "observer",
                CompactKind::Optional(Box::new(CompactKind::NativeClass("View".to_string()))),
                Qualifier::Weak,
            )
            .compact_field("enabled", CompactKind::BareOptional("B".to_string()), Qualifier::Strong),
    )?;

    let model = heap.alloc_named("SettingsModel")?;
    heap.set_field(model, "count", &3i64.to_le_bytes())?;
    set_text(heap, model, "theme", "dark")?;
    heap.set_field(model, "origin", &f64s(&[1.5, -2.0]))?;
    heap.set_field(model, "onChange", &0x1000u64.to_le_bytes())?;
    heap.set_field(model, "enabled", &[1])?;
    let observer = heap.alloc_named("View")?;
    heap.set_ref_field(model, "observer", Some(observer))?;
    Ok(model)
}

/// Object whose class metadata carries an unknown compact kind record.
pub fn corrupt(heap: &Heap) -> Result<ObjectRef, HeapError> {
    heap.register_class(
        ClassBuilder::compact("Mangled")
            .compact_field("value", CompactKind::Raw("Si".to_string()), Qualifier::Strong)
            .compact_field("mystery", CompactKind::Unrecognized(0x42), Qualifier::Strong),
    )?;
    heap.alloc_named("Mangled")
}

/// Object whose metadata blob is cut short mid-table.
pub fn truncated(heap: &Heap) -> Result<ObjectRef, HeapError> {
    let mut w = MetaWriter::new();
    w.write_u8(FLAG_COMPACT);
    w.write_u32(2);
    w.write_u32(64);
    heap.register_class(ClassBuilder::new("Truncated").field("n", "i").raw_metadata(w.into_vec()))?;
    heap.alloc_named("Truncated")
}

/// Container holding an array, a set and a dictionary that share members.
#[derive(Clone, Debug)]
pub struct Collections {
    pub library: ObjectRef,
    pub books: Vec<ObjectRef>,
}

pub fn collections(heap: &Heap) -> Result<Collections, HeapError> {
    heap.register_class(
        ClassBuilder::new("Book")
            .field("title", "*")
            .field("pages", "I")
            .field("rating", "f"),
    )?;
    heap.register_class(
        ClassBuilder::new("Library")
            .field("shelf", "@\"Array\"")
            .field("favorites", "@\"Set\"")
            .field("byTitle", "@\"Dictionary\"")
            .unretained_field("featured", "@\"Book\""),
    )?;

    let mut books = Vec::new();
    for (title, pages) in [("Dune", 412u32), ("Emma", 474), ("Ulysses", 730)] {
        let book = heap.alloc_named("Book")?;
        set_text(heap, book, "title", title)?;
        heap.set_field(book, "pages", &pages.to_le_bytes())?;
        heap.set_field(book, "rating", &4.5f32.to_le_bytes())?;
        books.push(book);
    }

    let shelf = heap.alloc_array(vec![Some(books[0]), None, Some(books[1]), Some(books[2])]);
    let favorites = heap.alloc_set(vec![books[2]]);
    let by_title = heap.alloc_dictionary(vec![
        ("Dune".to_string(), Some(books[0])),
        ("Missing".to_string(), None),
    ]);

    let library = heap.alloc_named("Library")?;
    heap.set_ref_field(library, "shelf", Some(shelf))?;
    heap.set_ref_field(library, "favorites", Some(favorites))?;
    heap.set_ref_field(library, "byTitle", Some(by_title))?;
    heap.set_ref_field(library, "featured", Some(books[1]))?;
    Ok(Collections { library, books })
}

/// Small application graph for the demo host: delegate, window, a view
/// hierarchy with sub-views, collections, a compact-dialect model and a
/// private cache object.
pub fn demo_app(heap: &Heap) -> Result<Vec<ObjectRef>, HeapError> {
    let widgets = widgets(heap)?;
    let settings = compact_model(heap)?;
    let library = collections(heap)?;

    heap.register_class(
        ClassBuilder::new("Window")
            .field("title", "*")
            .field("rootView", "@\"View\"")
            .weak_field("owner", "@\"AppDelegate\"")
            .field("visible", "B")
            .field("level", "s"),
    )?;
    heap.register_class(
        ClassBuilder::new("AppDelegate")
            .field("name", "*")
            .field("window", "@\"Window\"")
            .field("settings", "@\"SettingsModel\"")
            .field("library", "@\"Library\"")
            .field("launchCount", "l")
            .field("lastAction", ":")
            .field("viewClass", "#")
            .unretained_field("scratch", "^v")
            .method("applicationDidFinishLaunching:", "v24@0:8@16"),
    )?;
    heap.register_class(ClassBuilder::new("_PrivateCache").field("hits", "Q"))?;

    let root_view = heap.alloc_named("View")?;
    heap.set_field(root_view, "frame", &f64s(&[0.0, 0.0, 1024.0, 768.0]))?;
    heap.set_ref_field(widgets.view, "superview", Some(root_view))?;
    heap.set_ref_field(widgets.internal, "superview", Some(root_view))?;
    heap.set_related(root_view, "subviews", vec![widgets.view, widgets.internal])?;

    let window = heap.alloc_named("Window")?;
    set_text(heap, window, "title", "Main <Window>")?;
    heap.set_ref_field(window, "rootView", Some(root_view))?;
    heap.set_field(window, "visible", &[1])?;
    heap.set_field(window, "level", &3i16.to_le_bytes())?;

    let delegate = heap.alloc_named("AppDelegate")?;
    set_text(heap, delegate, "name", "Demo & Co")?;
    heap.set_ref_field(delegate, "window", Some(window))?;
    heap.set_ref_field(delegate, "settings", Some(settings))?;
    heap.set_ref_field(delegate, "library", Some(library.library))?;
    heap.set_field(delegate, "launchCount", &12i64.to_le_bytes())?;
    let selector = heap.intern_symbol("applicationDidFinishLaunching:");
    heap.set_field(delegate, "lastAction", &selector.to_le_bytes())?;
    if let Some(view_class) = heap.class_by_name("WidgetView") {
        heap.set_field(delegate, "viewClass", &view_class.id.to_raw().to_le_bytes())?;
    }
    heap.set_field(delegate, "scratch", &0xdead_beefu64.to_le_bytes())?;
    heap.set_ref_field(window, "owner", Some(delegate))?;

    let cache = heap.alloc_named("_PrivateCache")?;
    heap.set_field(cache, "hits", &99u64.to_le_bytes())?;

    Ok(vec![delegate, window, cache])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_app_builds_on_a_fresh_heap() {
        let heap = Heap::new();
        let seeds = demo_app(&heap).unwrap();
        assert_eq!(seeds.len(), 3);
        for seed in seeds {
            assert!(heap.is_live(seed));
        }
    }

    #[test]
    fn cycle_links_both_ways() {
        let heap = Heap::new();
        let Cycle { a, b } = cycle(&heap).unwrap();
        let a_meta = heap.class_by_name("A").unwrap();
        let (offset, _) = a_meta.field_layout("b").unwrap();
        assert_eq!(heap.read_ref(a, offset).unwrap(), Some(b));
    }
}
