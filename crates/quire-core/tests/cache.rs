use std::{fs, path::Path, time::Duration};

use quire_core::{
    cache::{CacheJob, CachePayload, CacheStore, CacheWriter, SourceFingerprint},
    config::{AddressingMode, ReaderConfig},
    layout::{CachedLayout, LayoutKey, PaginationEngine},
    text::import_path,
    types::{Document, Resource},
};

const SOURCE: &str = "# First\n\nOpening paragraph with *emphasis*.\n\n# Second\n\n- one\n- two\n";

fn write_source(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("book.md");
    fs::write(&path, SOURCE).unwrap();
    fs::canonicalize(&path).unwrap()
}

fn built_layout(width: usize, mode: AddressingMode) -> (LayoutKey, CachedLayout) {
    let book = quire_core::types::Book::new(
        "Layout",
        vec![quire_core::types::Chapter::new(
            1,
            "One",
            "Some text here.",
            quire_core::types::ContentFormat::Text,
        )],
    );
    let config = ReaderConfig {
        page_numbering_mode: mode,
        ..ReaderConfig::default()
    };
    let mut engine = PaginationEngine::new(config, width, 24);
    engine.build(&book, |_, _| {}).unwrap();
    engine.export_layout().unwrap()
}

#[test]
fn payload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(dir.path());
    let store = CacheStore::new(dir.path().join("cache"));

    let book = import_path(&path).unwrap();
    for chapter in &book.chapters {
        chapter.blocks();
    }
    let fp = SourceFingerprint::compute(&path).unwrap();
    let mut payload = CachePayload::new(&fp, &path, &book);
    let (key, layout) = built_layout(80, AddressingMode::Dynamic);
    payload.layouts.insert(key, layout.clone());
    assert!(store.save_payload(&payload));
    assert!(store.is_cached(&path));

    let loaded = store.load_for_source(&path).unwrap();
    assert_eq!(loaded.book, payload.book);
    assert_eq!(loaded.layouts.get(&key), Some(&layout));

    let restored = store.restore_book(&loaded);
    assert_eq!(restored.chapter_count(), book.chapter_count());
    assert_eq!(restored.cache_sha(), Some(fp.sha256.as_str()));
    for (a, b) in restored.chapters.iter().zip(&book.chapters) {
        assert!(a.has_blocks());
        assert_eq!(a.blocks(), b.blocks());
        assert_eq!(a.title, b.title);
    }
}

#[test]
fn one_byte_change_invalidates() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(dir.path());
    let store = CacheStore::new(dir.path().join("cache"));
    let book = import_path(&path).unwrap();
    let fp = SourceFingerprint::compute(&path).unwrap();
    assert!(store.save_payload(&CachePayload::new(&fp, &path, &book)));
    assert!(store.load_for_source(&path).is_some());

    fs::write(&path, SOURCE.replacen("Opening", "Opfning", 1)).unwrap();
    assert!(!store.is_cached(&path));
    assert!(store.load_for_source(&path).is_none());
    // The superseded entry is gone from disk too.
    assert!(store.manifest_entries().is_empty());
    assert!(store.load_layout(&fp.sha256, &built_layout(80, AddressingMode::Dynamic).0).is_none());
}

#[test]
fn layout_mutation_merges_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let (k1, l1) = built_layout(80, AddressingMode::Dynamic);
    let (k2, l2) = built_layout(60, AddressingMode::Absolute);
    assert_ne!(k1, k2);

    assert!(store.mutate_layouts("fp", |m| {
        m.insert(k1, l1.clone());
    }));
    assert!(store.mutate_layouts("fp", |m| {
        assert!(m.contains_key(&k1));
        m.insert(k2, l2.clone());
    }));
    assert_eq!(store.load_layout("fp", &k1), Some(l1));
    assert_eq!(store.load_layout("fp", &k2), Some(l2));
    assert!(dir
        .path()
        .join("layouts/fp")
        .join(format!("{k1}.json"))
        .exists());
}

#[test]
fn resources_survive_the_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_source(dir.path());
    let store = CacheStore::new(dir.path().join("cache"));
    let mut book = import_path(&path).unwrap();
    book.resources.push(Resource {
        href: "img/cover.png".into(),
        media_type: "image/png".into(),
        data: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
    });
    let fp = SourceFingerprint::compute(&path).unwrap();
    let payload = CachePayload::new(&fp, &path, &book);
    assert!(store.save_book(&payload, &book.resources));

    let loaded = store.load_for_source(&path).unwrap();
    let restored = store.restore_book(&loaded);
    assert_eq!(restored.resource("img/cover.png"), book.resource("img/cover.png"));
}

#[test]
fn writer_drains_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::new(dir.path());
    let writer = CacheWriter::spawn(store.clone());
    let mut keys = Vec::new();
    for width in [40, 50, 60, 70] {
        let (key, layout) = built_layout(width, AddressingMode::Dynamic);
        keys.push(key);
        writer
            .submit(CacheJob::StoreLayout {
                fingerprint: "fp".into(),
                key,
                layout,
            })
            .unwrap();
    }
    writer.shutdown(Duration::from_secs(10)).unwrap();
    for key in keys {
        assert!(store.load_layout("fp", &key).is_some(), "{key}");
    }
}

#[test]
fn unwritable_root_is_only_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("file");
    fs::write(&blocker, "not a directory").unwrap();
    let store = CacheStore::new(blocker.join("cache"));
    let path = write_source(dir.path());
    let book = import_path(&path).unwrap();
    let fp = SourceFingerprint::compute(&path).unwrap();
    assert!(!store.save_payload(&CachePayload::new(&fp, &path, &book)));
    assert!(store.load_for_source(&path).is_none());
    assert!(!store.is_cached(&path));
}
