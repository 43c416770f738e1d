use bagx_core::bag::Bag;
use bagx_core::export::{run_export, ExportOptions};
use bagx_core::manifest::read_all;
use bagx_core::memory::MemoryStore;
use bagx_core::verify::ValidationErrorKind;

fn account() -> MemoryStore {
    let s = MemoryStore::new();
    s.put("alpha", "readme.md", b"# hi");
    s.put("alpha", "img/", b"");
    s.put("alpha", "img/cat.png", b"\x89PNG");
    s.put("alpha", "huge.bin", b"joined");
    s.put("alpha", "huge.bin!CB_1", b"part");
    s.put("beta", "b.txt", b"beta");
    s.put("gamma", "g.txt", b"gamma");
    s
}

#[test]
fn allow_listed_containers_round_trip() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path().join("bag"));
    let store = account();
    let opts = ExportOptions {
        containers: Some(vec!["gamma".into(), "alpha".into()]),
        ..Default::default()
    };
    let report = run_export(&store, &bag, &opts).unwrap();
    assert_eq!(report.containers, ["alpha", "gamma"]);
    let items: Vec<usize> = report.builds.iter().map(|b| b.items).collect();
    assert_eq!(items, [4, 1]);
    assert_eq!(report.download_problems(), 0);

    let v = report.validation.expect("validation ran");
    assert!(v.is_verified(), "{:?}", v.errors);
    assert_eq!(v.checked, 5);
    assert!(!bag.container_dir("beta").exists());
    let segment = bag.container_dir("alpha").join("huge.bin!CB_1");
    assert!(!segment.exists());
}

#[test]
fn childless_zero_byte_objects_round_trip() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    store.put("c", "a.txt", b"alpha");
    store.put("c", "empty-folder/", b"");
    store.put("c", ".keep", b"");
    store.put("c", "deep/er/", b"");

    let report = run_export(&store, &bag, &ExportOptions::default()).unwrap();
    assert_eq!(report.download_problems(), 0);
    assert_eq!(report.downloads[0].placeholders, 3);
    let v = report.validation.unwrap();
    assert_eq!(v.error_count(), 0, "{:?}", v.errors);
    assert_eq!(v.folders, 3);
    assert!(v.untracked.is_empty(), "{:?}", v.untracked);

    let root = bag.container_dir("c");
    assert!(root.join("empty-folder").is_dir());
    assert!(root.join("deep/er").is_dir());
    assert_eq!(std::fs::read(root.join(".keep")).unwrap(), b"");

    // a second pass finds everything in place
    let again = run_export(&store, &bag, &ExportOptions::default()).unwrap();
    assert_eq!(again.downloads[0].unmodified(), 1);
    assert!(again.validation.unwrap().is_verified());
}

#[test]
fn reused_manifest_survives_and_drives_validation() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = account();
    run_export(&store, &bag, &ExportOptions::default()).unwrap();
    let manifest = read_all(&bag.manifest_path()).unwrap();

    std::fs::remove_file(bag.container_dir("beta").join("b.txt")).unwrap();
    let opts = ExportOptions {
        build_manifest: false,
        download: false,
        ..Default::default()
    };
    let report = run_export(&store, &bag, &opts).unwrap();
    assert!(report.manifest_reused);
    assert!(report.builds.is_empty());
    assert_eq!(read_all(&bag.manifest_path()).unwrap(), manifest);

    let v = report.validation.unwrap();
    assert_eq!(v.error_count(), 1);
    assert_eq!(v.errors[0].kind, ValidationErrorKind::MissingFile);
    assert_eq!(v.errors[0].path, "data/beta/b.txt");
}

#[test]
fn rebuild_replaces_rather_than_appends() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = account();
    let opts = ExportOptions {
        download: false,
        validate: false,
        ..Default::default()
    };
    run_export(&store, &bag, &opts).unwrap();
    let first = std::fs::read(bag.manifest_path()).unwrap();
    run_export(&store, &bag, &opts).unwrap();
    assert_eq!(std::fs::read(bag.manifest_path()).unwrap(), first);
}
