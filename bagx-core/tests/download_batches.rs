use bagx_core::bag::Bag;
use bagx_core::builder::{BuilderConfig, ManifestBuilder};
use bagx_core::download::{DownloadConfig, DownloadOutcome, DownloadReport, Downloader};
use bagx_core::manifest::{Checksum, ManifestEntry, ManifestWriter};
use bagx_core::memory::MemoryStore;
use std::collections::HashSet;

fn build(store: &MemoryStore, bag: &Bag, containers: &[&str]) {
    let b = ManifestBuilder::new(store, BuilderConfig::default());
    for c in containers {
        b.build(c, &bag.manifest_path()).unwrap();
    }
}

fn download(store: &MemoryStore, bag: &Bag, container: &str) -> DownloadReport {
    Downloader::new(store, bag, DownloadConfig::default())
        .download(container)
        .unwrap()
}

fn write_manifest(bag: &Bag, entries: &[ManifestEntry]) {
    let mut w = ManifestWriter::append_to(&bag.manifest_path()).unwrap();
    for e in entries {
        w.append(e).unwrap();
    }
    w.finish().unwrap();
}

#[test]
fn batches_split_at_one_thousand() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    for i in 0..2001 {
        let payload = format!("payload {}", i);
        store.put("bulk", &format!("obj/{:05}", i), payload.as_bytes());
    }
    build(&store, &bag, &["bulk"]);

    let report = download(&store, &bag, "bulk");
    assert_eq!(store.bulk_calls(), [1000, 1000, 1]);
    assert_eq!(report.batches, 3);
    assert_eq!(report.outcomes.len(), 2001);
    let unique: HashSet<&str> = report.outcomes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(unique.len(), 2001);
    assert_eq!(report.ok(), 2001);
    let last = bag.container_dir("bulk").join("obj/02000");
    assert_eq!(std::fs::read(last).unwrap(), b"payload 2000");
}

#[test]
fn exact_multiple_has_no_empty_trailing_batch() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    for i in 0..6 {
        store.put("c", &format!("{}", i), b"x");
    }
    build(&store, &bag, &["c"]);
    let cfg = DownloadConfig {
        batch_size: 3,
        ..Default::default()
    };
    Downloader::new(&store, &bag, cfg).download("c").unwrap();
    assert_eq!(store.bulk_calls(), [3, 3]);
}

#[test]
fn second_run_reports_unmodified() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    store.put("c", "a.txt", b"alpha");
    store.put("c", "sub/b.txt", b"beta");
    build(&store, &bag, &["c"]);

    let dl = Downloader::new(&store, &bag, DownloadConfig::default());
    assert_eq!(dl.download("c").unwrap().ok(), 2);
    let again = dl.download("c").unwrap();
    assert_eq!(again.unmodified(), 2);
    assert_eq!(again.problems(), 0);
}

#[test]
fn per_object_failures_are_classified_not_fatal() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    store.put("c", "good", b"fine");
    store.put("c", "forbidden", b"nope");
    store.put("c", "broken", b"gone");
    store.put("c", "no-reason", b"??");
    store.fail_object("c", "forbidden", 403, Some("Forbidden"));
    store.break_object("c", "broken", "connection reset by peer");
    store.fail_object("c", "no-reason", 500, None);
    build(&store, &bag, &["c"]);

    let report = download(&store, &bag, "c");
    let by_name = |n: &str| {
        report
            .outcomes
            .iter()
            .find(|(o, _)| o == n)
            .map(|(_, r)| r.clone())
            .unwrap()
    };
    assert_eq!(by_name("good"), DownloadOutcome::Ok);
    assert_eq!(
        by_name("forbidden"),
        DownloadOutcome::Failed {
            status: 403,
            reason: "Forbidden".into()
        }
    );
    assert_eq!(
        by_name("broken"),
        DownloadOutcome::Error {
            message: "connection reset by peer".into()
        }
    );
    assert_eq!(
        by_name("no-reason"),
        DownloadOutcome::Error {
            message: "injected failure".into()
        }
    );
    assert_eq!(report.problems(), 3);
}

#[test]
fn folders_are_created_locally_and_other_containers_ignored() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    store.put("a", "dir/", b"");
    store.put("a", "dir/file", b"one");
    store.put("a", "lonely/", b"");
    store.put("a", "lonely/deeper/", b"");
    store.put("a", "sub/.keep", b"");
    store.put("b", "other", b"two");
    build(&store, &bag, &["a", "b"]);

    let report = download(&store, &bag, "a");
    assert_eq!(report.placeholders, 4);
    let expected = [("dir/file".to_string(), DownloadOutcome::Ok)];
    assert_eq!(report.outcomes, expected);
    assert_eq!(store.bulk_calls(), [1]);

    let root = bag.container_dir("a");
    assert!(root.join("lonely/deeper").is_dir());
    let keep = root.join("sub/.keep");
    assert!(keep.is_file());
    assert_eq!(std::fs::metadata(keep).unwrap().len(), 0);
    let file = std::fs::read(root.join("dir/file")).unwrap();
    assert_eq!(file, b"one");
    assert!(!bag.container_dir("b").join("other").exists());
}

#[test]
fn placeholder_without_slash_yields_to_a_real_directory() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let store = MemoryStore::new();
    store.put("c", "photos", b"");
    store.put("c", "photos/cat.jpg", b"meow");
    build(&store, &bag, &["c"]);

    let report = download(&store, &bag, "c");
    assert_eq!(report.problems(), 0);
    assert_eq!(report.placeholders, 1);
    assert!(bag.container_dir("c").join("photos").is_dir());
}

#[test]
fn existing_placeholder_file_is_left_alone() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    write_manifest(&bag, &[ManifestEntry::new("c", "note", Checksum::Folder)]);
    let note = bag.container_dir("c").join("note");
    std::fs::create_dir_all(bag.container_dir("c")).unwrap();
    std::fs::write(&note, b"kept").unwrap();

    let store = MemoryStore::new();
    store.create_container("c");
    let report = download(&store, &bag, "c");
    assert_eq!(report.placeholders, 1);
    assert!(store.bulk_calls().is_empty());
    assert_eq!(std::fs::read(&note).unwrap(), b"kept");
}

#[test]
fn unsafe_manifest_paths_never_reach_the_store() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    write_manifest(
        &bag,
        &[
            ManifestEntry::new("c", "../../escape", Checksum::Md5("0".repeat(32))),
            ManifestEntry::new("c", "../../outside/", Checksum::Folder),
        ],
    );

    let store = MemoryStore::new();
    store.create_container("c");
    let report = download(&store, &bag, "c");
    assert_eq!(report.outcomes.len(), 2);
    assert!(report
        .outcomes
        .iter()
        .all(|(_, o)| matches!(o, DownloadOutcome::Error { .. })));
    assert_eq!(report.placeholders, 0);
    assert!(store.bulk_calls().is_empty());
    assert!(!td.path().join("outside").exists());
}

#[test]
fn objects_gone_since_listing_fail_with_not_found() {
    let td = tempfile::tempdir().unwrap();
    let bag = Bag::new(td.path());
    let checksum = Checksum::Md5("0".repeat(32));
    write_manifest(&bag, &[ManifestEntry::new("c", "vanished", checksum)]);

    let store = MemoryStore::new();
    store.create_container("c");
    let report = download(&store, &bag, "c");
    assert_eq!(
        report.outcomes[0].1,
        DownloadOutcome::Failed {
            status: 404,
            reason: "Not Found".into()
        }
    );
}
