//! File-backed repository: on-disk layout, parse errors, and per-document
//! exclusion across threads.

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use assert_fs::prelude::*;
use docket_core::{
    append_version, store, ContentRef, CoreError, DocumentId, DocumentSeed, FsRepository,
    Repository, StorageError, UserId,
};
use predicates::prelude::predicate;

fn alice() -> UserId {
    UserId::from("alice")
}

fn create_shared(repo: &FsRepository, name: &str, collaborators: &[&str]) -> DocumentId {
    let seed = DocumentSeed {
        name: name.to_string(),
        owner: alice(),
    };
    repo.create(seed, |txn| {
        for c in collaborators {
            txn.document_mut()
                .add_collaborator(&alice(), &UserId::from(*c))?;
        }
        let content = ContentRef(format!("content/{}/aa.txt", txn.document().id()));
        txn.document_mut().content = content.clone();
        append_version(txn, content, &alice(), None);
        Ok(txn.document().id())
    })
    .expect("create")
}

// ---------------------------------------------------------------------------
// 1. Layout and load errors
// ---------------------------------------------------------------------------

#[test]
fn create_writes_record_under_docket_root() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let repo = FsRepository::at(home.path());
    let id = create_shared(&repo, "spec", &["bob"]);

    home.child(format!(".docket/documents/{id}.yaml"))
        .assert(predicate::path::exists());
    let yaml = fs::read_to_string(store::record_path_at(home.path(), id)).expect("read");
    assert!(yaml.contains("name: spec"));
    assert!(yaml.contains("state: free"));
    assert!(yaml.contains("bob"));
}

#[test]
fn corrupt_record_returns_parse_error_with_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let dir = store::documents_dir_at(home.path());
    fs::create_dir_all(&dir).expect("mkdir");
    fs::write(dir.join("1.yaml"), b": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let repo = FsRepository::at(home.path());
    let err = repo.get(DocumentId(1)).unwrap_err();
    match &err {
        CoreError::Storage(StorageError::Parse { path, .. }) => {
            assert!(path.ends_with("1.yaml"));
        }
        other => panic!("expected parse error, got: {other}"),
    }
    assert!(err.to_string().contains("1.yaml"));
}

#[test]
fn stray_tmp_file_is_ignored_by_listing() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let repo = FsRepository::at(home.path());
    let id = create_shared(&repo, "spec", &[]);

    // Simulate a crash between write and rename.
    let tmp = store::record_path_at(home.path(), id).with_extension("yaml.tmp");
    fs::write(&tmp, b"CRASH - INCOMPLETE WRITE").expect("write crash tmp");

    let listed = repo.list().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "spec");
}

// ---------------------------------------------------------------------------
// 2. Concurrency
// ---------------------------------------------------------------------------

#[test]
fn concurrent_lock_claims_admit_exactly_one_holder() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let repo = FsRepository::at(home.path());
    let editors = ["bob", "carol", "dave", "erin"];
    let id = create_shared(&repo, "spec", &editors);

    let barrier = Arc::new(Barrier::new(editors.len()));
    let handles: Vec<_> = editors
        .iter()
        .map(|name| {
            let repo = FsRepository::at(home.path());
            let barrier = barrier.clone();
            let user = UserId::from(*name);
            thread::spawn(move || {
                barrier.wait();
                repo.update(id, |txn| txn.document_mut().acquire_lock(&user))
            })
        })
        .collect();

    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one editor may claim the lock");
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(
            r.as_ref().unwrap_err(),
            CoreError::DocumentLocked { .. }
        ));
    }

    let holder = repo.get(id).expect("get").edit_lock().holder().cloned();
    assert!(holder.is_some_and(|h| editors.contains(&h.0.as_str())));
}

#[test]
fn concurrent_appends_keep_a_gapless_chain() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let repo = FsRepository::at(home.path());
    let id = create_shared(&repo, "log", &[]);

    let handles: Vec<_> = (0..8)
        .map(|n| {
            let repo = FsRepository::at(home.path());
            thread::spawn(move || {
                repo.update(id, |txn| {
                    let content = ContentRef(format!("content/{n:02}.txt"));
                    Ok(append_version(txn, content, &alice(), None))
                })
            })
        })
        .collect();
    for h in handles {
        h.join().expect("thread").expect("append");
    }

    let versions = repo.versions(id).expect("versions");
    assert_eq!(versions.len(), 9);
    for (i, v) in versions.iter().enumerate() {
        assert_eq!(v.id.0, i as u64 + 1);
    }
    for pair in versions.windows(2) {
        assert!(pair[0].created_at <= pair[1].created_at);
    }
}
