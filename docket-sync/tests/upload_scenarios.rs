//! End-to-end editing scenarios over the in-memory repository and store.

use docket_core::{
    CoreError, DocumentId, EditLock, MemoryContentStore, MemoryRepository, StorageError, Upload,
    UserId, VersionId,
};
use docket_sync::{
    compute_diff, DiffArtifact, Engine, EngineConfig, IdenticalUploadPolicy, LineTag,
};
use rstest::rstest;

type MemEngine = Engine<MemoryRepository, MemoryContentStore>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn user(name: &str) -> UserId {
    UserId::from(name)
}

fn engine_with(policy: IdenticalUploadPolicy) -> MemEngine {
    init_logging();
    let config = EngineConfig {
        identical_upload: policy,
        ..EngineConfig::default()
    };
    Engine::new(MemoryRepository::new(), MemoryContentStore::new(), config)
}

/// alice owns "spec" ("A\nB\nC\n"), bob collaborates.
fn shared_spec(engine: &MemEngine) -> DocumentId {
    let (doc, _) = engine
        .create_document("spec", &Upload::new("spec.txt", "A\nB\nC\n"), &user("alice"))
        .expect("create");
    engine
        .add_collaborator(doc.id(), &user("alice"), &user("bob"))
        .expect("share");
    doc.id()
}

// ---------------------------------------------------------------------------
// 1. The edit cycle
// ---------------------------------------------------------------------------

#[test]
fn collaborator_edit_cycle_records_diff_and_frees_lock() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);

    let handle = engine.fetch_and_lock(id, &user("bob")).expect("fetch");
    assert_eq!(handle.bytes, b"A\nB\nC\n");
    assert_eq!(handle.file_name, "spec.txt");
    assert_eq!(handle.media_type, "text/plain");
    assert_eq!(
        engine.get_document(id).unwrap().edit_lock(),
        &EditLock::HeldBy(user("bob"))
    );

    let (doc, version) = engine
        .upload_new_content(id, &Upload::new("spec.txt", "A\nX\nC\n"), &user("bob"))
        .expect("upload");
    assert!(doc.edit_lock().is_free());
    assert_eq!(version.id, VersionId(2));
    assert_eq!(version.author, user("bob"));
    assert_eq!(version.content, doc.content);
    assert_eq!(engine.read_version(id, VersionId(2)).unwrap(), b"A\nX\nC\n");

    let diff_bytes = engine
        .read_diff(id, VersionId(2))
        .unwrap()
        .expect("version 2 has a diff");
    let artifact = DiffArtifact::parse(&diff_bytes).expect("parse");
    let changed: Vec<_> = artifact
        .lines()
        .iter()
        .filter(|l| l.tag != LineTag::Unchanged)
        .map(|l| (l.tag, l.text_lossy().into_owned()))
        .collect();
    assert_eq!(
        changed,
        vec![
            (LineTag::Removed, "B\n".to_string()),
            (LineTag::Added, "X\n".to_string()),
        ]
    );

    let versions = engine.list_versions(id).unwrap();
    assert_eq!(versions.len(), 2);
    assert!(versions[0].diff.is_none());
    assert!(versions[0].created_at <= versions[1].created_at);
}

#[rstest]
#[case::keep_lock(IdenticalUploadPolicy::KeepLock, false)]
#[case::release_lock(IdenticalUploadPolicy::ReleaseLock, true)]
fn identical_upload_appends_plain_version(
    #[case] policy: IdenticalUploadPolicy,
    #[case] expect_free: bool,
) {
    let engine = engine_with(policy);
    let id = shared_spec(&engine);
    let before = engine.get_document(id).unwrap().content;
    engine.fetch_and_lock(id, &user("bob")).expect("fetch");
    let blobs = engine.store().len();

    let (doc, version) = engine
        .upload_new_content(id, &Upload::new("spec.txt", "A\nB\nC\n"), &user("bob"))
        .expect("upload");
    assert!(version.diff.is_none());
    assert_eq!(version.content, before);
    assert_eq!(doc.content, before);
    assert_eq!(doc.edit_lock().is_free(), expect_free);
    assert_eq!(engine.store().len(), blobs, "no new blobs for identical content");
    assert_eq!(engine.list_versions(id).unwrap().len(), 2);
}

#[test]
fn binary_content_round_trips_through_the_diff() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let old: Vec<u8> = vec![0x89, b'P', b'N', b'G', b'\n', 0x00, 0xff, b'\n'];
    let new: Vec<u8> = vec![0x89, b'P', b'N', b'G', b'\n', 0x01, 0xfe];
    let (doc, _) = engine
        .create_document("logo", &Upload::new("logo.png", old.clone()), &user("alice"))
        .expect("create");
    engine.fetch_and_lock(doc.id(), &user("alice")).expect("fetch");
    engine
        .upload_new_content(doc.id(), &Upload::new("logo.png", new.clone()), &user("alice"))
        .expect("upload");

    let bytes = engine.read_diff(doc.id(), VersionId(2)).unwrap().expect("diff");
    let artifact = DiffArtifact::parse(&bytes).expect("parse");
    assert_eq!(artifact.new_lines().concat(), new);
    assert_eq!(artifact.old_lines().concat(), old);
}

// ---------------------------------------------------------------------------
// 2. Refusals leave state alone
// ---------------------------------------------------------------------------

#[test]
fn stranger_fetch_changes_nothing() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);
    let before = engine.get_document(id).unwrap();

    let err = engine.fetch_and_lock(id, &user("mallory")).unwrap_err();
    assert!(matches!(err, CoreError::NotAuthorized { .. }));
    assert_eq!(engine.get_document(id).unwrap(), before);
}

#[test]
fn owner_cannot_add_self() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);
    let err = engine
        .add_collaborator(id, &user("alice"), &user("alice"))
        .unwrap_err();
    assert!(matches!(err, CoreError::OwnerCannotBeCollaborator { .. }));
}

#[test]
fn second_editor_is_locked_out_until_upload() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);
    engine.fetch_and_lock(id, &user("bob")).expect("bob");

    let err = engine.fetch_and_lock(id, &user("alice")).unwrap_err();
    match err {
        CoreError::DocumentLocked { holder, .. } => assert_eq!(holder, user("bob")),
        other => panic!("expected DocumentLocked, got {other}"),
    }
    let err = engine
        .remove_collaborator(id, &user("alice"), &user("bob"))
        .unwrap_err();
    assert!(matches!(err, CoreError::CollaboratorIsEditing { .. }));

    engine
        .upload_new_content(id, &Upload::new("spec.txt", "A\n"), &user("bob"))
        .expect("upload");
    engine.fetch_and_lock(id, &user("alice")).expect("alice after bob");
    engine
        .remove_collaborator(id, &user("alice"), &user("bob"))
        .expect("bob is idle now");
}

// ---------------------------------------------------------------------------
// 3. Rollback
// ---------------------------------------------------------------------------

#[test]
fn failed_commit_rolls_back_blobs_and_document() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);
    engine.fetch_and_lock(id, &user("bob")).expect("fetch");
    let doc_before = engine.get_document(id).unwrap();
    let blobs_before = engine.store().len();

    engine.repository().fail_next_commit();
    let err = engine
        .upload_new_content(id, &Upload::new("spec.txt", "A\nX\nC\n"), &user("bob"))
        .unwrap_err();
    assert!(matches!(err, CoreError::Storage(StorageError::Unavailable(_))));

    assert_eq!(engine.get_document(id).unwrap(), doc_before);
    assert_eq!(engine.list_versions(id).unwrap().len(), 1);
    assert_eq!(engine.store().len(), blobs_before, "created blobs are removed");

    // The same upload succeeds once storage recovers.
    engine
        .upload_new_content(id, &Upload::new("spec.txt", "A\nX\nC\n"), &user("bob"))
        .expect("retry");
    assert_eq!(engine.store().len(), blobs_before + 2);
}

#[test]
fn failed_commit_removes_spilled_diff_and_staged_blobs() {
    init_logging();
    let scratch = tempfile::tempdir().expect("scratch dir");
    let config = EngineConfig {
        spill_threshold: 16,
        scratch_dir: Some(scratch.path().to_path_buf()),
        ..EngineConfig::default()
    };
    let engine: MemEngine =
        Engine::new(MemoryRepository::new(), MemoryContentStore::new(), config);
    let id = shared_spec(&engine);
    engine.fetch_and_lock(id, &user("bob")).expect("fetch");
    let doc_before = engine.get_document(id).unwrap();
    let blobs_before = engine.store().len();

    let edited: String = (0..200).map(|n| format!("line {n}\n")).collect();
    engine.repository().fail_next_commit();
    let err = engine
        .upload_new_content(id, &Upload::new("spec.txt", edited.as_str()), &user("bob"))
        .unwrap_err();
    assert_eq!(err.kind(), "storage_error");

    let leftovers: Vec<_> = std::fs::read_dir(scratch.path())
        .expect("read scratch dir")
        .collect();
    assert!(leftovers.is_empty(), "spill file left behind: {leftovers:?}");
    assert_eq!(engine.store().len(), blobs_before, "staged blobs are removed");
    assert_eq!(engine.list_versions(id).unwrap().len(), 1);
    assert_eq!(engine.get_document(id).unwrap(), doc_before);
}

#[test]
fn failed_create_leaves_no_blob() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    engine.repository().fail_next_commit();
    let err = engine
        .create_document("spec", &Upload::new("spec.txt", "A\n"), &user("alice"))
        .unwrap_err();
    assert_eq!(err.kind(), "storage_error");
    assert!(engine.store().is_empty());
    assert!(engine.list_documents().unwrap().is_empty());
}

#[test]
fn reverting_to_an_earlier_content_keeps_the_earlier_blob() {
    let engine = engine_with(IdenticalUploadPolicy::KeepLock);
    let id = shared_spec(&engine);
    let original = engine.get_document(id).unwrap().content;

    engine
        .upload_new_content(id, &Upload::new("spec.txt", "changed\n"), &user("bob"))
        .expect("change");
    engine.repository().fail_next_commit();
    let _ = engine.upload_new_content(id, &Upload::new("spec.txt", "A\nB\nC\n"), &user("bob"));

    // The failed revert deduplicated onto version 1's blob and must not remove it.
    assert!(engine.store().contains(&original));
    assert_eq!(engine.read_version(id, VersionId(1)).unwrap(), b"A\nB\nC\n");
}

// ---------------------------------------------------------------------------
// 4. Diff properties
// ---------------------------------------------------------------------------

#[test]
fn diff_is_deterministic() {
    let old = b"alpha\nbeta\ngamma\ndelta\n";
    let new = b"alpha\ngamma\nbeta\ndelta\nepsilon";
    assert_eq!(compute_diff(old, new).to_bytes(), compute_diff(old, new).to_bytes());
}
