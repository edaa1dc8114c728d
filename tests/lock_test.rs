use outreach_engine::lock;

#[test]
fn lock_records_holder_pid() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("outreach-state.json");

    let guard = lock::acquire(&state_path).unwrap();
    assert_eq!(guard.path(), dir.path().join("outreach-state.json.lock"));

    let contents = std::fs::read_to_string(guard.path()).unwrap();
    assert_eq!(
        contents.trim().parse::<u32>().unwrap(),
        std::process::id()
    );
}

#[test]
fn lock_creates_state_directory() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("nested").join("state.json");

    let guard = lock::acquire(&state_path).unwrap();
    assert!(dir.path().join("nested").is_dir());
    assert!(!state_path.exists());
    drop(guard);
}

#[test]
fn second_holder_is_refused_with_pid() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("outreach-state.json");

    let _guard = lock::acquire(&state_path).unwrap();

    let err = lock::acquire(&state_path).unwrap_err();
    assert!(err.contains("Another outreach process"), "{}", err);
    assert!(err.contains(&std::process::id().to_string()), "{}", err);
    assert!(err.contains("outreach-state.json"), "{}", err);
}

#[test]
fn lock_is_reusable_after_drop() {
    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("outreach-state.json");

    drop(lock::acquire(&state_path).unwrap());
    let again = lock::acquire(&state_path);
    assert!(again.is_ok(), "{:?}", again.err());
}

#[test]
fn different_state_files_lock_independently() {
    let dir = tempfile::tempdir().unwrap();

    let _a = lock::acquire(&dir.path().join("a.json")).unwrap();
    let b = lock::acquire(&dir.path().join("b.json"));
    assert!(b.is_ok(), "{:?}", b.err());
}
