use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use courier_core::{ErrorKind, ItemError, LocalFs};
use courier_scan::{CountProgress, DeepCounter, ScanObserver};

#[derive(Default)]
struct Recorder {
    errors: Vec<ItemError>,
    progress: Vec<CountProgress>,
}

impl ScanObserver for Recorder {
    fn should_stop(&mut self) -> bool {
        false
    }

    fn on_progress(&mut self, progress: &CountProgress) {
        self.progress.push(progress.clone());
    }

    fn on_error(&mut self, error: ItemError) {
        self.errors.push(error);
    }
}

fn counter() -> DeepCounter {
    DeepCounter::new(Arc::new(LocalFs::new()))
}

#[test]
fn test_empty_directory_counts_nothing() {
    let dir = tempfile::tempdir().unwrap();

    let mut recorder = Recorder::default();
    let result = counter()
        .count(&[dir.path().to_path_buf()], &mut recorder)
        .unwrap();

    assert_eq!(result.item_count(), 0);
    assert_eq!(result.total_size, 0);
    assert!(recorder.errors.is_empty());
}

#[test]
fn test_file_root_counts_as_one() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("big.bin");
    fs::write(&file, vec![7u8; 2048]).unwrap();

    let mut recorder = Recorder::default();
    let result = counter().count(&[file], &mut recorder).unwrap();

    assert_eq!(result.files, 1);
    assert_eq!(result.total_size, 2048);
    assert_eq!(result.largest_file, 2048);
}

#[test]
fn test_multiple_roots_are_summed() {
    let a = tempfile::tempdir().unwrap();
    let b = tempfile::tempdir().unwrap();
    fs::write(a.path().join("one"), b"12345").unwrap();
    fs::create_dir(b.path().join("nested")).unwrap();
    fs::write(b.path().join("nested/two"), b"123").unwrap();

    let mut recorder = Recorder::default();
    let result = counter()
        .count(
            &[a.path().to_path_buf(), b.path().to_path_buf()],
            &mut recorder,
        )
        .unwrap();

    assert_eq!(result.files, 2);
    assert_eq!(result.directories, 1);
    assert_eq!(result.total_size, 8);
    assert!(!recorder.progress.is_empty());

    let last = recorder.progress.last().unwrap();
    assert_eq!(last.files_scanned, 2);
    assert_eq!(last.bytes_scanned, 8);
}

#[test]
fn test_expand_builds_tree() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("photos/2024")).unwrap();
    fs::write(dir.path().join("photos/2024/a.jpg"), vec![0u8; 40]).unwrap();
    fs::write(dir.path().join("photos/b.jpg"), vec![0u8; 60]).unwrap();

    let mut recorder = Recorder::default();
    let (tree, result) = counter()
        .expand(&dir.path().join("photos"), &mut recorder)
        .unwrap();
    let tree = tree.unwrap();

    assert!(tree.is_dir());
    assert_eq!(tree.name, "photos");
    assert_eq!(tree.children.len(), 2);
    assert_eq!(tree.children[0].name, "2024");
    assert_eq!(tree.children[0].children[0].name, "a.jpg");
    assert_eq!(tree.total_size(), 100);
    assert_eq!(tree.leaf_count(), 2);
    assert_eq!(result.leaf_count(), 2);
}

#[test]
fn test_expand_missing_root() {
    let mut recorder = Recorder::default();
    let (tree, result) = counter()
        .expand(&PathBuf::from("/definitely/not/here"), &mut recorder)
        .unwrap();

    assert!(tree.is_none());
    assert_eq!(result.unreadable, 1);
    assert_eq!(recorder.errors[0].kind, ErrorKind::NotFound);
}

#[cfg(unix)]
#[test]
fn test_dangling_symlink_reported_when_following() {
    let dir = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("link")).unwrap();

    let mut recorder = Recorder::default();
    let result = counter()
        .follow_symlinks(true)
        .count(&[dir.path().to_path_buf()], &mut recorder)
        .unwrap();

    assert_eq!(result.item_count(), 0);
    assert_eq!(recorder.errors.len(), 1);
    assert!(recorder.errors[0].message.contains("Broken symlink"));

    let mut recorder = Recorder::default();
    let result = counter()
        .count(&[dir.path().to_path_buf()], &mut recorder)
        .unwrap();
    assert_eq!(result.symlinks, 1);
    assert!(recorder.errors.is_empty());
}
