use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use courier_core::{
    Entry, ErrorKind, FilesystemPort, FsError, JobConfig, LocalFs, Metadata, TrashBackend,
    TrashRecord,
};
use courier_ops::{
    EntryState, Engine, Job, JobError, JobEvent, JobState, JobSummary, Question, QuestionKind,
    Response, ThumbnailCache,
};

/// Local filesystem with deterministic, one-shot faults.
#[derive(Default)]
struct FaultyFs {
    inner: LocalFs,
    chunks: AtomicUsize,
    /// Fail the n-th `copy_chunk` call (1-based) with `NoSpace`.
    no_space_at: Mutex<Option<usize>>,
    /// Every rename reports a filesystem boundary.
    cross_device: bool,
    /// Paths whose next read is denied.
    denied: Mutex<Vec<PathBuf>>,
    /// After the n-th chunk, signal and wait for release.
    gate: Mutex<Option<(usize, Sender<()>, Receiver<()>)>>,
    /// Reported free space; unlimited when unset.
    free: Option<u64>,
}

impl FaultyFs {
    fn new() -> Self {
        Self::default()
    }

    fn cross_device() -> Self {
        Self {
            cross_device: true,
            ..Self::default()
        }
    }

    fn no_space_at(self, chunk: usize) -> Self {
        *self.no_space_at.lock().unwrap() = Some(chunk);
        self
    }

    fn with_free_space(mut self, bytes: u64) -> Self {
        self.free = Some(bytes);
        self
    }

    fn deny_once(self, path: impl Into<PathBuf>) -> Self {
        self.denied.lock().unwrap().push(path.into());
        self
    }

    /// Returns (reached, release).
    fn gate_after(&self, chunk: usize) -> (Receiver<()>, Sender<()>) {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some((chunk, reached_tx, release_rx));
        (reached_rx, release_tx)
    }
}

impl FilesystemPort for FaultyFs {
    fn stat(&self, path: &Path, follow_symlinks: bool) -> Result<Metadata, FsError> {
        self.inner.stat(path, follow_symlinks)
    }

    fn list(&self, dir: &Path) -> Result<Vec<Entry>, FsError> {
        self.inner.list(dir)
    }

    fn copy_chunk(&self, src: &Path, dst: &Path, offset: u64, len: u64) -> Result<u64, FsError> {
        let mut denied = self.denied.lock().unwrap();
        if let Some(pos) = denied.iter().position(|p| p == src) {
            denied.remove(pos);
            return Err(FsError::PermissionDenied {
                path: src.to_path_buf(),
            });
        }
        drop(denied);

        let call = self.chunks.fetch_add(1, Ordering::SeqCst) + 1;
        let mut no_space = self.no_space_at.lock().unwrap();
        if *no_space == Some(call) {
            *no_space = None;
            return Err(FsError::NoSpace {
                path: dst.to_path_buf(),
            });
        }
        drop(no_space);

        let written = self.inner.copy_chunk(src, dst, offset, len)?;

        let gate = self.gate.lock().unwrap().take();
        match gate {
            Some((at, reached, release)) if at == call => {
                reached.send(()).unwrap();
                release.recv().unwrap();
            }
            Some(gate) => *self.gate.lock().unwrap() = Some(gate),
            None => {}
        }
        Ok(written)
    }

    fn create_dir(&self, path: &Path) -> Result<(), FsError> {
        self.inner.create_dir(path)
    }

    fn rename(&self, src: &Path, dst: &Path) -> Result<(), FsError> {
        if self.cross_device {
            return Err(FsError::CrossDevice {
                path: src.to_path_buf(),
            });
        }
        self.inner.rename(src, dst)
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<(), FsError> {
        self.inner.symlink(target, link)
    }

    fn read_link(&self, path: &Path) -> Result<PathBuf, FsError> {
        self.inner.read_link(path)
    }

    fn trash(&self, path: &Path) -> Result<TrashRecord, FsError> {
        self.inner.trash(path)
    }

    fn delete(&self, path: &Path) -> Result<(), FsError> {
        self.inner.delete(path)
    }

    fn free_space(&self, _dir: &Path) -> Result<u64, FsError> {
        Ok(self.free.unwrap_or(u64::MAX))
    }
}

fn engine(fs: impl FilesystemPort + 'static) -> Engine {
    let config = JobConfig::builder()
        .chunk_size(1024u64)
        .liveness_interval(Duration::from_millis(20))
        .build()
        .unwrap();
    Engine::new(Arc::new(fs)).with_config(config)
}

fn local() -> Engine {
    engine(LocalFs::new().with_trash(TrashBackend::Disabled))
}

/// Run `job` to completion, answering every question with `answer`.
fn drive(job: &Job, mut answer: impl FnMut(&Question) -> Response) -> (Vec<JobEvent>, JobSummary) {
    let events = job.events().unwrap();
    job.start().unwrap();

    let mut seen = Vec::new();
    for event in events {
        if let JobEvent::Question(question) = &event {
            job.respond(answer(question)).unwrap();
        }
        seen.push(event);
    }

    let summary = job.wait().unwrap();
    assert!(job.state().is_terminal());
    if summary.state == JobState::Finished {
        assert!(summary.entries.iter().all(|e| e.state.is_terminal()));
    }
    (seen, summary)
}

fn no_questions(question: &Question) -> Response {
    panic!("unexpected question: {}", question.message)
}

fn questions(events: &[JobEvent]) -> Vec<&Question> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Question(q) => Some(q),
            _ => None,
        })
        .collect()
}

fn write(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn test_copy_tree() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write(&src.join("a.txt"), b"alpha");
    write(&src.join("nested/b.bin"), &pattern(5000));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = local().copy(vec![src.clone()], &dst).unwrap();
    let (events, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    assert!(summary.is_success());
    assert_eq!(summary.items_done, 2);
    assert_eq!(summary.bytes_done, 5005);
    assert_eq!(summary.new_files, vec![dst.join("src")]);
    assert_eq!(fs::read(dst.join("src/nested/b.bin")).unwrap(), pattern(5000));
    assert!(src.join("a.txt").exists());
    assert!(events.last().unwrap().is_finished());
}

#[test]
fn test_move_with_one_conflict_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    for name in ["a.txt", "b.txt", "c.txt"] {
        write(&src.join(name), name.as_bytes());
    }
    write(&dst.join("b.txt"), b"keep me");

    let sources = ["a.txt", "b.txt", "c.txt"].map(|n| src.join(n)).to_vec();
    let job = local().move_to(sources, &dst).unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::Replace);
        Response::Skip
    });

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 2);
    assert_eq!(summary.items_skipped, 1);
    assert_eq!(summary.entries[1].state, EntryState::Skipped);
    assert!(!src.join("a.txt").exists());
    assert!(src.join("b.txt").exists());
    assert_eq!(fs::read(dst.join("b.txt")).unwrap(), b"keep me");
    assert_eq!(fs::read(dst.join("c.txt")).unwrap(), b"c.txt");
}

#[test]
fn test_move_tree_merges_and_skips_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src/tree");
    write(&src.join("a.bin"), &pattern(4000));
    write(&src.join("b.bin"), &pattern(3000));
    write(&src.join("c.bin"), &pattern(3240));
    let dst = dir.path().join("dst");
    write(&dst.join("tree/b.bin"), b"old");

    let job = local().move_to(vec![src.clone()], &dst).unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::Replace);
        assert_eq!(q.destination.as_deref(), Some(dst.join("tree/b.bin").as_path()));
        Response::Skip
    });

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 2);
    assert_eq!(summary.items_skipped, 1);
    assert_eq!(summary.bytes_total, 10240);
    assert_eq!(summary.bytes_done, 7240);
    assert_eq!(summary.entries[0].state, EntryState::Done);
    assert!(summary.new_files.is_empty());

    assert!(src.join("b.bin").exists());
    assert!(!src.join("a.bin").exists());
    assert_eq!(fs::read(dst.join("tree/a.bin")).unwrap(), pattern(4000));
    assert_eq!(fs::read(dst.join("tree/b.bin")).unwrap(), b"old");
    assert_eq!(fs::read(dst.join("tree/c.bin")).unwrap(), pattern(3240));
}

#[test]
fn test_replace_all_is_asked_once() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    let names = ["1.txt", "2.txt", "3.txt"];
    for name in names {
        write(&src.join(name), b"new");
        write(&dst.join(name), b"old");
    }

    let job = local()
        .copy(names.map(|n| src.join(n)).to_vec(), &dst)
        .unwrap();
    let (events, summary) = drive(&job, |_| Response::ReplaceAll);

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.items_done, 3);
    for name in names {
        assert_eq!(fs::read(dst.join(name)).unwrap(), b"new");
    }
    assert_eq!(fs::read_dir(&dst).unwrap().count(), 3);
}

#[test]
fn test_replace_folder_with_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src/item");
    write(&src, b"file");
    let dst = dir.path().join("dst");
    write(&dst.join("item/nested/old.txt"), b"old");

    let job = local().copy(vec![src], &dst).unwrap();
    let (_, summary) = drive(&job, |_| Response::Replace);

    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(fs::read(dst.join("item")).unwrap(), b"file");
    assert_eq!(fs::read_dir(&dst).unwrap().count(), 1);
}

#[test]
fn test_cancelled_replace_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src/a.bin");
    write(&src, &pattern(64 * 1024));
    let dst = dir.path().join("dst");
    write(&dst.join("a.bin"), b"old");

    let faulty = FaultyFs::new();
    let (reached, release) = faulty.gate_after(2);
    let job = engine(faulty).copy(vec![src.clone()], &dst).unwrap();
    let mut events = job.events().unwrap();
    job.start().unwrap();

    loop {
        match events.next() {
            Some(JobEvent::Question(q)) => {
                assert_eq!(q.kind, QuestionKind::Replace);
                job.respond(Response::Replace).unwrap();
                break;
            }
            Some(_) => continue,
            None => panic!("job ended without asking"),
        }
    }
    reached.recv().unwrap();
    assert_eq!(fs::read_dir(&dst).unwrap().count(), 2);
    job.cancel();
    release.send(()).unwrap();

    let summary = job.wait().unwrap();
    assert_eq!(summary.state, JobState::Cancelled);
    assert_eq!(fs::read(dst.join("a.bin")).unwrap(), b"old");
    assert_eq!(fs::read_dir(&dst).unwrap().count(), 1);
    assert!(src.exists());
}

#[test]
fn test_rename_keeps_both() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src/report.pdf");
    let dst = dir.path().join("dst");
    write(&src, b"fresh");
    write(&dst.join("report.pdf"), b"stale");

    let job = local().copy(vec![src], &dst).unwrap();
    let (_, summary) = drive(&job, |_| Response::Rename);

    assert_eq!(summary.new_files, vec![dst.join("report (1).pdf")]);
    assert_eq!(fs::read(dst.join("report.pdf")).unwrap(), b"stale");
    assert_eq!(fs::read(dst.join("report (1).pdf")).unwrap(), b"fresh");
}

#[test]
fn test_pinned_answer_before_start() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let dst = dir.path().join("dst");
    for name in ["a", "b"] {
        write(&src.join(name), b"new");
        write(&dst.join(name), b"old");
    }

    let job = local()
        .copy(vec![src.join("a"), src.join("b")], &dst)
        .unwrap();
    job.pin_answer(QuestionKind::Replace, Response::SkipAll).unwrap();
    let (events, summary) = drive(&job, no_questions);

    assert!(questions(&events).is_empty());
    assert_eq!(summary.items_skipped, 2);
    assert_eq!(fs::read(dst.join("a")).unwrap(), b"old");
}

#[test]
fn test_pin_answer_rejects_single_answers() {
    let job = local().delete(vec![PathBuf::from("/nonexistent")]).unwrap();
    assert!(matches!(
        job.pin_answer(QuestionKind::Replace, Response::Skip),
        Err(JobError::InvalidResponse { .. })
    ));
    assert!(matches!(
        job.pin_answer(QuestionKind::NoSpace, Response::Force),
        Err(JobError::InvalidResponse { .. })
    ));
}

#[test]
fn test_trash_file_drops_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("photos/big.jpg");
    write(&file, &pattern(1024 * 1024));
    let trash = dir.path().join("trash");

    let cache = Arc::new(ThumbnailCache::in_memory());
    cache.put(&file, b"preview".to_vec());

    let engine = engine(LocalFs::new().with_trash(TrashBackend::Directory(trash.clone())))
        .with_thumbnails(Arc::clone(&cache));
    let job = engine.trash(vec![file.clone()]).unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 1);
    assert!(!file.exists());
    assert_eq!(summary.trashed.len(), 1);
    assert_eq!(summary.trashed[0].original_path, file);
    let location = summary.trashed[0].location.clone().unwrap();
    assert_eq!(fs::read(location).unwrap().len(), 1024 * 1024);
    assert!(!cache.contains(&file));
}

#[test]
fn test_trash_unavailable_offers_delete() {
    let dir = tempfile::tempdir().unwrap();
    let keep = dir.path().join("keep.txt");
    let gone = dir.path().join("gone.txt");
    write(&keep, b"k");
    write(&gone, b"g");

    let job = local().trash(vec![keep.clone(), gone.clone()]).unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::Delete);
        if q.source.as_deref() == Some(keep.as_path()) {
            Response::No
        } else {
            Response::Yes
        }
    });

    assert_eq!(questions(&events).len(), 2);
    assert_eq!(summary.items_done, 1);
    assert_eq!(summary.items_skipped, 1);
    assert!(keep.exists());
    assert!(!gone.exists());
}

#[test]
fn test_deep_count_empty_dir() {
    let dir = tempfile::tempdir().unwrap();

    let job = local().deep_count(vec![dir.path().to_path_buf()]).unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    let count = summary.count.unwrap();
    assert_eq!(count.item_count(), 0);
    assert_eq!(count.total_size, 0);
    assert_eq!(summary.entries[0].state, EntryState::Done);
}

#[test]
fn test_deep_count_tree() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("a"), &[0; 100]);
    write(&dir.path().join("sub/b"), &[0; 50]);
    write(&dir.path().join("sub/deeper/c"), &[0; 25]);

    let job = local().deep_count(vec![dir.path().to_path_buf()]).unwrap();
    let (_, summary) = drive(&job, no_questions);

    let count = summary.count.unwrap();
    assert_eq!(count.files, 3);
    assert_eq!(count.directories, 2);
    assert_eq!(count.total_size, 175);
    assert_eq!(summary.bytes_done, 175);
}

#[test]
fn test_delete_tree_and_thumbnails() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("album");
    write(&root.join("1.jpg"), b"one");
    write(&root.join("nested/2.jpg"), b"two");
    let outside = dir.path().join("other.jpg");
    write(&outside, b"x");

    let cache = Arc::new(ThumbnailCache::in_memory());
    cache.put(&root.join("1.jpg"), vec![1]);
    cache.put(&root.join("nested/2.jpg"), vec![2]);
    cache.put(&outside, vec![3]);

    let job = local()
        .with_thumbnails(Arc::clone(&cache))
        .delete(vec![root.clone()])
        .unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 2);
    assert!(!root.exists());
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(&outside));
}

#[test]
fn test_cancel_mid_file_leaves_no_partial() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.bin");
    write(&src, &pattern(64 * 1024));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let faulty = FaultyFs::new();
    let (reached, release) = faulty.gate_after(3);
    let job = engine(faulty).copy(vec![src.clone()], &dst).unwrap();
    let events = job.events().unwrap();
    job.start().unwrap();

    reached.recv().unwrap();
    assert!(dst.join("big.bin").exists());
    job.cancel();
    release.send(()).unwrap();

    let finished = events.last().unwrap();
    let JobEvent::Finished(summary) = finished else {
        panic!("last event was not Finished");
    };
    assert_eq!(summary.state, JobState::Cancelled);
    assert_eq!(job.state(), JobState::Cancelled);
    assert!(!dst.join("big.bin").exists());
    assert!(src.exists());
}

#[test]
fn test_cancel_while_asking() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("src/a"), b"new");
    write(&dir.path().join("dst/a"), b"old");

    let job = local()
        .copy(vec![dir.path().join("src/a")], dir.path().join("dst"))
        .unwrap();
    let mut events = job.events().unwrap();
    job.start().unwrap();

    loop {
        match events.next() {
            Some(JobEvent::Question(_)) => break,
            Some(_) => continue,
            None => panic!("job ended without asking"),
        }
    }
    assert!(job.pending_question().is_some());
    job.cancel();

    let summary = job.wait().unwrap();
    assert_eq!(summary.state, JobState::Cancelled);
    assert!(job.pending_question().is_none());
    assert_eq!(fs::read(dir.path().join("dst/a")).unwrap(), b"old");
}

#[test]
fn test_no_space_is_fatal_and_retry_is_identical() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data.bin");
    let data = pattern(10 * 1024);
    write(&src, &data);
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = engine(FaultyFs::new().no_space_at(4))
        .copy(vec![src.clone()], &dst)
        .unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Failed);
    assert_eq!(summary.errors.last().unwrap().kind, ErrorKind::NoSpace);
    assert!(summary.errors.last().unwrap().fatal);
    assert!(!dst.join("data.bin").exists());

    let job = local().copy(vec![src], &dst).unwrap();
    let (_, summary) = drive(&job, no_questions);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(fs::read(dst.join("data.bin")).unwrap(), data);
}

#[test]
fn test_read_error_retry() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("locked.txt");
    write(&src, b"contents");
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = engine(FaultyFs::new().deny_once(src.clone()))
        .copy(vec![src], &dst)
        .unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::Skip);
        assert!(q.accepts(Response::Retry));
        Response::Retry
    });

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 1);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].kind, ErrorKind::PermissionDenied);
    assert_eq!(fs::read(dst.join("locked.txt")).unwrap(), b"contents");
}

#[test]
fn test_read_error_skip_continues() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("src/bad.txt");
    let good = dir.path().join("src/good.txt");
    write(&bad, b"bad");
    write(&good, b"good");
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = engine(FaultyFs::new().deny_once(bad.clone()))
        .copy(vec![bad, good], &dst)
        .unwrap();
    let (events, summary) = drive(&job, |_| Response::Skip);

    assert!(events.iter().any(|e| matches!(e, JobEvent::Error(_))));
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 1);
    assert_eq!(summary.items_failed, 1);
    assert!(!dst.join("bad.txt").exists());
    assert!(dst.join("good.txt").exists());
}

#[test]
fn test_low_space_force_continues() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data.bin");
    write(&src, &pattern(5000));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = engine(FaultyFs::new().with_free_space(100))
        .copy(vec![src], &dst)
        .unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::NoSpace);
        Response::Force
    });

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(fs::read(dst.join("data.bin")).unwrap(), pattern(5000));
}

#[test]
fn test_low_space_cancel() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("data.bin");
    write(&src, &pattern(5000));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = engine(FaultyFs::new().with_free_space(100))
        .copy(vec![src.clone()], &dst)
        .unwrap();
    let (_, summary) = drive(&job, |_| Response::Cancel);

    assert_eq!(summary.state, JobState::Cancelled);
    assert_eq!(summary.items_done, 0);
    assert!(!dst.join("data.bin").exists());
    assert!(src.exists());
}

#[test]
fn test_destination_gone_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.bin");
    write(&src, &pattern(64 * 1024));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let faulty = FaultyFs::new();
    let (reached, release) = faulty.gate_after(1);
    let job = engine(faulty).copy(vec![src.clone()], &dst).unwrap();
    let _events = job.events().unwrap();
    job.start().unwrap();

    reached.recv().unwrap();
    fs::remove_dir_all(&dst).unwrap();
    release.send(()).unwrap();

    let summary = job.wait().unwrap();
    assert_eq!(summary.state, JobState::Failed);
    let last = summary.errors.last().unwrap();
    assert_eq!(last.kind, ErrorKind::VolumeGone);
    assert!(last.fatal);
    assert!(src.exists());
}

#[cfg(unix)]
#[test]
fn test_special_file_is_not_copied() {
    use nix::sys::stat::Mode;

    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write(&src.join("data.txt"), b"data");
    nix::unistd::mkfifo(&src.join("pipe"), Mode::S_IRWXU).unwrap();
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = local().copy(vec![src.clone()], &dst).unwrap();
    let (events, summary) = drive(&job, no_questions);

    assert!(events.last().unwrap().is_finished());
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].kind, ErrorKind::Unsupported);
    assert_eq!(summary.errors[0].path, src.join("pipe"));
    assert_eq!(summary.items_done, 1);
    assert_eq!(summary.items_failed, 1);
    assert_eq!(summary.entries[0].state, EntryState::Failed);
    assert_eq!(fs::read(dst.join("src/data.txt")).unwrap(), b"data");
    assert!(!dst.join("src/pipe").exists());
}

#[test]
fn test_cross_device_move_copies_then_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write(&src.join("doc.txt"), b"document");
    write(&src.join("inner/img.png"), &pattern(3000));
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let cache = Arc::new(ThumbnailCache::in_memory());
    cache.put(&src.join("inner/img.png"), vec![9]);

    let job = engine(FaultyFs::cross_device())
        .with_thumbnails(Arc::clone(&cache))
        .move_to(vec![src.clone()], &dst)
        .unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.items_done, 2);
    assert!(!src.exists());
    assert_eq!(fs::read(dst.join("src/inner/img.png")).unwrap(), pattern(3000));
    assert!(cache.contains(&dst.join("src/inner/img.png")));
    assert!(!cache.contains(&src.join("inner/img.png")));
}

#[test]
fn test_missing_destination_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    write(&src, b"a");
    let dst = dir.path().join("new/deeper");

    let job = local().copy(vec![src], &dst).unwrap();
    let (events, summary) = drive(&job, |q| {
        assert_eq!(q.kind, QuestionKind::Create);
        assert_eq!(q.destination.as_deref(), Some(dst.as_path()));
        Response::Yes
    });

    assert_eq!(questions(&events).len(), 1);
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(fs::read(dst.join("a.txt")).unwrap(), b"a");
}

#[test]
fn test_declined_destination_cancels() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    write(&src, b"a");
    let dst = dir.path().join("missing");

    let job = local().copy(vec![src.clone()], &dst).unwrap();
    let (_, summary) = drive(&job, |_| Response::No);

    assert_eq!(summary.state, JobState::Cancelled);
    assert!(!dst.exists());
    assert!(src.exists());
}

#[test]
fn test_copy_folder_into_itself_fails_entry() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("folder");
    write(&src.join("f.txt"), b"f");

    let job = local().copy(vec![src.clone()], &src).unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.entries[0].state, EntryState::Failed);
    assert_eq!(summary.items_failed, 1);
    assert!(!src.join("folder").exists());
}

#[test]
fn test_move_onto_itself_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("same.txt");
    write(&file, b"same");

    let job = local().move_to(vec![file.clone()], dir.path()).unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.items_skipped, 1);
    assert_eq!(fs::read(&file).unwrap(), b"same");
}

#[cfg(unix)]
#[test]
fn test_link_entries() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("target.txt");
    write(&target, b"t");
    let links = dir.path().join("links");
    fs::create_dir(&links).unwrap();

    let job = local().link(vec![target.clone()], &links).unwrap();
    let (_, summary) = drive(&job, no_questions);

    assert_eq!(summary.items_done, 1);
    assert_eq!(fs::read_link(links.join("target.txt")).unwrap(), target);
}

#[test]
fn test_progress_is_monotonic() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    for i in 0..20 {
        write(&src.join(format!("{i}.bin")), &pattern(2048 + i));
    }
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = local().copy(vec![src], &dst).unwrap();
    let (events, summary) = drive(&job, no_questions);

    let mut last_items = 0;
    let mut last_bytes = 0;
    for event in &events {
        if let JobEvent::Progress(progress) = event {
            assert!(progress.items_done >= last_items);
            assert!(progress.bytes_done >= last_bytes);
            assert!(progress.items_processed() <= progress.items_total);
            assert!(progress.bytes_done <= progress.bytes_total);
            last_items = progress.items_done;
            last_bytes = progress.bytes_done;
        }
    }
    assert_eq!(summary.items_done, 20);
    assert_eq!(last_items, 20);
}

#[test]
fn test_pause_and_resume() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    write(&src, b"paused");
    let dst = dir.path().join("dst");
    fs::create_dir(&dst).unwrap();

    let job = local().copy(vec![src], &dst).unwrap();
    job.pause();
    job.start().unwrap();
    thread::sleep(Duration::from_millis(100));

    assert!(job.is_paused());
    assert_eq!(job.state(), JobState::Running);
    assert_eq!(job.snapshot().items_done, 0);
    assert!(!dst.join("a.txt").exists());

    job.resume();
    let summary = job.wait().unwrap();
    assert_eq!(summary.state, JobState::Finished);
    assert!(dst.join("a.txt").exists());
}

#[test]
fn test_cancel_while_paused() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("a.txt");
    write(&src, b"a");

    let job = local().copy(vec![src], dir.path().join("dst")).unwrap();
    job.pause();
    job.start().unwrap();
    job.cancel();

    assert_eq!(job.wait().unwrap().state, JobState::Cancelled);
}

#[test]
fn test_unanswered_question_times_out() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("src/a"), b"new");
    write(&dir.path().join("dst/a"), b"old");

    let config = JobConfig::builder()
        .ask_timeout(Some(Duration::from_millis(100)))
        .liveness_interval(Duration::from_millis(20))
        .build()
        .unwrap();
    let job = Engine::new(Arc::new(LocalFs::new()))
        .with_config(config)
        .copy(vec![dir.path().join("src/a")], dir.path().join("dst"))
        .unwrap();
    let _events = job.events().unwrap();
    job.start().unwrap();

    let summary = job.wait().unwrap();
    assert_eq!(summary.state, JobState::Cancelled);
    assert_eq!(fs::read(dir.path().join("dst/a")).unwrap(), b"old");
}

#[test]
fn test_dropped_controller_cancels_question() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("src/a"), b"new");
    write(&dir.path().join("dst/a"), b"old");

    let job = local()
        .copy(vec![dir.path().join("src/a")], dir.path().join("dst"))
        .unwrap();
    drop(job.events().unwrap());
    job.start().unwrap();

    assert_eq!(job.wait().unwrap().state, JobState::Cancelled);
}

#[test]
fn test_handle_misuse() {
    let dir = tempfile::tempdir().unwrap();
    let job = local().deep_count(vec![dir.path().to_path_buf()]).unwrap();

    assert!(matches!(job.respond(Response::Yes), Err(JobError::NoPendingQuestion)));
    let _events = job.events().unwrap();
    assert!(matches!(job.events(), Err(JobError::EventsTaken)));

    job.start().unwrap();
    assert!(matches!(job.start(), Err(JobError::AlreadyStarted)));
    job.wait().unwrap();
    assert!(matches!(job.respond(Response::Yes), Err(JobError::NoPendingQuestion)));
    job.cancel();
    assert!(!job.is_cancelled());
    assert_eq!(job.state(), JobState::Finished);
}

#[test]
fn test_empty_and_duplicate_work_lists() {
    let engine = local();
    assert!(matches!(engine.delete(Vec::new()), Err(JobError::EmptyWorkList)));
    assert!(matches!(
        engine.deep_count(vec![PathBuf::from("/a"), PathBuf::from("/a")]),
        Err(JobError::DuplicateEntry { .. })
    ));
}

#[tokio::test]
async fn test_events_from_async_controller() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir.path().join("x"), b"xyz");

    let job = local().deep_count(vec![dir.path().to_path_buf()]).unwrap();
    let mut events = job.events().unwrap();
    job.start().unwrap();

    let mut finished = None;
    while let Some(event) = events.recv().await {
        if let JobEvent::Finished(summary) = event {
            finished = Some(summary);
        }
    }

    let summary = finished.unwrap();
    assert_eq!(summary.state, JobState::Finished);
    assert_eq!(summary.count.unwrap().files, 1);
    assert!(events.recv().await.is_none());
}
