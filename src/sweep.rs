//! Deferred deletion of watched files.
//!
//! The [`Sweeper`] owns every piece of mutable deletion state: the queue of
//! paths requested for removal, the refcounted set of paths currently being
//! streamed, and the session deletion counter. Files are only ever deleted
//! by a reconciliation pass, and a pass never touches a path that is still
//! in use; such paths stay queued and are retried on a later pass.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;

use crate::domain::fingerprint::Fingerprint;
use crate::storage::watched::WatchedStore;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SweepError {
    #[error("empty path")]
    EmptyPath,

    #[error("path contains a parent directory segment")]
    ParentSegment,

    #[error("absolute paths are not allowed")]
    AbsolutePath,

    #[error("path is outside the media root")]
    OutsideRoot,

    #[error("file not found")]
    NotFound,
}

fn contains_parent_segment(raw: &str) -> bool {
    raw.split(['/', '\\']).any(|segment| segment == "..")
}

/// Resolves a root-relative request path, accepting both `/` and `\` as
/// separators. Parent-directory segments and absolute paths are rejected
/// before anything touches the filesystem.
pub fn resolve_relative(root: &Path, raw: &str) -> Result<PathBuf, SweepError> {
    if contains_parent_segment(raw) {
        return Err(SweepError::ParentSegment);
    }
    if raw.starts_with('/') || raw.starts_with('\\') || Path::new(raw).is_absolute() {
        return Err(SweepError::AbsolutePath);
    }

    let mut path = root.to_path_buf();
    let mut pushed = false;
    for segment in raw.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".") {
        path.push(segment);
        pushed = true;
    }
    if !pushed {
        return Err(SweepError::EmptyPath);
    }
    Ok(path)
}

/// Like [`resolve_relative`], but an absolute path is accepted when it
/// already lies within the root. Either way the result is rebuilt as
/// `root + segments`, so equal targets compare equal as `PathBuf`s no
/// matter which form the client sent.
pub fn resolve_contained(root: &Path, raw: &str) -> Result<PathBuf, SweepError> {
    if contains_parent_segment(raw) {
        return Err(SweepError::ParentSegment);
    }

    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        let rel = candidate
            .strip_prefix(root)
            .map_err(|_| SweepError::OutsideRoot)?;
        if rel.as_os_str().is_empty() {
            return Err(SweepError::EmptyPath);
        }
        Ok(root.join(rel))
    } else {
        resolve_relative(root, raw)
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassReport {
    /// files removed from disk (and unmarked in the watched store)
    pub deleted: usize,
    /// files skipped because a stream still holds them
    pub still_in_use: usize,
    /// queue entries dropped because the file was already gone
    pub dropped_missing: usize,
    /// deletions that failed and stay queued for the next pass
    pub failed: usize,
}

enum SweepMessage {
    Pass,
    Shutdown,
}

enum DeleteOutcome {
    Deleted(Option<Fingerprint>),
    StillInUse,
    AlreadyGone,
    Failed,
}

/// Service object owning the deletion queue and the in-use registry.
///
/// Handlers share it behind an `Arc`; all internal state sits behind its
/// own mutex and no lock is held across a streaming transfer.
pub struct Sweeper {
    root: PathBuf,
    fingerprint_mtime: bool,
    store: Arc<Mutex<WatchedStore>>,
    queue: Mutex<Vec<PathBuf>>,
    in_use: Mutex<HashMap<PathBuf, u32>>,
    /// Serializes whole passes: concurrent callers wait their turn instead
    /// of racing over the same queue snapshot.
    pass_gate: Mutex<()>,
    deletions: AtomicU64,
    tx: Sender<SweepMessage>,
}

impl Sweeper {
    /// Creates the sweeper together with its worker thread, the single
    /// consumer of pass requests.
    pub fn start(
        root: PathBuf,
        fingerprint_mtime: bool,
        store: Arc<Mutex<WatchedStore>>,
    ) -> (Arc<Sweeper>, SweepWorker) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sweeper = Arc::new(Self::with_sender(root, fingerprint_mtime, store, tx));
        let worker = SweepWorker::spawn(Arc::clone(&sweeper), rx);
        (sweeper, worker)
    }

    /// Sweeper without a worker: pass requests go nowhere, passes run only
    /// when called directly.
    #[cfg(test)]
    pub(crate) fn detached(
        root: PathBuf,
        fingerprint_mtime: bool,
        store: Arc<Mutex<WatchedStore>>,
    ) -> Arc<Sweeper> {
        let (tx, _rx) = crossbeam_channel::unbounded();
        Arc::new(Self::with_sender(root, fingerprint_mtime, store, tx))
    }

    fn with_sender(
        root: PathBuf,
        fingerprint_mtime: bool,
        store: Arc<Mutex<WatchedStore>>,
        tx: Sender<SweepMessage>,
    ) -> Sweeper {
        Sweeper {
            root,
            fingerprint_mtime,
            store,
            queue: Mutex::new(Vec::new()),
            in_use: Mutex::new(HashMap::new()),
            pass_gate: Mutex::new(()),
            deletions: AtomicU64::new(0),
            tx,
        }
    }

    // ----------------------------------------------------------------
    // In-use tracking
    // ----------------------------------------------------------------

    /// Registers `path` as in-use until the returned guard is dropped.
    ///
    /// The count is per acquisition: a path streamed by two clients stays
    /// in-use until the last guard goes away.
    pub fn acquire(self: &Arc<Self>, path: PathBuf) -> InUseGuard {
        {
            let mut in_use = self.in_use.lock().unwrap();
            *in_use.entry(path.clone()).or_insert(0) += 1;
        }
        InUseGuard {
            sweeper: Arc::clone(self),
            path,
        }
    }

    pub fn is_in_use(&self, path: &Path) -> bool {
        self.in_use.lock().unwrap().contains_key(path)
    }

    fn release(&self, path: &Path) {
        let mut in_use = self.in_use.lock().unwrap();
        match in_use.get_mut(path) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                in_use.remove(path);
            }
            None => log::warn!("release of {} which was not in use", path.display()),
        }
    }

    // ----------------------------------------------------------------
    // Deletion queue
    // ----------------------------------------------------------------

    /// Validates `raw` against the media root and queues the resolved path
    /// for deletion. Re-requesting an already-queued path is a silent
    /// success; the queue never holds duplicates.
    pub fn request_deletion(&self, raw: &str) -> Result<PathBuf, SweepError> {
        let path = resolve_contained(&self.root, raw)?;
        if !path.exists() {
            return Err(SweepError::NotFound);
        }

        let mut queue = self.queue.lock().unwrap();
        if !queue.contains(&path) {
            queue.push(path.clone());
        }
        Ok(path)
    }

    /// Asks the worker for a pass. Never blocks; without a live worker the
    /// request is dropped.
    pub fn request_pass(&self) {
        let _ = self.tx.send(SweepMessage::Pass);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn deletions_total(&self) -> u64 {
        self.deletions.load(Ordering::Relaxed)
    }

    // ----------------------------------------------------------------
    // Reconciliation
    // ----------------------------------------------------------------

    /// One reconciliation pass over a snapshot of the queue.
    ///
    /// Per path: still in use means leave it queued; otherwise delete it,
    /// unmark its watched entry and dequeue it. A path that turns out to be
    /// gone already is dequeued without complaint, and any other OS error
    /// leaves the entry queued for the next pass. Passes are serialized, so
    /// calling this concurrently (worker plus shutdown, say) cannot delete
    /// anything twice.
    pub fn run_pass(&self) -> PassReport {
        let _gate = self.pass_gate.lock().unwrap();

        let snapshot: Vec<PathBuf> = self.queue.lock().unwrap().clone();
        let mut report = PassReport::default();

        for path in snapshot {
            match self.try_delete(&path) {
                DeleteOutcome::StillInUse => {
                    log::debug!("{} is still in use, keeping it queued", path.display());
                    report.still_in_use += 1;
                }
                DeleteOutcome::Deleted(fingerprint) => {
                    if let Some(fingerprint) = &fingerprint {
                        self.unmark_watched(fingerprint, &path);
                    }
                    self.unqueue(&path);
                    self.deletions.fetch_add(1, Ordering::Relaxed);
                    report.deleted += 1;
                    log::info!("deleted {}", path.display());
                }
                DeleteOutcome::AlreadyGone => {
                    log::info!("{} is already gone, dropping it from the queue", path.display());
                    self.unqueue(&path);
                    report.dropped_missing += 1;
                }
                DeleteOutcome::Failed => {
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// The in-use check and the unlink happen under the in-use lock, so a
    /// stream beginning mid-pass either registers before the check or finds
    /// the file gone; it can never lose the file mid-transfer.
    fn try_delete(&self, path: &Path) -> DeleteOutcome {
        let in_use = self.in_use.lock().unwrap();
        if in_use.contains_key(path) {
            return DeleteOutcome::StillInUse;
        }

        // Fingerprint first: after the unlink there is nothing left to stat.
        let fingerprint = match Fingerprint::from_path(path, self.fingerprint_mtime) {
            Ok(fingerprint) => Some(fingerprint),
            Err(err) if err.is_not_found() => return DeleteOutcome::AlreadyGone,
            Err(err) => {
                // Unfingerprintable files can never have a watched entry,
                // so delete without an unmark.
                log::warn!("could not fingerprint {}: {err}", path.display());
                None
            }
        };

        match std::fs::remove_file(path) {
            Ok(()) => DeleteOutcome::Deleted(fingerprint),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => DeleteOutcome::AlreadyGone,
            Err(err) => {
                log::warn!("could not delete {}, will retry: {err}", path.display());
                DeleteOutcome::Failed
            }
        }
    }

    fn unqueue(&self, path: &Path) {
        self.queue.lock().unwrap().retain(|queued| queued != path);
    }

    fn unmark_watched(&self, fingerprint: &Fingerprint, path: &Path) {
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(err) => {
                log::warn!(
                    "watched store unavailable, entry for {} stays: {err}",
                    path.display()
                );
                return;
            }
        };
        if let Err(err) = store.unmark(fingerprint) {
            log::warn!(
                "deleted {} but could not unmark {fingerprint}: {err}",
                path.display()
            );
        }
    }
}

/// Keeps a path registered as in-use for as long as it is alive.
///
/// The guard travels inside the streaming response body, so it is dropped
/// when the transfer ends, however it ends. The drop releases the
/// registration and then asks the worker for a pass, giving a file queued
/// mid-stream its chance as soon as the stream is gone.
pub struct InUseGuard {
    sweeper: Arc<Sweeper>,
    path: PathBuf,
}

impl Drop for InUseGuard {
    fn drop(&mut self) {
        self.sweeper.release(&self.path);
        self.sweeper.request_pass();
    }
}

/// The single consumer of pass requests: one dedicated thread running one
/// pass per wake-up, which keeps triggered passes naturally serialized.
pub struct SweepWorker {
    tx: Sender<SweepMessage>,
    thread: thread::JoinHandle<()>,
}

impl SweepWorker {
    fn spawn(sweeper: Arc<Sweeper>, rx: Receiver<SweepMessage>) -> Self {
        let tx = sweeper.tx.clone();
        let thread = thread::Builder::new()
            .name("sweeper".to_string())
            .spawn(move || {
                while let Ok(SweepMessage::Pass) = rx.recv() {
                    sweeper.run_pass();
                }
            })
            .expect("failed to spawn sweep worker thread");
        Self { tx, thread }
    }

    /// Stops the pass loop, then runs one final synchronous best-effort
    /// pass and logs the session's tally.
    pub fn shutdown(self, sweeper: &Sweeper) {
        let _ = self.tx.send(SweepMessage::Shutdown);
        if self.thread.join().is_err() {
            log::warn!("sweep worker panicked before shutdown");
        }

        let report = sweeper.run_pass();
        log::info!(
            "final sweep: {} deleted, {} entries left queued; {} deletions this session",
            report.deleted,
            sweeper.queue_len(),
            sweeper.deletions_total()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{Duration, Instant};

    use rusqlite::Connection;
    use tempfile::tempdir;

    use crate::storage::schema;

    fn setup_store() -> Arc<Mutex<WatchedStore>> {
        let conn = Connection::open_in_memory().unwrap();
        schema::init(&conn).unwrap();
        Arc::new(Mutex::new(WatchedStore::from_existing_conn(conn)))
    }

    fn detached_sweeper(root: &Path) -> (Arc<Sweeper>, Arc<Mutex<WatchedStore>>) {
        let store = setup_store();
        let sweeper = Sweeper::detached(root.to_path_buf(), true, Arc::clone(&store));
        (sweeper, store)
    }

    fn write_video(root: &Path, name: &str) -> PathBuf {
        let path = root.join(name);
        fs::write(&path, name.as_bytes()).unwrap();
        path
    }

    fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        check()
    }

    // --------------------------------------------------
    // Path containment
    // --------------------------------------------------

    #[test]
    fn test_resolve_relative_builds_nested_paths() {
        let root = Path::new("/media");

        assert_eq!(
            resolve_relative(root, "movie.mp4").unwrap(),
            PathBuf::from("/media/movie.mp4")
        );
        assert_eq!(
            resolve_relative(root, "season 1/episode.mp4").unwrap(),
            PathBuf::from("/media/season 1/episode.mp4")
        );
        // Backslash separators resolve the same way.
        assert_eq!(
            resolve_relative(root, r"season 1\episode.mp4").unwrap(),
            PathBuf::from("/media/season 1/episode.mp4")
        );
    }

    #[test]
    fn test_resolve_relative_rejects_escapes() {
        let root = Path::new("/media");

        assert_eq!(
            resolve_relative(root, "../etc/passwd").unwrap_err(),
            SweepError::ParentSegment
        );
        assert_eq!(
            resolve_relative(root, "sub/../../etc").unwrap_err(),
            SweepError::ParentSegment
        );
        assert_eq!(
            resolve_relative(root, r"..\..\etc").unwrap_err(),
            SweepError::ParentSegment
        );
        assert_eq!(
            resolve_relative(root, "/etc/passwd").unwrap_err(),
            SweepError::AbsolutePath
        );
        assert_eq!(resolve_relative(root, "").unwrap_err(), SweepError::EmptyPath);
        assert_eq!(resolve_relative(root, "./.").unwrap_err(), SweepError::EmptyPath);
    }

    #[test]
    fn test_resolve_contained_accepts_absolute_paths_under_root() {
        let root = Path::new("/media");

        assert_eq!(
            resolve_contained(root, "/media/sub/movie.mp4").unwrap(),
            PathBuf::from("/media/sub/movie.mp4")
        );
        assert_eq!(
            resolve_contained(root, "sub/movie.mp4").unwrap(),
            PathBuf::from("/media/sub/movie.mp4")
        );
        assert_eq!(
            resolve_contained(root, "/elsewhere/movie.mp4").unwrap_err(),
            SweepError::OutsideRoot
        );
        // Prefix matching is per component, not per character.
        assert_eq!(
            resolve_contained(root, "/media-evil/movie.mp4").unwrap_err(),
            SweepError::OutsideRoot
        );
        assert_eq!(
            resolve_contained(root, "/media").unwrap_err(),
            SweepError::EmptyPath
        );
        assert_eq!(
            resolve_contained(root, r"..\..\etc").unwrap_err(),
            SweepError::ParentSegment
        );
    }

    // --------------------------------------------------
    // Queue management
    // --------------------------------------------------

    #[test]
    fn test_request_deletion_deduplicates_the_queue() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());
        let video = write_video(tmp.path(), "movie.mp4");

        sweeper.request_deletion("movie.mp4").unwrap();
        sweeper.request_deletion("movie.mp4").unwrap();
        // The absolute form resolves to the same queue entry.
        sweeper
            .request_deletion(video.to_str().unwrap())
            .unwrap();

        assert_eq!(sweeper.queue_len(), 1);
    }

    #[test]
    fn test_request_deletion_rejects_traversal_and_leaves_queue_unchanged() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());
        write_video(tmp.path(), "movie.mp4");

        sweeper.request_deletion("movie.mp4").unwrap();
        assert_eq!(sweeper.queue_len(), 1);

        assert_eq!(
            sweeper.request_deletion(r"..\..\etc").unwrap_err(),
            SweepError::ParentSegment
        );
        assert_eq!(
            sweeper.request_deletion("../outside.mp4").unwrap_err(),
            SweepError::ParentSegment
        );
        assert_eq!(
            sweeper.request_deletion("/etc/passwd").unwrap_err(),
            SweepError::OutsideRoot
        );

        assert_eq!(sweeper.queue_len(), 1);
    }

    #[test]
    fn test_request_deletion_rejects_missing_files() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());

        assert_eq!(
            sweeper.request_deletion("nope.mp4").unwrap_err(),
            SweepError::NotFound
        );
        assert_eq!(sweeper.queue_len(), 0);
    }

    // --------------------------------------------------
    // In-use tracking
    // --------------------------------------------------

    #[test]
    fn test_in_use_is_refcounted_per_acquisition() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());
        let path = tmp.path().join("movie.mp4");

        let first = sweeper.acquire(path.clone());
        let second = sweeper.acquire(path.clone());
        assert!(sweeper.is_in_use(&path));

        drop(first);
        assert!(sweeper.is_in_use(&path), "one stream still open");

        drop(second);
        assert!(!sweeper.is_in_use(&path));
    }

    // --------------------------------------------------
    // Reconciliation passes
    // --------------------------------------------------

    #[test]
    fn test_pass_deletes_unqueues_and_unmarks() {
        let tmp = tempdir().unwrap();
        let (sweeper, store) = detached_sweeper(tmp.path());

        let video = write_video(tmp.path(), "movie.mp4");
        let fingerprint = Fingerprint::from_path(&video, true).unwrap();
        store.lock().unwrap().mark_watched(&fingerprint).unwrap();

        sweeper.request_deletion("movie.mp4").unwrap();
        let report = sweeper.run_pass();

        assert_eq!(report.deleted, 1);
        assert!(!video.exists());
        assert_eq!(sweeper.queue_len(), 0);
        assert_eq!(sweeper.deletions_total(), 1);
        assert!(!store.lock().unwrap().is_watched(&fingerprint).unwrap());
    }

    #[test]
    fn test_pass_leaves_in_use_file_queued_and_marked() {
        let tmp = tempdir().unwrap();
        let (sweeper, store) = detached_sweeper(tmp.path());

        let a = write_video(tmp.path(), "a.mp4");
        let b = write_video(tmp.path(), "b.mp4");
        let fp_a = Fingerprint::from_path(&a, true).unwrap();
        let fp_b = Fingerprint::from_path(&b, true).unwrap();
        {
            let store = store.lock().unwrap();
            store.mark_watched(&fp_a).unwrap();
            store.mark_watched(&fp_b).unwrap();
        }

        sweeper.request_deletion("a.mp4").unwrap();
        sweeper.request_deletion("b.mp4").unwrap();

        let guard = sweeper.acquire(a.clone());
        let report = sweeper.run_pass();

        // Only b went away; a is untouched on every axis.
        assert_eq!(report.deleted, 1);
        assert_eq!(report.still_in_use, 1);
        assert!(a.exists());
        assert!(!b.exists());
        assert_eq!(sweeper.queue_len(), 1);
        {
            let store = store.lock().unwrap();
            assert!(store.is_watched(&fp_a).unwrap());
            assert!(!store.is_watched(&fp_b).unwrap());
        }

        // Once the stream ends, the next pass may take a.
        drop(guard);
        let report = sweeper.run_pass();
        assert_eq!(report.deleted, 1);
        assert!(!a.exists());
        assert_eq!(sweeper.queue_len(), 0);
    }

    #[test]
    fn test_pass_drops_entries_whose_file_vanished() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());

        let video = write_video(tmp.path(), "movie.mp4");
        sweeper.request_deletion("movie.mp4").unwrap();
        fs::remove_file(&video).unwrap();

        let report = sweeper.run_pass();

        assert_eq!(report.dropped_missing, 1);
        assert_eq!(report.deleted, 0);
        assert_eq!(sweeper.queue_len(), 0);
        assert_eq!(sweeper.deletions_total(), 0);
    }

    #[test]
    fn test_pass_keeps_failed_deletions_queued_for_retry() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());

        // A directory refuses remove_file with an error other than
        // NotFound, standing in for any transient OS refusal.
        fs::create_dir(tmp.path().join("boxset")).unwrap();
        sweeper.request_deletion("boxset").unwrap();

        let report = sweeper.run_pass();

        assert_eq!(report.failed, 1);
        assert_eq!(report.deleted, 0);
        assert!(tmp.path().join("boxset").exists());
        assert_eq!(sweeper.queue_len(), 1, "failed entries stay queued");
        assert_eq!(sweeper.deletions_total(), 0);

        // The next pass retries, sees the same refusal and keeps waiting.
        let report = sweeper.run_pass();
        assert_eq!(report.failed, 1);
        assert_eq!(sweeper.queue_len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_pass_deletes_unfingerprintable_files_without_unmark() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());

        let name = OsStr::from_bytes(b"bro\xffken.mp4");
        let video = tmp.path().join(name);
        fs::write(&video, b"x").unwrap();

        // Queue it directly: the raw name cannot travel through a &str.
        sweeper.queue.lock().unwrap().push(video.clone());

        let report = sweeper.run_pass();

        assert_eq!(report.deleted, 1);
        assert!(!video.exists());
        assert_eq!(sweeper.queue_len(), 0);
    }

    #[test]
    fn test_concurrent_passes_delete_exactly_once() {
        let tmp = tempdir().unwrap();
        let (sweeper, _store) = detached_sweeper(tmp.path());

        let video = write_video(tmp.path(), "movie.mp4");
        sweeper.request_deletion("movie.mp4").unwrap();

        thread::scope(|scope| {
            scope.spawn(|| sweeper.run_pass());
            scope.spawn(|| sweeper.run_pass());
        });

        assert!(!video.exists());
        assert_eq!(sweeper.deletions_total(), 1);
        assert_eq!(sweeper.queue_len(), 0);
    }

    // --------------------------------------------------
    // Worker integration
    // --------------------------------------------------

    #[test]
    fn test_worker_runs_requested_passes() {
        let tmp = tempdir().unwrap();
        let store = setup_store();
        let (sweeper, worker) = Sweeper::start(tmp.path().to_path_buf(), true, store);

        let video = write_video(tmp.path(), "movie.mp4");
        sweeper.request_deletion("movie.mp4").unwrap();
        sweeper.request_pass();

        assert!(
            wait_until(Duration::from_secs(5), || !video.exists()),
            "worker never deleted the queued file"
        );

        worker.shutdown(&sweeper);
        assert_eq!(sweeper.deletions_total(), 1);
    }

    #[test]
    fn test_dropping_a_guard_triggers_a_pass() {
        let tmp = tempdir().unwrap();
        let store = setup_store();
        let (sweeper, worker) = Sweeper::start(tmp.path().to_path_buf(), true, store);

        let video = write_video(tmp.path(), "movie.mp4");
        sweeper.request_deletion("movie.mp4").unwrap();

        let guard = sweeper.acquire(video.clone());
        assert_eq!(sweeper.run_pass().still_in_use, 1);
        assert!(video.exists());

        // End of stream: the guard's drop wakes the worker, which may now
        // take the file.
        drop(guard);
        assert!(
            wait_until(Duration::from_secs(5), || !video.exists()),
            "stream completion never triggered the deletion"
        );

        worker.shutdown(&sweeper);
    }

    #[test]
    fn test_shutdown_runs_a_final_pass() {
        let tmp = tempdir().unwrap();
        let store = setup_store();
        let (sweeper, worker) = Sweeper::start(tmp.path().to_path_buf(), true, store);

        let video = write_video(tmp.path(), "movie.mp4");
        sweeper.request_deletion("movie.mp4").unwrap();

        // No trigger before shutdown; the final synchronous pass takes it.
        worker.shutdown(&sweeper);

        assert!(!video.exists());
        assert_eq!(sweeper.deletions_total(), 1);
    }
}
