//! Watch table and the inotify read loop.
//!
//! This module manages:
//! - The mapping from watch descriptor to watched directory
//! - Recursive registration of sub-directories, including ones created later
//! - Turning each read buffer into filtered [`FileSystemEvent`]s

use crate::WatchDescriptor;
use crate::fs_event::{FileSystemEvent, FsEventType, Recursion, WatchOptions};
use crate::inotify::{Inotify, WatchBackend};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::io::unix::AsyncFd;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use witness_decoder::{DecodedEvent, EventMask, HEADER_SIZE, decode};

/// Error type for watch operations.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The kernel refused to watch a path.
    #[error("failed to watch {}: {source}", .path.display())]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// IO error on the inotify descriptor.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Information about a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEntry {
    /// Watched directory
    pub path: PathBuf,
    /// Mask requested by the caller (without the implied move flags)
    pub mask: EventMask,
    /// Recursion still available below this directory
    pub recursion: Recursion,
}

/// Watch descriptors and the directories they stand for.
#[derive(Debug, Default)]
pub struct WatchTable {
    entries: RwLock<HashMap<WatchDescriptor, WatchEntry>>,
    options: WatchOptions,
}

impl WatchTable {
    /// Create an empty table delivering events for `options` subjects.
    pub fn new(options: WatchOptions) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Watch `path`, then its sub-directories as far as `recursion` allows.
    ///
    /// Moves are always subscribed to, whatever `mask` asks for. Failing to
    /// watch `path` itself is an error; failures below it are logged.
    pub fn add(
        &self,
        backend: &impl WatchBackend,
        path: &Path,
        mask: EventMask,
        recursion: Recursion,
    ) -> Result<WatchDescriptor, WatchError> {
        let wd = backend
            .add_watch(path, mask | EventMask::IN_MOVED_TO | EventMask::IN_MOVED_FROM)
            .map_err(|source| WatchError::AddWatch {
                path: path.to_path_buf(),
                source,
            })?;

        self.entries.write().insert(
            wd,
            WatchEntry {
                path: path.to_path_buf(),
                mask,
                recursion,
            },
        );
        tracing::debug!(wd, path = %path.display(), ?recursion, "Added watch");

        if let Some(child_recursion) = recursion.descend() {
            self.add_subdirectories(backend, path, mask, child_recursion);
        }

        Ok(wd)
    }

    fn add_subdirectories(
        &self,
        backend: &impl WatchBackend,
        path: &Path,
        mask: EventMask,
        recursion: Recursion,
    ) {
        let entries = match std::fs::read_dir(path) {
            Ok(entries) => entries,
            Err(e) => {
                // Plain files are watchable but have no children.
                tracing::trace!(path = %path.display(), error = %e, "Not descending");
                return;
            }
        };

        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_dir()) {
                continue;
            }
            let child = entry.path();
            if let Err(e) = self.add(backend, &child, mask, recursion) {
                tracing::warn!(path = %child.display(), error = %e, "Failed to watch subdirectory");
            }
        }
    }

    /// Remove a watch. Unknown descriptors are ignored.
    pub fn remove(&self, backend: &impl WatchBackend, wd: WatchDescriptor) -> Result<(), WatchError> {
        if self.forget(wd).is_none() {
            return Ok(());
        }
        backend.rm_watch(wd)?;
        Ok(())
    }

    /// Drop the entry for a watch the kernel already removed.
    pub fn forget(&self, wd: WatchDescriptor) -> Option<WatchEntry> {
        let entry = self.entries.write().remove(&wd);
        if let Some(entry) = &entry {
            tracing::debug!(wd, path = %entry.path.display(), "Removed watch");
        }
        entry
    }

    fn forget_path(&self, path: &Path) {
        self.entries.write().retain(|_, entry| entry.path != path);
    }

    /// Currently watched directories.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.read().values().map(|e| e.path.clone()).collect()
    }

    /// Entry registered for `wd`, if any.
    pub fn get(&self, wd: WatchDescriptor) -> Option<WatchEntry> {
        self.entries.read().get(&wd).cloned()
    }

    /// Every registered watch descriptor.
    pub fn descriptors(&self) -> Vec<WatchDescriptor> {
        self.entries.read().keys().copied().collect()
    }

    /// Decode one read buffer and turn it into events for the handler.
    ///
    /// A malformed record ends processing of this buffer; events before it
    /// are still returned.
    pub fn process(
        &self,
        backend: &impl WatchBackend,
        buf: &[u8],
        len: usize,
    ) -> Vec<FileSystemEvent> {
        let mut events = Vec::new();

        for record in decode(buf, len) {
            match record {
                Ok(record) => events.extend(self.handle_record(backend, &record)),
                Err(e) => {
                    tracing::warn!(
                        offset = e.offset(),
                        len,
                        error = %e,
                        "Dropping malformed inotify records"
                    );
                    break;
                }
            }
        }

        events
    }

    fn handle_record(
        &self,
        backend: &impl WatchBackend,
        record: &DecodedEvent,
    ) -> Option<FileSystemEvent> {
        let mask = record.event_mask();

        if !record.has_name() {
            if mask.contains(EventMask::IN_Q_OVERFLOW) {
                tracing::warn!("inotify queue overflowed, events were lost");
            }
            if mask.contains(EventMask::IN_IGNORED) {
                self.forget(record.wd);
            }
            return None;
        }

        let Some(entry) = self.get(record.wd) else {
            tracing::trace!(wd = record.wd, "No watch found for descriptor");
            return None;
        };

        let kind = FsEventType::from_mask(mask);
        let path = entry.path.join(record.name_os());
        let is_dir = record.is_dir();

        if is_dir
            && kind.contains(FsEventType::CREATED)
            && let Some(recursion) = entry.recursion.descend()
            && let Err(e) = self.add(backend, &path, entry.mask, recursion)
        {
            tracing::warn!(path = %path.display(), error = %e, "Failed to watch new directory");
        }

        if is_dir && kind.contains(FsEventType::DELETED) {
            self.forget_path(&path);
        }

        if is_dir && !self.options.contains(WatchOptions::DIRECTORY) {
            tracing::trace!(path = %path.display(), "Ignoring directory event");
            return None;
        }
        if !is_dir && !self.options.contains(WatchOptions::FILE) {
            tracing::trace!(path = %path.display(), "Ignoring file event");
            return None;
        }
        if kind.is_empty() || !entry.mask.intersects(mask) {
            return None;
        }

        tracing::debug!(path = %path.display(), ?kind, cookie = record.cookie, "Event");
        Some(FileSystemEvent { path, kind })
    }
}

/// Longest file name Linux allows (`NAME_MAX`).
const NAME_MAX: usize = 255;

/// Smallest read buffer that can hold any single record.
///
/// `read(2)` on an inotify descriptor fails with `EINVAL` when the next
/// record does not fit.
pub const MIN_BUFFER_SIZE: usize = HEADER_SIZE + NAME_MAX + 1;

/// Read buffer size for `buffer_events` records with short names, never less
/// than [`MIN_BUFFER_SIZE`].
#[must_use]
pub const fn buffer_size(buffer_events: usize) -> usize {
    let size = buffer_events.saturating_mul(HEADER_SIZE + 16);
    if size < MIN_BUFFER_SIZE {
        MIN_BUFFER_SIZE
    } else {
        size
    }
}

/// An inotify instance, its watch table, and the loop that reads from it.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct EventStream {
    inotify: AsyncFd<Inotify>,
    table: WatchTable,
    listening: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    buffer_size: usize,
}

impl EventStream {
    /// Create an inotify instance with a read buffer sized for
    /// `buffer_events` records.
    pub fn new(options: WatchOptions, buffer_events: usize) -> Result<Self, WatchError> {
        let inotify = AsyncFd::new(Inotify::init()?)?;
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            inotify,
            table: WatchTable::new(options),
            listening: AtomicBool::new(false),
            shutdown_tx,
            buffer_size: buffer_size(buffer_events),
        })
    }

    /// Watch `path` and its sub-directories as far as `recursion` allows.
    pub fn add(
        &self,
        path: &Path,
        mask: EventMask,
        recursion: Recursion,
    ) -> Result<WatchDescriptor, WatchError> {
        self.table.add(self.inotify.get_ref(), path, mask, recursion)
    }

    /// Remove a watch. Unknown descriptors are ignored.
    pub fn remove(&self, wd: WatchDescriptor) -> Result<(), WatchError> {
        self.table.remove(self.inotify.get_ref(), wd)
    }

    /// Currently watched directories.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.table.paths()
    }

    /// Bytes allocated for each read.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Whether the read loop is running.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Wait for the next read and process it.
    pub async fn read_events(&self, buf: &mut [u8]) -> io::Result<Vec<FileSystemEvent>> {
        loop {
            let mut guard = self.inotify.readable().await?;
            match guard.try_io(|inner| inner.get_ref().read(buf)) {
                Ok(result) => {
                    let len = result?;
                    return Ok(self.table.process(self.inotify.get_ref(), buf, len));
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Spawn the read loop, handing every non-empty batch to `handler`.
    pub fn start<F>(self: &Arc<Self>, handler: F) -> JoinHandle<()>
    where
        F: FnMut(Vec<FileSystemEvent>) + Send + 'static,
    {
        self.listening.store(true, Ordering::SeqCst);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let stream = Arc::clone(self);
        tokio::spawn(async move { stream.run(handler, shutdown_rx).await })
    }

    /// Stop the read loop after the batch in progress.
    pub fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
    }

    async fn run<F>(&self, mut handler: F, mut shutdown_rx: broadcast::Receiver<()>)
    where
        F: FnMut(Vec<FileSystemEvent>),
    {
        tracing::info!(buffer_size = self.buffer_size, "Event stream started");
        let mut buf = vec![0u8; self.buffer_size];

        while self.is_listening() {
            let events = tokio::select! {
                result = self.read_events(&mut buf) => match result {
                    Ok(events) => events,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to read inotify events");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => break,
            };

            if !events.is_empty() {
                handler(events);
            }
        }

        self.listening.store(false, Ordering::SeqCst);
        tracing::info!("Event stream stopped");
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        for wd in self.table.descriptors() {
            let _ = self.table.remove(self.inotify.get_ref(), wd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicI32;
    use witness_decoder::encode_event;

    #[derive(Default)]
    struct FakeBackend {
        next_wd: AtomicI32,
        added: Mutex<Vec<(PathBuf, EventMask)>>,
        removed: Mutex<Vec<WatchDescriptor>>,
    }

    impl WatchBackend for FakeBackend {
        fn add_watch(&self, path: &Path, mask: EventMask) -> io::Result<WatchDescriptor> {
            self.added.lock().push((path.to_path_buf(), mask));
            Ok(self.next_wd.fetch_add(1, Ordering::Relaxed) + 1)
        }

        fn rm_watch(&self, wd: WatchDescriptor) -> io::Result<()> {
            self.removed.lock().push(wd);
            Ok(())
        }
    }

    fn table_with_root(recursion: Recursion, mask: EventMask) -> (WatchTable, FakeBackend) {
        let table = WatchTable::new(WatchOptions::all());
        let backend = FakeBackend::default();
        // Non-existent root, so nothing is descended into up front.
        let wd = table
            .add(&backend, Path::new("/watched"), mask, recursion)
            .unwrap();
        assert_eq!(wd, 1);
        (table, backend)
    }

    fn process(table: &WatchTable, backend: &FakeBackend, buf: &[u8]) -> Vec<FileSystemEvent> {
        table.process(backend, buf, buf.len())
    }

    #[test]
    fn test_add_subscribes_to_moves() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_CREATE);
        let added = backend.added.lock();
        assert_eq!(
            added[0].1,
            EventMask::IN_CREATE | EventMask::IN_MOVED_FROM | EventMask::IN_MOVED_TO
        );
        assert_eq!(table.get(1).unwrap().mask, EventMask::IN_CREATE);
    }

    #[test]
    fn test_named_event_becomes_path() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let buf = encode_event(1, EventMask::IN_CREATE.bits(), 0, b"a.txt");

        let events = process(&table, &backend, &buf);
        assert_eq!(
            events,
            vec![FileSystemEvent {
                path: PathBuf::from("/watched/a.txt"),
                kind: FsEventType::CREATED | FsEventType::UPDATED,
            }]
        );
    }

    #[test]
    fn test_unknown_descriptor_skipped() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let buf = encode_event(99, EventMask::IN_CREATE.bits(), 0, b"a.txt");
        assert!(process(&table, &backend, &buf).is_empty());
    }

    #[test]
    fn test_created_directory_is_watched() {
        let (table, backend) = table_with_root(Recursion::Unlimited, EventMask::IN_ALL_EVENTS);
        let mask = EventMask::IN_CREATE | EventMask::IN_ISDIR;
        let buf = encode_event(1, mask.bits(), 0, b"sub");

        let events = process(&table, &backend, &buf);
        assert_eq!(events.len(), 1);
        assert_eq!(backend.added.lock()[1].0, PathBuf::from("/watched/sub"));
        assert_eq!(table.get(2).unwrap().recursion, Recursion::Unlimited);
    }

    #[test]
    fn test_created_directory_beyond_depth_not_watched() {
        let (table, backend) = table_with_root(Recursion::WithDepth(0), EventMask::IN_ALL_EVENTS);
        let mask = EventMask::IN_CREATE | EventMask::IN_ISDIR;
        let buf = encode_event(1, mask.bits(), 0, b"sub");

        assert_eq!(process(&table, &backend, &buf).len(), 1);
        assert_eq!(backend.added.lock().len(), 1);
    }

    #[test]
    fn test_deleted_directory_forgotten() {
        let (table, backend) = table_with_root(Recursion::Unlimited, EventMask::IN_ALL_EVENTS);
        let created = EventMask::IN_CREATE | EventMask::IN_ISDIR;
        process(&table, &backend, &encode_event(1, created.bits(), 0, b"sub"));
        assert!(table.get(2).is_some());

        let deleted = EventMask::IN_DELETE | EventMask::IN_ISDIR;
        process(&table, &backend, &encode_event(1, deleted.bits(), 0, b"sub"));
        assert!(table.get(2).is_none());
        assert!(table.get(1).is_some());
    }

    #[test]
    fn test_directory_events_filtered_by_options() {
        let table = WatchTable::new(WatchOptions::FILE);
        let backend = FakeBackend::default();
        table
            .add(&backend, Path::new("/watched"), EventMask::IN_ALL_EVENTS, Recursion::None)
            .unwrap();

        let mut buf = encode_event(1, (EventMask::IN_CREATE | EventMask::IN_ISDIR).bits(), 0, b"d");
        buf.extend(encode_event(1, EventMask::IN_CREATE.bits(), 0, b"f"));

        let events = process(&table, &backend, &buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, PathBuf::from("/watched/f"));
    }

    #[test]
    fn test_unrequested_moves_filtered() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_CREATE);
        let buf = encode_event(1, EventMask::IN_MOVED_TO.bits(), 7, b"moved");
        assert!(process(&table, &backend, &buf).is_empty());
    }

    #[test]
    fn test_unclassified_event_dropped() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let buf = encode_event(1, EventMask::IN_ATTRIB.bits(), 0, b"a.txt");
        assert!(process(&table, &backend, &buf).is_empty());
    }

    #[test]
    fn test_ignored_forgets_descriptor() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let buf = encode_event(1, EventMask::IN_IGNORED.bits(), 0, b"");

        assert!(process(&table, &backend, &buf).is_empty());
        assert!(table.paths().is_empty());
        // The kernel already dropped it; no rm_watch is issued.
        assert!(backend.removed.lock().is_empty());
    }

    #[test]
    fn test_malformed_tail_keeps_earlier_events() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let mut buf = encode_event(1, EventMask::IN_DELETE.bits(), 0, b"a.txt");
        buf.extend_from_slice(&[0u8; 5]);

        let events = process(&table, &backend, &buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FsEventType::DELETED);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        table.remove(&backend, 42).unwrap();
        assert!(backend.removed.lock().is_empty());

        table.remove(&backend, 1).unwrap();
        assert_eq!(*backend.removed.lock(), vec![1]);
        assert!(table.paths().is_empty());
    }

    #[test]
    fn test_recursive_add_walks_existing_tree() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        std::fs::write(dir.path().join("a/file.txt"), b"x").unwrap();

        let table = WatchTable::new(WatchOptions::all());
        let backend = FakeBackend::default();
        table
            .add(&backend, dir.path(), EventMask::IN_CREATE, Recursion::Unlimited)
            .unwrap();
        assert_eq!(table.paths().len(), 4);

        let table = WatchTable::new(WatchOptions::all());
        table
            .add(&backend, dir.path(), EventMask::IN_CREATE, Recursion::WithDepth(1))
            .unwrap();
        let mut paths = table.paths();
        paths.sort();
        assert_eq!(paths, vec![dir.path().to_path_buf(), dir.path().join("a")]);
    }

    #[test]
    fn test_queue_overflow_yields_nothing() {
        let (table, backend) = table_with_root(Recursion::None, EventMask::IN_ALL_EVENTS);
        let buf = encode_event(-1, EventMask::IN_Q_OVERFLOW.bits(), 0, b"");

        assert!(process(&table, &backend, &buf).is_empty());
        assert_eq!(table.paths(), vec![PathBuf::from("/watched")]);
        assert_eq!(backend.added.lock().len(), 1);
        assert!(backend.removed.lock().is_empty());
    }

    #[test]
    fn test_buffer_size() {
        assert_eq!(buffer_size(1024), 1024 * 32);
        assert_eq!(MIN_BUFFER_SIZE, 272);
        assert_eq!(buffer_size(0), MIN_BUFFER_SIZE);
        assert_eq!(buffer_size(1), MIN_BUFFER_SIZE);
        assert_eq!(buffer_size(usize::MAX), usize::MAX);
    }

    #[tokio::test]
    async fn test_small_buffer_survives_long_names() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(EventStream::new(WatchOptions::all(), 1).unwrap());
        assert_eq!(stream.buffer_size(), MIN_BUFFER_SIZE);
        stream
            .add(dir.path(), EventMask::IN_CREATE, Recursion::None)
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = stream.start(move |events| {
            let _ = tx.send(events);
        });

        let long_name = "n".repeat(NAME_MAX);
        std::fs::write(dir.path().join("a-rather-long-file-name.txt"), b"x").unwrap();
        std::fs::write(dir.path().join(&long_name), b"x").unwrap();

        let mut seen = Vec::new();
        while seen.len() < 2 {
            let events = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.extend(events.into_iter().map(|e| e.path));
        }
        assert_eq!(seen[0], dir.path().join("a-rather-long-file-name.txt"));
        assert_eq!(seen[1], dir.path().join(&long_name));
        assert!(stream.is_listening());

        stream.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_remove_watch() {
        let dir = tempfile::tempdir().unwrap();
        let stream = EventStream::new(WatchOptions::all(), 16).unwrap();
        let wd = stream
            .add(dir.path(), EventMask::IN_CREATE, Recursion::None)
            .unwrap();
        assert_eq!(stream.paths(), vec![dir.path().to_path_buf()]);

        stream.remove(wd).unwrap();
        assert!(stream.paths().is_empty());
        assert!(!stream.is_listening());
    }

    #[tokio::test]
    async fn test_stream_delivers_events() {
        let dir = tempfile::tempdir().unwrap();
        let stream = Arc::new(EventStream::new(WatchOptions::all(), 64).unwrap());
        stream
            .add(dir.path(), EventMask::IN_CREATE, Recursion::None)
            .unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = stream.start(move |events| {
            let _ = tx.send(events);
        });

        std::fs::write(dir.path().join("new.txt"), b"x").unwrap();

        let events = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(events[0].path, dir.path().join("new.txt"));
        assert!(events[0].kind.contains(FsEventType::CREATED));

        stream.stop();
        handle.await.unwrap();
        assert!(!stream.is_listening());
    }
}
