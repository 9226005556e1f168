//! Convenience facade: watch a set of paths and call a handler.

use crate::WatchDescriptor;
use crate::fs_event::{FileSystemEvent, FsEventType, Recursion, WatchOptions};
use crate::stream::{EventStream, WatchError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use witness_decoder::EventMask;

/// Default number of records one read has room for.
pub const DEFAULT_BUFFER_EVENTS: usize = 1024;

/// A running watch over one or more directory trees.
///
/// Stops its read loop when dropped.
#[derive(Debug)]
pub struct Witness {
    stream: Arc<EventStream>,
    mask: EventMask,
    task: JoinHandle<()>,
}

impl Witness {
    /// Watch `paths` for `event_types` and start delivering batches to
    /// `handler`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new<F>(
        paths: &[PathBuf],
        event_types: FsEventType,
        recursion: Recursion,
        options: WatchOptions,
        handler: F,
    ) -> Result<Self, WatchError>
    where
        F: FnMut(Vec<FileSystemEvent>) + Send + 'static,
    {
        Self::with_buffer_events(
            paths,
            event_types,
            recursion,
            options,
            DEFAULT_BUFFER_EVENTS,
            handler,
        )
    }

    /// Like [`Witness::new`], sizing the read buffer for `buffer_events`
    /// records.
    pub fn with_buffer_events<F>(
        paths: &[PathBuf],
        event_types: FsEventType,
        recursion: Recursion,
        options: WatchOptions,
        buffer_events: usize,
        handler: F,
    ) -> Result<Self, WatchError>
    where
        F: FnMut(Vec<FileSystemEvent>) + Send + 'static,
    {
        let stream = Arc::new(EventStream::new(options, buffer_events)?);
        let mask = event_types.to_mask();

        for path in paths {
            stream.add(path, mask, recursion)?;
        }

        tracing::info!(
            paths = paths.len(),
            buffer_size = stream.buffer_size(),
            ?event_types,
            "Watching"
        );

        let task = stream.start(handler);
        Ok(Self { stream, mask, task })
    }

    /// Add another root with its own recursion.
    pub fn add_path(
        &self,
        path: &Path,
        recursion: Recursion,
    ) -> Result<WatchDescriptor, WatchError> {
        self.stream.add(path, self.mask, recursion)
    }

    /// Every directory currently watched, roots and sub-directories.
    pub fn paths(&self) -> Vec<PathBuf> {
        self.stream.paths()
    }

    pub fn is_running(&self) -> bool {
        self.stream.is_listening() && !self.task.is_finished()
    }

    pub fn stop(&self) {
        self.stream.stop();
    }
}

impl Drop for Witness {
    fn drop(&mut self) {
        self.stream.stop();
    }
}
