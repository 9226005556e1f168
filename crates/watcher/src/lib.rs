//! Witness - Directory watching on top of Linux inotify.
//!
//! This crate provides:
//! - [`Witness`], a facade that watches directory trees and hands batches of
//!   [`FileSystemEvent`]s to a callback
//! - [`EventStream`] and [`WatchTable`], the read loop and the watch
//!   bookkeeping underneath it
//! - [`FsEventType`], the classification of raw inotify masks
//!
//! Raw read buffers are decoded by [`witness_decoder`].

pub mod config;
mod fs_event;
mod inotify;
mod stream;
mod witness;

pub use fs_event::{EventKind, FileSystemEvent, FsEventType, Recursion, WatchOptions};
pub use inotify::{Inotify, WatchBackend};
pub use stream::{EventStream, MIN_BUFFER_SIZE, WatchEntry, WatchError, WatchTable, buffer_size};
pub use witness::{DEFAULT_BUFFER_EVENTS, Witness};

/// Watch descriptor (matches inotify wd type)
pub type WatchDescriptor = i32;
