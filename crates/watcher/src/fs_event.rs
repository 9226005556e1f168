//! High-level event types delivered to handlers.
//!
//! Maps raw inotify masks onto a small set of change kinds.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use witness_decoder::EventMask;

bitflags! {
    /// Kind(s) of change reported for a path.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FsEventType: u8 {
        /// Entry was created.
        const CREATED = 1;
        /// Entry was deleted.
        const DELETED = 1 << 1;
        /// Entry contents were modified.
        const MODIFIED = 1 << 2;
        /// Entry was moved out of its directory.
        const MOVED_FROM = 1 << 3;
        /// Entry was moved into its directory.
        const MOVED_TO = 1 << 4;
        /// Entry now holds new content (created, modified or moved in).
        const UPDATED = 1 << 5;
    }
}

impl FsEventType {
    /// Classify a raw inotify mask.
    #[must_use]
    pub fn from_mask(mask: EventMask) -> Self {
        let mut kind = Self::empty();
        if mask.contains(EventMask::IN_CREATE) {
            kind |= Self::CREATED | Self::UPDATED;
        }
        if mask.contains(EventMask::IN_DELETE) {
            kind |= Self::DELETED;
        }
        if mask.contains(EventMask::IN_MODIFY) {
            kind |= Self::MODIFIED | Self::UPDATED;
        }
        if mask.contains(EventMask::IN_MOVED_TO) {
            kind |= Self::MOVED_TO | Self::UPDATED;
        }
        if mask.contains(EventMask::IN_MOVED_FROM) {
            kind |= Self::MOVED_FROM;
        }
        kind
    }

    /// inotify mask to subscribe with for these kinds.
    #[must_use]
    pub fn to_mask(self) -> EventMask {
        let mut mask = EventMask::empty();
        if self.contains(Self::CREATED) {
            mask |= EventMask::IN_CREATE;
        }
        if self.contains(Self::MODIFIED) {
            mask |= EventMask::IN_MODIFY;
        }
        if self.contains(Self::DELETED) {
            mask |= EventMask::IN_DELETE;
        }
        if self.contains(Self::MOVED_TO) {
            mask |= EventMask::IN_MOVED_TO;
        }
        if self.contains(Self::MOVED_FROM) {
            mask |= EventMask::IN_MOVED_FROM;
        }
        if self.contains(Self::UPDATED) {
            mask |= EventMask::IN_MOVED_TO | EventMask::IN_MODIFY | EventMask::IN_CREATE;
        }
        mask
    }
}

/// Named event kind, as written in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Create,
    Delete,
    Modify,
    MovedFrom,
    MovedTo,
    Update,
}

impl EventKind {
    #[must_use]
    pub fn event_type(self) -> FsEventType {
        match self {
            Self::Create => FsEventType::CREATED,
            Self::Delete => FsEventType::DELETED,
            Self::Modify => FsEventType::MODIFIED,
            Self::MovedFrom => FsEventType::MOVED_FROM,
            Self::MovedTo => FsEventType::MOVED_TO,
            Self::Update => FsEventType::UPDATED,
        }
    }

    /// Union of the given kinds; an empty list means every kind.
    #[must_use]
    pub fn union(kinds: &[Self]) -> FsEventType {
        if kinds.is_empty() {
            return FsEventType::all();
        }
        kinds
            .iter()
            .fold(FsEventType::empty(), |acc, kind| acc | kind.event_type())
    }
}

bitflags! {
    /// Which subjects events are delivered for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WatchOptions: u8 {
        /// Events whose subject is a regular file (or anything not a directory).
        const FILE = 1;
        /// Events whose subject is a directory.
        const DIRECTORY = 1 << 1;
    }
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self::all()
    }
}

/// How far below a root directory watches are added.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recursion {
    /// Only the root itself.
    None,
    /// The root plus this many levels of sub-directories.
    WithDepth(u32),
    /// Every sub-directory, including ones created later.
    #[default]
    Unlimited,
}

impl Recursion {
    /// Recursion to apply to a sub-directory, or `None` if it should not be
    /// watched.
    #[must_use]
    pub fn descend(self) -> Option<Self> {
        match self {
            Self::None | Self::WithDepth(0) => None,
            Self::WithDepth(depth) => Some(Self::WithDepth(depth - 1)),
            Self::Unlimited => Some(Self::Unlimited),
        }
    }
}

/// A change to one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSystemEvent {
    /// Watched directory joined with the entry name.
    pub path: PathBuf,
    /// What happened.
    pub kind: FsEventType,
}

/// `<kinds> <path>`, kinds joined as `CREATED | UPDATED`.
impl fmt::Display for FileSystemEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = self.kind.iter_names();
        match names.next() {
            Some((first, _)) => f.write_str(first)?,
            None => f.write_str("NONE")?,
        }
        for (name, _) in names {
            write!(f, " | {name}")?;
        }
        write!(f, " {}", self.path.display())
    }
}
