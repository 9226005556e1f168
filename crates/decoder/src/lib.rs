//! Witness Decoder - Bounds-checked decoding of Linux inotify read buffers.
//!
//! This crate provides:
//! - [`decode`], a lazy iterator over the packed records of one `read(2)`
//! - [`DecodedEvent`], an owned copy of one record
//! - [`DecodeError`] describing the first malformed record and its offset
//! - [`RawEventHeader`] and [`EventMask`] matching the kernel's binary format
//!
//! # Record Format
//!
//! Each record is a 16-byte header (`wd`, `mask`, `cookie`, `len`, native
//! endianness) followed by `len` bytes holding a null-terminated name and
//! padding. Records are packed back to back.
//!
//! # Example
//!
//! ```rust
//! use witness_decoder::{EventMask, decode, encode_event};
//!
//! let mut buf = encode_event(1, EventMask::IN_CREATE.bits(), 0, b"a.txt");
//! buf.extend(encode_event(1, EventMask::IN_IGNORED.bits(), 0, b""));
//!
//! let mut events = decode(&buf, buf.len());
//! let created = events.next().unwrap().unwrap();
//! assert_eq!(created.name, b"a.txt");
//! assert!(created.event_mask().contains(EventMask::IN_CREATE));
//!
//! let ignored = events.next().unwrap().unwrap();
//! assert!(ignored.name.is_empty());
//! assert!(events.next().is_none());
//! assert_eq!(events.consumed(), buf.len());
//! ```

mod decoder;
mod event;

// Re-export main types at crate root
pub use decoder::{DecodeError, DecodedEvent, Events, decode, decode_all};
pub use event::{
    EventMask, HEADER_SIZE, NAME_ALIGN, RawEventHeader, encode_event, padded_name_len,
    record_stride,
};
