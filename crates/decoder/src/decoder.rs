//! Walking a buffer of packed inotify records.
//!
//! A single `read(2)` on an inotify descriptor returns any number of records
//! laid end to end. Each one is a [`HEADER_SIZE`]-byte header followed by the
//! `len` bytes of name field it declares, so the only way to find record
//! *n + 1* is to decode record *n*. [`Events`] does that lazily, one record
//! per call to `next`, and stops for good on the first malformed record.

use crate::event::{EventMask, HEADER_SIZE, RawEventHeader, encode_event};
use std::borrow::Cow;
use std::iter::FusedIterator;
use thiserror::Error;

/// A malformed record found while decoding.
///
/// Every variant carries the byte offset at which the failing record starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Fewer than [`HEADER_SIZE`] bytes remain at the cursor.
    #[error(
        "truncated header at offset {offset}: {remaining} bytes remain, need {header}",
        header = HEADER_SIZE
    )]
    TruncatedHeader { offset: usize, remaining: usize },

    /// The header declares a name field running past the end of valid data.
    #[error(
        "truncated name at offset {offset}: header declares {name_len} name bytes, \
         {remaining} bytes remain after the header"
    )]
    TruncatedName {
        offset: usize,
        name_len: u32,
        remaining: usize,
    },

    /// The name field holds no null terminator.
    #[error("unterminated name at offset {offset}: no null byte in {name_len}-byte name field")]
    UnterminatedName { offset: usize, name_len: u32 },
}

impl DecodeError {
    /// Offset of the record that failed to decode.
    #[must_use]
    pub const fn offset(&self) -> usize {
        match *self {
            Self::TruncatedHeader { offset, .. }
            | Self::TruncatedName { offset, .. }
            | Self::UnterminatedName { offset, .. } => offset,
        }
    }
}

/// One decoded notification.
///
/// The name is copied out of the source buffer, so events remain valid after
/// the buffer is reused for the next read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodedEvent {
    /// Watch descriptor the event belongs to.
    pub wd: i32,
    /// Raw event mask. Test against [`EventMask`] constants.
    pub mask: u32,
    /// Rename correlation cookie, 0 when unused.
    pub cookie: u32,
    /// Entry name relative to the watched directory, empty when the event
    /// concerns the watch itself.
    pub name: Vec<u8>,
}

impl DecodedEvent {
    /// Get the event mask as an `EventMask` bitflags value.
    #[must_use]
    pub fn event_mask(&self) -> EventMask {
        EventMask::from_bits_truncate(self.mask)
    }

    /// Whether the subject of the event is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.event_mask().contains(EventMask::IN_ISDIR)
    }

    /// Whether the record carried a name.
    #[must_use]
    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    /// Name as text, replacing invalid UTF-8.
    #[must_use]
    pub fn name_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }

    /// Name as an OS string, preserving non-UTF-8 bytes.
    #[cfg(unix)]
    #[must_use]
    pub fn name_os(&self) -> &std::ffi::OsStr {
        use std::os::unix::ffi::OsStrExt;
        std::ffi::OsStr::from_bytes(&self.name)
    }

    /// Encode this event back into the kernel's record layout.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_event(self.wd, self.mask, self.cookie, &self.name)
    }
}

/// Lazy iterator over the records of one read buffer.
///
/// Yields `Ok` for each well-formed record and at most one `Err`, after which
/// it is exhausted.
#[derive(Debug)]
pub struct Events<'a> {
    buf: &'a [u8],
    cursor: usize,
    failed: bool,
}

/// Decode the first `len` bytes of `buf` as packed inotify records.
///
/// `len` is the valid length reported by `read(2)`. It must not exceed
/// `buf.len()`; a larger value is clamped so the decoder never reads outside
/// `buf`.
#[must_use]
pub fn decode(buf: &[u8], len: usize) -> Events<'_> {
    debug_assert!(
        len <= buf.len(),
        "valid length {len} exceeds buffer size {}",
        buf.len()
    );
    Events {
        buf: &buf[..len.min(buf.len())],
        cursor: 0,
        failed: false,
    }
}

/// Decode every record in `buf`, stopping at the first malformed one.
pub fn decode_all(buf: &[u8]) -> Result<Vec<DecodedEvent>, DecodeError> {
    decode(buf, buf.len()).collect()
}

impl Events<'_> {
    /// Bytes consumed so far: the offset of the next record to decode.
    ///
    /// Once the iterator is exhausted without error this equals the valid
    /// length. After an error it is the offset of the failing record.
    #[must_use]
    pub fn consumed(&self) -> usize {
        self.cursor
    }

    /// Valid bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }

    fn decode_record(&self) -> Result<(DecodedEvent, usize), DecodeError> {
        let offset = self.cursor;
        let rest = &self.buf[offset..];

        let header = RawEventHeader::from_bytes(rest).ok_or(DecodeError::TruncatedHeader {
            offset,
            remaining: rest.len(),
        })?;

        let stride = (header.len as usize).checked_add(HEADER_SIZE);
        let window = stride
            .and_then(|end| rest.get(HEADER_SIZE..end))
            .ok_or(DecodeError::TruncatedName {
                offset,
                name_len: header.len,
                remaining: rest.len() - HEADER_SIZE,
            })?;

        let name = if window.is_empty() {
            Vec::new()
        } else {
            let end = window.iter().position(|&b| b == 0).ok_or(
                DecodeError::UnterminatedName {
                    offset,
                    name_len: header.len,
                },
            )?;
            window[..end].to_vec()
        };

        let event = DecodedEvent {
            wd: header.wd,
            mask: header.mask,
            cookie: header.cookie,
            name,
        };
        Ok((event, HEADER_SIZE + window.len()))
    }
}

impl Iterator for Events<'_> {
    type Item = Result<DecodedEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.buf.len() {
            return None;
        }

        match self.decode_record() {
            Ok((event, stride)) => {
                self.cursor += stride;
                Some(Ok(event))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        // Records span at least HEADER_SIZE bytes; a short tail yields one error.
        (0, Some(self.remaining().div_ceil(HEADER_SIZE)))
    }
}

impl FusedIterator for Events<'_> {}
