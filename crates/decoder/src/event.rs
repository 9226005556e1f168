//! inotify record layout and mask constants.
//!
//! This module describes the raw `struct inotify_event` as it appears in a
//! buffer returned by `read(2)` on an inotify descriptor, and provides an
//! encoder producing that layout.

use bitflags::bitflags;

bitflags! {
    /// inotify event mask flags.
    ///
    /// These match the kernel's inotify mask values exactly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventMask: u32 {
        /// File was accessed (e.g., read).
        const IN_ACCESS = 0x0000_0001;
        /// File was modified.
        const IN_MODIFY = 0x0000_0002;
        /// Metadata changed (e.g., permissions, timestamps).
        const IN_ATTRIB = 0x0000_0004;
        /// Writable file was closed.
        const IN_CLOSE_WRITE = 0x0000_0008;
        /// Unwritable file was closed.
        const IN_CLOSE_NOWRITE = 0x0000_0010;
        /// File was opened.
        const IN_OPEN = 0x0000_0020;
        /// File/directory moved out of watched directory.
        const IN_MOVED_FROM = 0x0000_0040;
        /// File/directory moved into watched directory.
        const IN_MOVED_TO = 0x0000_0080;
        /// File/directory created in watched directory.
        const IN_CREATE = 0x0000_0100;
        /// File/directory deleted from watched directory.
        const IN_DELETE = 0x0000_0200;
        /// Watched file/directory was deleted.
        const IN_DELETE_SELF = 0x0000_0400;
        /// Watched file/directory was moved.
        const IN_MOVE_SELF = 0x0000_0800;

        // Convenience combinations
        /// Close event (write or no-write).
        const IN_CLOSE = Self::IN_CLOSE_WRITE.bits() | Self::IN_CLOSE_NOWRITE.bits();
        /// Move event (from or to).
        const IN_MOVE = Self::IN_MOVED_FROM.bits() | Self::IN_MOVED_TO.bits();

        /// All events that can be watched.
        const IN_ALL_EVENTS = Self::IN_ACCESS.bits()
            | Self::IN_MODIFY.bits()
            | Self::IN_ATTRIB.bits()
            | Self::IN_CLOSE_WRITE.bits()
            | Self::IN_CLOSE_NOWRITE.bits()
            | Self::IN_OPEN.bits()
            | Self::IN_MOVED_FROM.bits()
            | Self::IN_MOVED_TO.bits()
            | Self::IN_CREATE.bits()
            | Self::IN_DELETE.bits()
            | Self::IN_DELETE_SELF.bits()
            | Self::IN_MOVE_SELF.bits();

        // Additional flags (for add_watch)
        /// Only watch pathname if it is a directory.
        const IN_ONLYDIR = 0x0100_0000;
        /// Don't follow symlinks.
        const IN_DONT_FOLLOW = 0x0200_0000;
        /// Don't generate events for children after they were unlinked.
        const IN_EXCL_UNLINK = 0x0400_0000;
        /// Fail if a watch already exists for the inode.
        const IN_MASK_CREATE = 0x1000_0000;
        /// Add to existing watch mask rather than replacing.
        const IN_MASK_ADD = 0x2000_0000;
        /// Only send event once, then remove watch.
        const IN_ONESHOT = 0x8000_0000;

        // Event flags (set by kernel in returned events)
        /// Watch was removed (explicitly or automatically).
        const IN_IGNORED = 0x0000_8000;
        /// Subject of event is a directory.
        const IN_ISDIR = 0x4000_0000;
        /// Event queue overflowed.
        const IN_Q_OVERFLOW = 0x0000_4000;
        /// Filesystem containing watched object was unmounted.
        const IN_UNMOUNT = 0x0000_2000;
    }
}

/// Size of the fixed record header (`struct inotify_event` without its name).
pub const HEADER_SIZE: usize = 16;

/// Unit the kernel pads name fields to.
///
/// The kernel rounds `len` up to a multiple of `sizeof(struct inotify_event)`
/// so the next header stays aligned.
pub const NAME_ALIGN: usize = HEADER_SIZE;

/// Fixed header of one raw inotify record.
///
/// Fields are stored in native byte order, as the kernel writes them. The
/// `len` bytes following the header hold the null-terminated name and its
/// padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEventHeader {
    /// Watch descriptor.
    pub wd: i32,
    /// Event mask.
    pub mask: u32,
    /// Unique cookie associating related events (for rename).
    pub cookie: u32,
    /// Length of the name field (including null terminator and padding).
    pub len: u32,
}

impl RawEventHeader {
    /// Size of the fixed portion of the record.
    pub const SIZE: usize = HEADER_SIZE;

    /// Create a header with no name.
    #[must_use]
    pub const fn new(wd: i32, mask: u32, cookie: u32) -> Self {
        Self {
            wd,
            mask,
            cookie,
            len: 0,
        }
    }

    /// Create a header declaring the given name field length.
    #[must_use]
    pub const fn with_name_len(wd: i32, mask: u32, cookie: u32, name_len: u32) -> Self {
        Self {
            wd,
            mask,
            cookie,
            len: name_len,
        }
    }

    /// Total size of the record this header introduces.
    #[must_use]
    pub const fn stride(&self) -> usize {
        record_stride(self.len)
    }

    /// Serialize this header to bytes.
    #[must_use]
    pub fn header_to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.wd.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.mask.to_ne_bytes());
        buf[8..12].copy_from_slice(&self.cookie.to_ne_bytes());
        buf[12..16].copy_from_slice(&self.len.to_ne_bytes());
        buf
    }

    /// Parse a header from the start of `buf`.
    ///
    /// Returns `None` if the buffer is too small.
    #[must_use]
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        let buf = buf.get(..HEADER_SIZE)?;

        Some(Self {
            wd: i32::from_ne_bytes(buf[0..4].try_into().ok()?),
            mask: u32::from_ne_bytes(buf[4..8].try_into().ok()?),
            cookie: u32::from_ne_bytes(buf[8..12].try_into().ok()?),
            len: u32::from_ne_bytes(buf[12..16].try_into().ok()?),
        })
    }

    /// Get the event mask as an `EventMask` bitflags value.
    #[must_use]
    pub fn event_mask(&self) -> EventMask {
        EventMask::from_bits_truncate(self.mask)
    }
}

/// Byte length of a record whose header declares `name_len`.
#[must_use]
pub const fn record_stride(name_len: u32) -> usize {
    HEADER_SIZE + name_len as usize
}

/// Length of the name field the kernel would reserve for a name of
/// `name_len` bytes.
///
/// Empty names occupy no name field at all. Otherwise the name plus its null
/// terminator is rounded up to [`NAME_ALIGN`].
#[must_use]
pub const fn padded_name_len(name_len: usize) -> usize {
    if name_len == 0 {
        return 0;
    }
    (name_len + 1).div_ceil(NAME_ALIGN) * NAME_ALIGN
}

/// Encode one record: header, name, null terminator, zero padding.
///
/// # Panics
///
/// Panics if the padded name length does not fit in a `u32`.
#[must_use]
pub fn encode_event(wd: i32, mask: u32, cookie: u32, name: &[u8]) -> Vec<u8> {
    let padded_len = padded_name_len(name.len());
    let len = u32::try_from(padded_len).expect("inotify name length exceeds u32");
    let header = RawEventHeader::with_name_len(wd, mask, cookie, len);

    let mut buf = Vec::with_capacity(header.stride());
    buf.extend_from_slice(&header.header_to_bytes());
    buf.extend_from_slice(name);
    // Null terminator and padding
    buf.resize(header.stride(), 0);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_size_matches_kernel() {
        // struct inotify_event without the flexible name member
        assert_eq!(HEADER_SIZE, 16);
        assert_eq!(RawEventHeader::SIZE, HEADER_SIZE);
    }

    #[test]
    fn test_header_bytes_layout() {
        let header = RawEventHeader::with_name_len(7, EventMask::IN_CREATE.bits(), 3, 32);
        let bytes = header.header_to_bytes();

        assert_eq!(&bytes[0..4], &7i32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &0x100u32.to_ne_bytes());
        assert_eq!(&bytes[8..12], &3u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &32u32.to_ne_bytes());
        assert_eq!(RawEventHeader::from_bytes(&bytes), Some(header));
    }

    #[test]
    fn test_header_from_short_buffer() {
        assert_eq!(RawEventHeader::from_bytes(&[0u8; HEADER_SIZE - 1]), None);
        assert_eq!(RawEventHeader::from_bytes(&[]), None);
    }

    #[test]
    fn test_encode_with_name() {
        let bytes = encode_event(1, EventMask::IN_CREATE.bits(), 0, b"test.txt");

        // "test.txt" (8) + null (1) = 9, padded to 16
        assert_eq!(bytes.len(), HEADER_SIZE + 16);

        let header = RawEventHeader::from_bytes(&bytes).unwrap();
        assert_eq!(header.len, 16);
        assert_eq!(header.stride(), bytes.len());
        assert_eq!(&bytes[16..24], b"test.txt");
        assert!(bytes[24..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_encode_without_name() {
        let bytes = encode_event(4, EventMask::IN_IGNORED.bits(), 0, b"");
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(RawEventHeader::from_bytes(&bytes).unwrap().len, 0);
    }

    #[test]
    fn test_padded_name_len() {
        assert_eq!(padded_name_len(0), 0);
        // "a" + null = 2, padded to 16
        assert_eq!(padded_name_len(1), 16);
        // 15 + null fills one unit exactly
        assert_eq!(padded_name_len(15), 16);
        // 16 + null spills into a second unit
        assert_eq!(padded_name_len(16), 32);
    }

    #[test]
    fn test_event_mask_all() {
        let all = EventMask::IN_ALL_EVENTS;
        assert!(all.contains(EventMask::IN_CREATE | EventMask::IN_DELETE));
        assert!(all.contains(EventMask::IN_MOVE));
        assert!(all.contains(EventMask::IN_CLOSE));
        assert!(!all.contains(EventMask::IN_ISDIR));
        assert!(!all.contains(EventMask::IN_IGNORED));
    }

    #[test]
    fn test_event_mask_truncates_unknown_bits() {
        let header = RawEventHeader::new(1, 0x0000_0100 | 0x0008_0000, 0);
        assert_eq!(header.event_mask(), EventMask::IN_CREATE);
    }
}
