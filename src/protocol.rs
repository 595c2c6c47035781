//! The capability set a transport must expose (C1), and the registry of
//! known transports (C2).

use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::{Error, Result};

bitflags! {
    /// Access-mode and behavioral flags for an open request.
    ///
    /// Mirrors the bitfield in spec.md §6: `READ`/`WRITE` combine into
    /// `READ_WRITE`, and `NON_BLOCK`/`DIRECT` modify behavior independent of
    /// direction.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 0b0000_0001;
        /// Open for writing.
        const WRITE = 0b0000_0010;
        /// Open for reading and writing.
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// Never block; surface `WouldBlock` instead of retrying internally.
        const NON_BLOCK = 0b0000_0100;
        /// Bypass the buffered stream's internal buffer for large transfers.
        const DIRECT = 0b0000_1000;
    }
}

bitflags! {
    /// Flags passed to [`Protocol::shutdown`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct ShutdownFlags: u32 {
        /// Shut down the read side.
        const READ = 0b01;
        /// Shut down the write side.
        const WRITE = 0b10;
    }
}

/// The reference point for a seek, as understood by a [`Protocol`].
///
/// `Size` is not a real seek: it asks the transport to report its current
/// length without moving the position (spec.md §4.2.5/§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Relative to the start of the stream.
    Set,
    /// Relative to the current position.
    Cur,
    /// Relative to the end of the stream.
    End,
    /// Not a seek: report the stream's length.
    Size,
}

/// A `name=value` option parsed out of a URL's embedded option list
/// (spec.md §4.2.3), or passed programmatically to [`crate::open2`].
pub type Options = BTreeMap<String, String>;

/// A transport's contract.
///
/// Every method has a default that fails with [`Error::Unsupported`], which
/// models the "any function pointer may be absent" rule in spec.md §3: a
/// transport only overrides what it actually implements.
pub trait Protocol: Send {
    /// Reads up to `buf.len()` bytes. Returns `Ok(0)` only at EOF.
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Writes `buf` in full or fails; transports that are packet-oriented
    /// reject oversized writes via [`ProtocolDescriptor::max_packet_size`],
    /// enforced by the caller before this is invoked.
    fn write(&mut self, _buf: &[u8]) -> Result<usize> {
        Err(Error::Unsupported)
    }

    /// Seeks to `pos` relative to `whence`. `whence` is never [`Whence::Size`]
    /// unless the transport opted in by implementing this method; the core
    /// falls back to a `Size`-via-`End`-and-restore dance (spec.md §4.2.5)
    /// when this returns `Unsupported` for `Whence::Size`.
    fn seek(&mut self, _pos: i64, _whence: Whence) -> Result<i64> {
        Err(Error::Unsupported)
    }

    /// Releases any transport-owned resources. Called at most once.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Probes what capabilities would be available without fully connecting.
    /// The default just reports the flags the handle was opened with.
    fn check(&self, flags: OpenFlags) -> Result<OpenFlags> {
        Ok(flags)
    }

    /// Shuts down one or both directions of a duplex transport.
    fn shutdown(&mut self, _flags: ShutdownFlags) -> Result<()> {
        Err(Error::Invalid("shutdown not supported by this protocol".into()))
    }

    /// Returns the single OS file descriptor backing this transport, if any.
    #[cfg(unix)]
    fn file_handle(&self) -> Option<std::os::unix::io::RawFd> {
        None
    }

    /// Returns all OS file descriptors backing this transport. The default
    /// synthesizes a one-element array from [`Protocol::file_handle`],
    /// matching spec.md §4.2.5's multi-handle fallback.
    #[cfg(unix)]
    fn file_handles(&self) -> Option<Vec<std::os::unix::io::RawFd>> {
        self.file_handle().map(|fd| vec![fd])
    }

    /// Pauses or resumes delivery on a read-pause-capable transport.
    fn read_pause(&mut self, _pause: bool) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Seeks to a transport-defined timestamp (used by streamed transports
    /// that support seeking by time rather than by byte offset).
    fn read_seek(&mut self, _timestamp: i64, _flags: i32) -> Result<i64> {
        Err(Error::Unsupported)
    }
}

/// A transport's static capabilities, registered once at process startup.
///
/// Corresponds to the Protocol Descriptor of spec.md §3 (C1). The function
/// pointers of the source are represented here by `open`, a factory that
/// builds a boxed [`Protocol`] implementation; individual operations are
/// represented by the [`Protocol`] trait itself, so "absent" is simply "not
/// overridden".
pub struct ProtocolDescriptor {
    /// Short lowercase scheme identifier, e.g. `"file"`.
    pub name: &'static str,
    /// This transport requires process-wide network init/teardown.
    pub network: bool,
    /// This transport may appear as the outer half of `outer+inner://`.
    pub nested_scheme: bool,
    /// Upper bound on a single write, or 0 for stream transports.
    pub max_packet_size: u32,
    /// Declares that this transport implements [`Protocol::read`], so that
    /// [`crate::enum_protocols`] can skip it for write-only enumeration.
    pub supports_read: bool,
    /// Declares that this transport implements [`Protocol::write`].
    pub supports_write: bool,
    open: fn(filename: &str, flags: OpenFlags, options: &Options) -> Result<Box<dyn Protocol>>,
}

impl ProtocolDescriptor {
    /// Declares a new protocol descriptor.
    pub const fn new(
        name: &'static str,
        open: fn(&str, OpenFlags, &Options) -> Result<Box<dyn Protocol>>,
    ) -> Self {
        ProtocolDescriptor {
            name,
            network: false,
            nested_scheme: false,
            max_packet_size: 0,
            supports_read: false,
            supports_write: false,
            open,
        }
    }

    /// Declares this transport supports reading.
    pub const fn readable(mut self) -> Self {
        self.supports_read = true;
        self
    }

    /// Declares this transport supports writing.
    pub const fn writable(mut self) -> Self {
        self.supports_write = true;
        self
    }

    /// Marks this protocol as requiring network init/teardown.
    pub const fn network(mut self) -> Self {
        self.network = true;
        self
    }

    /// Marks this protocol as eligible to appear as the outer scheme of a
    /// nested `outer+inner://` URL.
    pub const fn nested_scheme(mut self) -> Self {
        self.nested_scheme = true;
        self
    }

    /// Sets the packet-transport upper bound on a single write.
    pub const fn max_packet_size(mut self, size: u32) -> Self {
        self.max_packet_size = size;
        self
    }

    pub(crate) fn connect(
        &self,
        filename: &str,
        flags: OpenFlags,
        options: &Options,
    ) -> Result<Box<dyn Protocol>> {
        (self.open)(filename, flags, options)
    }
}
