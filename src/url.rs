//! URL Context (C3): handle lifecycle, URL scheme dispatch, and unbuffered
//! read/write/seek with retry and interrupt policy.

mod options;

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::protocol::{OpenFlags, Options, Protocol, ShutdownFlags, Whence};
use crate::registry;

/// A user-supplied cancellation hook, polled between retry iterations.
///
/// Returns `true` to abort the in-flight operation with [`Error::Exit`].
pub type InterruptCallback = Arc<dyn Fn() -> bool + Send + Sync>;

static NETWORK_REFCOUNT: AtomicUsize = AtomicUsize::new(0);

fn network_init() -> Result<()> {
    // A real network transport would call into its sockets library's
    // process-wide init here (e.g. WSAStartup). This crate ships no such
    // transport, so the counter only exists to keep init/teardown balanced
    // for any third-party `Protocol` that declares `network()`.
    NETWORK_REFCOUNT.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

fn network_deinit() {
    NETWORK_REFCOUNT.fetch_sub(1, Ordering::SeqCst);
}

/// Extracts `(scheme, nested_scheme, scheme_end)` from a URL, per the rules
/// in spec.md §4.2.1.
fn parse_scheme(filename: &str) -> (String, String, usize) {
    let scheme_end = filename
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.'))
        .unwrap_or(filename.len());

    let bytes = filename.as_bytes();
    let after = bytes.get(scheme_end).copied();

    let is_dos_path = scheme_end == 1
        && bytes[0].is_ascii_alphabetic()
        && after == Some(b':')
        && (bytes.len() == 2 || bytes.get(2) == Some(&b'\\'));

    let forced_to_file = is_dos_path || !matches!(after, Some(b':') | Some(b','));

    let scheme = if forced_to_file {
        "file".to_string()
    } else {
        filename[..scheme_end].to_string()
    };

    let nested_scheme = scheme
        .find('+')
        .map(|i| scheme[..i].to_string())
        .unwrap_or_else(|| scheme.clone());

    let scheme_end = if forced_to_file { 0 } else { scheme_end };
    (scheme, nested_scheme, scheme_end)
}

/// Classifies a URL's scheme without opening it (spec.md §10, point 3: an
/// `avio_find_protocol_name`-equivalent used by demuxer probing).
pub fn scheme_of(filename: &str) -> String {
    parse_scheme(filename).0
}

struct RetryState {
    fast_retries_left: u32,
    deadline: Option<Instant>,
}

impl RetryState {
    fn new() -> Self {
        RetryState {
            fast_retries_left: 5,
            deadline: None,
        }
    }
}

/// Shared retry policy for `read`/`read_complete`/`write` (spec.md §4.2.4).
///
/// `attempt` is called with the number of bytes already delivered and
/// returns how many more bytes it transferred (or an error). The loop
/// itself never touches buffers, so the same state machine drives reads
/// and writes.
fn transfer_with_retry(
    min: usize,
    non_block: bool,
    rw_timeout: Duration,
    interrupt: Option<&InterruptCallback>,
    mut attempt: impl FnMut(usize) -> Result<usize>,
) -> Result<usize> {
    let mut delivered = 0usize;
    let mut retry = RetryState::new();

    while delivered < min {
        match attempt(delivered) {
            Ok(0) => break,
            Ok(n) => {
                delivered += n;
                retry.fast_retries_left = retry.fast_retries_left.max(2);
                retry.deadline = None;
            }
            Err(Error::Interrupted) => {
                // Retried immediately, no fast-retry budget consumed.
            }
            Err(e) if non_block => return Err(e),
            Err(Error::WouldBlock) => {
                if retry.fast_retries_left > 0 {
                    retry.fast_retries_left -= 1;
                } else if !rw_timeout.is_zero() {
                    let deadline = *retry.deadline.get_or_insert_with(|| Instant::now() + rw_timeout);
                    if Instant::now() >= deadline {
                        return Err(Error::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "rw_timeout exceeded while waiting for I/O",
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                } else {
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
            Err(e) => return Err(e),
        }

        if let Some(cb) = interrupt {
            if cb() {
                return Err(Error::Exit);
            }
        }
    }

    Ok(delivered)
}

/// One open handle bound to a URL and a [`Protocol`] instance (C3).
pub struct UrlContext {
    filename: String,
    protocol_name: &'static str,
    inner: Box<dyn Protocol>,
    flags: OpenFlags,
    is_connected: bool,
    is_streamed: bool,
    max_packet_size: u32,
    network: bool,
    interrupt_callback: Option<InterruptCallback>,
    /// Read/write inactivity deadline. Zero disables the timeout.
    pub rw_timeout: Duration,
    closed: bool,
}

impl std::fmt::Debug for UrlContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UrlContext")
            .field("filename", &self.filename)
            .field("protocol", &self.protocol_name)
            .field("is_streamed", &self.is_streamed)
            .finish()
    }
}

impl UrlContext {
    /// Opens `filename` with the given flags, dispatching to whichever
    /// registered protocol matches the URL's scheme.
    pub fn open(filename: &str, flags: OpenFlags) -> Result<Self> {
        Self::open2(filename, flags, None, &Options::new())
    }

    /// Like [`UrlContext::open`], with an interrupt callback and
    /// programmatic options merged with any embedded in the URL.
    pub fn open2(
        filename: &str,
        flags: OpenFlags,
        interrupt_callback: Option<InterruptCallback>,
        extra_options: &Options,
    ) -> Result<Self> {
        let (scheme, nested_scheme, scheme_end) = parse_scheme(filename);

        let registry = registry::global();
        let descriptor = registry
            .find(&scheme)
            .or_else(|| registry.find_nested(&nested_scheme))
            .ok_or_else(|| Error::ProtocolNotFound(scheme.clone()))?;

        if descriptor.network {
            network_init()?;
        }

        let (rewritten_filename, mut options) = options::split_embedded_options(filename, scheme_end)?;
        for (k, v) in extra_options {
            options.insert(k.clone(), v.clone());
        }

        log::debug!("opening {rewritten_filename:?} via protocol {:?}", descriptor.name);

        let connect_result = descriptor.connect(&rewritten_filename, flags, &options);
        let inner = match connect_result {
            Ok(inner) => inner,
            Err(e) => {
                if descriptor.network {
                    network_deinit();
                }
                return Err(e);
            }
        };

        let mut ctx = UrlContext {
            filename: rewritten_filename,
            protocol_name: descriptor.name,
            inner,
            flags,
            is_connected: true,
            is_streamed: false,
            max_packet_size: descriptor.max_packet_size,
            network: descriptor.network,
            interrupt_callback,
            rw_timeout: Duration::ZERO,
            closed: false,
        };

        if flags.contains(OpenFlags::WRITE) || descriptor.name == "file" {
            ctx.is_streamed = ctx.inner.seek(0, Whence::Set).is_err();
        }

        Ok(ctx)
    }

    /// The URL this handle was opened with (post option-excision).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The name of the protocol backing this handle.
    pub fn protocol_name(&self) -> &'static str {
        self.protocol_name
    }

    /// True once the transport's `open`/`open2` hook has succeeded.
    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// True if random access (seeking) is not possible on this transport.
    pub fn is_streamed(&self) -> bool {
        self.is_streamed
    }

    /// Upper bound on a single [`UrlContext::write`], or 0 for stream
    /// transports.
    pub fn max_packet_size(&self) -> u32 {
        self.max_packet_size
    }

    pub(crate) fn flags(&self) -> OpenFlags {
        self.flags
    }

    /// Reads at least 1 and at most `buf.len()` bytes, retrying internally
    /// per spec.md §4.2.4. Returns `Ok(0)` only at EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for reading",
            )));
        }
        let non_block = self.flags.contains(OpenFlags::NON_BLOCK);
        let rw_timeout = self.rw_timeout;
        let interrupt = self.interrupt_callback.clone();
        let inner = &mut self.inner;
        transfer_with_retry(1, non_block, rw_timeout, interrupt.as_ref(), |delivered| {
            inner.read(&mut buf[delivered..])
        })
    }

    /// Reads exactly `buf.len()` bytes, or fails with [`Error::Eof`] if the
    /// source is exhausted first.
    pub fn read_complete(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::READ) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for reading",
            )));
        }
        let min = buf.len();
        let non_block = self.flags.contains(OpenFlags::NON_BLOCK);
        let rw_timeout = self.rw_timeout;
        let interrupt = self.interrupt_callback.clone();
        let inner = &mut self.inner;
        let n = transfer_with_retry(min, non_block, rw_timeout, interrupt.as_ref(), |delivered| {
            inner.read(&mut buf[delivered..])
        })?;
        if n < min {
            Err(Error::Eof)
        } else {
            Ok(n)
        }
    }

    /// Writes all of `buf`, retrying internally. Fails with [`Error::Io`] if
    /// `buf` exceeds `max_packet_size` on a packet transport.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.flags.contains(OpenFlags::WRITE) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "handle not opened for writing",
            )));
        }
        if self.max_packet_size > 0 && buf.len() > self.max_packet_size as usize {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write exceeds max_packet_size",
            )));
        }
        let min = buf.len();
        let non_block = self.flags.contains(OpenFlags::NON_BLOCK);
        let rw_timeout = self.rw_timeout;
        let interrupt = self.interrupt_callback.clone();
        let inner = &mut self.inner;
        transfer_with_retry(min, non_block, rw_timeout, interrupt.as_ref(), |delivered| {
            inner.write(&buf[delivered..])
        })
    }

    /// Seeks to `pos` relative to `whence`. The `FORCE` bit some callers
    /// pass at the buffered-stream layer is not part of this signature:
    /// it is stripped before ever reaching a [`Protocol`] (spec.md §4.2.5).
    pub fn seek(&mut self, pos: i64, whence: Whence) -> Result<i64> {
        self.inner.seek(pos, whence)
    }

    /// Returns the stream's length, preferring a direct `Whence::Size`
    /// query and falling back to the seek-to-end-and-restore dance.
    pub fn size(&mut self) -> Result<i64> {
        if let Ok(size) = self.inner.seek(0, Whence::Size) {
            return Ok(size);
        }

        let current = self.inner.seek(0, Whence::Cur)?;
        let end = self.inner.seek(-1, Whence::End)?;
        self.inner.seek(current, Whence::Set)?;
        Ok(end + 1)
    }

    /// Shuts down one or both directions of a duplex transport.
    pub fn shutdown(&mut self, flags: ShutdownFlags) -> Result<()> {
        self.inner.shutdown(flags)
    }

    /// Pauses or resumes delivery on a read-pause-capable transport.
    pub fn read_pause(&mut self, pause: bool) -> Result<()> {
        self.inner.read_pause(pause)
    }

    /// Seeks to a transport-defined timestamp.
    pub fn read_seek(&mut self, timestamp: i64, flags: i32) -> Result<i64> {
        self.inner.read_seek(timestamp, flags)
    }

    /// Probes which of `flags`' capabilities the transport actually backs,
    /// without performing a full read/write session (spec.md C7 `check`).
    pub fn check(&self, flags: OpenFlags) -> Result<OpenFlags> {
        self.inner.check(flags)
    }

    /// The OS file descriptor backing this transport, if there is exactly
    /// one (spec.md §4.2.5).
    #[cfg(unix)]
    pub fn file_handle(&self) -> Result<std::os::unix::io::RawFd> {
        self.inner.file_handle().ok_or(Error::Unsupported)
    }

    /// All OS file descriptors backing this transport.
    #[cfg(unix)]
    pub fn file_handles(&self) -> Result<Vec<std::os::unix::io::RawFd>> {
        self.inner.file_handles().ok_or(Error::Unsupported)
    }

    /// Closes the handle. Ownership makes this idempotent at the type
    /// level: there is no way to call `close` twice on the same
    /// `UrlContext`, since it is consumed here.
    pub fn close(mut self) -> Result<()> {
        let result = self.inner.close();
        if self.network {
            network_deinit();
        }
        self.closed = true;
        result
    }
}

impl Drop for UrlContext {
    /// Balances network init even if a caller never reaches
    /// [`UrlContext::close`] (e.g. the handle is owned by an `Arc` inside
    /// [`crate::adapter::buffer_url`] and dropped along with the last
    /// clone). `close`'s transport-level errors are not observable here;
    /// callers that need them must call `close` explicitly.
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.inner.close();
            if self.network {
                network_deinit();
            }
            self.closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_parsing_basic() {
        let (scheme, nested, _) = parse_scheme("http://example.com/x");
        assert_eq!(scheme, "http");
        assert_eq!(nested, "http");
    }

    #[test]
    fn scheme_parsing_nested() {
        let (scheme, nested, _) = parse_scheme("crypto+file:///tmp/x");
        assert_eq!(scheme, "crypto+file");
        assert_eq!(nested, "crypto");
    }

    #[test]
    fn scheme_parsing_forces_file_with_no_colon_or_comma() {
        let (scheme, _, _) = parse_scheme("/tmp/plain/path");
        assert_eq!(scheme, "file");
    }

    #[test]
    fn scheme_parsing_forces_file_for_dos_path() {
        let (scheme, _, _) = parse_scheme("C:\\Users\\x");
        assert_eq!(scheme, "file");
        let (scheme, _, _) = parse_scheme("C:file.txt");
        assert_eq!(scheme, "file");
    }

    #[test]
    fn scheme_parsing_embedded_options() {
        let (scheme, nested, end) = parse_scheme("udp,ttl=7,pkt_size=1316://host:1234");
        assert_eq!(scheme, "udp");
        assert_eq!(nested, "udp");
        assert_eq!(&"udp,ttl=7,pkt_size=1316://host:1234"[..end], "udp");
    }

    #[test]
    fn retry_recovers_interrupted_and_wouldblock() {
        use std::cell::Cell;
        let calls = Cell::new(0);
        let result = transfer_with_retry(4, false, Duration::ZERO, None, |delivered| {
            calls.set(calls.get() + 1);
            match calls.get() {
                1 => Err(Error::Interrupted),
                2 => Err(Error::WouldBlock),
                _ => Ok(4 - delivered),
            }
        });
        assert_eq!(result.unwrap(), 4);
        assert!(calls.get() >= 3);
    }

    #[test]
    fn retry_returns_wouldblock_verbatim_on_non_block() {
        let result: Result<usize> =
            transfer_with_retry(4, true, Duration::ZERO, None, |_| Err(Error::WouldBlock));
        assert!(matches!(result, Err(Error::WouldBlock)));
    }

    #[test]
    fn retry_times_out() {
        let result: Result<usize> = transfer_with_retry(
            4,
            false,
            Duration::from_millis(5),
            None,
            |_| Err(Error::WouldBlock),
        );
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn retry_honors_interrupt_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let polls = Arc::new(AtomicUsize::new(0));
        let cb: InterruptCallback = Arc::new(move || polls.fetch_add(1, Ordering::SeqCst) + 1 >= 3);
        let result: Result<usize> =
            transfer_with_retry(4096, false, Duration::ZERO, Some(&cb), |_| Err(Error::WouldBlock));
        assert!(matches!(result, Err(Error::Exit)));
    }
}
