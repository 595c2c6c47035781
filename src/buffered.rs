//! Buffered Stream (C4): a direction-polarised, seek-aware, checksumming
//! byte buffer over any byte-oriented source or sink.

use crate::error::{Error, Result};
use crate::protocol::Whence;

/// Bytes read ahead of the current position before a forward seek gives up
/// on the "read and discard" optimisation and falls back to a real seek.
pub const SHORT_SEEK_THRESHOLD: i64 = 4096;

/// Default buffer capacity used when no packet-size constraint applies.
pub const DEFAULT_BUFFER_SIZE: usize = 32768;

/// Bytes appended to a closed continuous dynamic buffer so that downstream
/// bit-readers can safely over-read (spec.md §4.5/§6).
pub const INPUT_BUFFER_PADDING_SIZE: usize = 16;

type ReadPacket = Box<dyn FnMut(&mut [u8]) -> Result<usize> + Send>;
type WritePacket = Box<dyn FnMut(&[u8]) -> Result<()> + Send>;
type SeekFn = Box<dyn FnMut(i64, Whence) -> Result<i64> + Send>;
type ReadPauseFn = Box<dyn FnMut(bool) -> Result<()> + Send>;
type ReadSeekFn = Box<dyn FnMut(i64, i32) -> Result<i64> + Send>;

/// A running checksum over a contiguous window of bytes as they flow
/// through the buffer (spec.md §4.3.7).
struct Checksum {
    update: fn(u32, &[u8]) -> u32,
    value: u32,
    /// Index into `buffer` where the open window starts.
    ptr: usize,
}

/// The standard CRC-32/IEEE update function, provided so callers don't need
/// to bring their own table (spec.md §1 names the table itself a detail).
pub fn crc32_ieee_update(mut crc: u32, data: &[u8]) -> u32 {
    crc = !crc;
    for &byte in data {
        crc ^= byte as u32;
        for _ in 0..8 {
            let mask = (crc & 1).wrapping_neg();
            crc = (crc >> 1) ^ (0xEDB8_8320 & mask);
        }
    }
    !crc
}

/// A direction-polarised buffer layered on a byte-oriented source or sink.
///
/// Construct with [`BufferedStream::new`] for a normal callback-driven
/// stream, or [`BufferedStream::from_literal`] for the "already have all the
/// bytes" case (spec.md §4.3.1's pre-filled-literal-region special case).
pub struct BufferedStream {
    buffer: Vec<u8>,
    buf_ptr: usize,
    buf_end: usize,
    pos: i64,
    write_flag: bool,
    eof_reached: bool,
    error: bool,
    must_flush: bool,
    seekable: bool,
    max_packet_size: u32,
    direct: bool,
    checksum: Option<Checksum>,
    read_packet: Option<ReadPacket>,
    write_packet: Option<WritePacket>,
    seek_fn: Option<SeekFn>,
    read_pause_fn: Option<ReadPauseFn>,
    read_seek_fn: Option<ReadSeekFn>,
    bytes_read: u64,
    seek_count: u64,
}

impl std::fmt::Debug for BufferedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedStream")
            .field("buffer_size", &self.buffer.len())
            .field("pos", &self.pos)
            .field("write_flag", &self.write_flag)
            .field("seekable", &self.seekable)
            .finish()
    }
}

impl BufferedStream {
    /// Allocates a fresh buffer of `capacity` bytes, in the given direction.
    pub fn new(capacity: usize, write_flag: bool) -> Self {
        let buf_end = if write_flag { capacity } else { 0 };
        BufferedStream {
            buffer: vec![0; capacity.max(1)],
            buf_ptr: 0,
            buf_end,
            pos: 0,
            write_flag,
            eof_reached: false,
            error: false,
            must_flush: false,
            seekable: true,
            max_packet_size: 0,
            direct: false,
            checksum: None,
            read_packet: None,
            write_packet: None,
            seek_fn: None,
            read_pause_fn: None,
            read_seek_fn: None,
            bytes_read: 0,
            seek_count: 0,
        }
    }

    /// Wraps an already-fully-available byte region for reading, with no
    /// underlying source at all — the special case in spec.md §4.3.1 where
    /// `read_packet` is absent and the direction is read.
    pub fn from_literal(data: Vec<u8>) -> Self {
        let len = data.len();
        BufferedStream {
            buffer: data,
            buf_ptr: 0,
            buf_end: len,
            pos: len as i64,
            write_flag: false,
            eof_reached: false,
            error: false,
            must_flush: false,
            seekable: true,
            max_packet_size: 0,
            direct: false,
            checksum: None,
            read_packet: None,
            write_packet: None,
            seek_fn: None,
            read_pause_fn: None,
            read_seek_fn: None,
            bytes_read: 0,
            seek_count: 0,
        }
    }

    /// Attaches the read callback.
    pub fn with_read_packet(mut self, cb: impl FnMut(&mut [u8]) -> Result<usize> + Send + 'static) -> Self {
        self.read_packet = Some(Box::new(cb));
        self
    }

    /// Attaches the write callback.
    pub fn with_write_packet(mut self, cb: impl FnMut(&[u8]) -> Result<()> + Send + 'static) -> Self {
        self.write_packet = Some(Box::new(cb));
        self
    }

    /// Attaches the seek callback.
    pub fn with_seek(mut self, cb: impl FnMut(i64, Whence) -> Result<i64> + Send + 'static) -> Self {
        self.seek_fn = Some(Box::new(cb));
        self
    }

    /// Attaches the read-pause callback.
    pub fn with_read_pause(mut self, cb: impl FnMut(bool) -> Result<()> + Send + 'static) -> Self {
        self.read_pause_fn = Some(Box::new(cb));
        self
    }

    /// Attaches the read-seek (timestamp-seek) callback.
    pub fn with_read_seek(mut self, cb: impl FnMut(i64, i32) -> Result<i64> + Send + 'static) -> Self {
        self.read_seek_fn = Some(Box::new(cb));
        self
    }

    /// Sets the packet-transport upper bound on a single buffer fill/flush.
    pub fn set_max_packet_size(&mut self, size: u32) {
        self.max_packet_size = size;
    }

    /// Marks the underlying transport as non-seekable.
    pub fn set_seekable(&mut self, seekable: bool) {
        self.seekable = seekable;
    }

    /// Enables bypassing the internal buffer for large direct transfers.
    pub fn set_direct(&mut self, direct: bool) {
        self.direct = direct;
    }

    /// Seeds the stream's absolute position counter.
    ///
    /// Used when wrapping a source some of which a caller already consumed
    /// before this stream existed (the rewind-with-probe-data scenario,
    /// spec.md §4.3.6): the underlying `read_packet` callback starts
    /// delivering bytes from that already-advanced point, so the stream's
    /// own notion of its absolute offset needs to start there too.
    pub fn set_initial_pos(&mut self, pos: i64) {
        self.pos = pos;
    }

    /// Total bytes ever read from the source.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Total number of times the transport's `seek` callback was invoked.
    pub fn seek_count(&self) -> u64 {
        self.seek_count
    }

    /// True if the last I/O operation latched an error.
    pub fn has_error(&self) -> bool {
        self.error
    }

    fn default_capacity(&self) -> usize {
        (self.max_packet_size as usize).max(DEFAULT_BUFFER_SIZE)
    }

    /// Resets the buffer pointers for a fresh pass in the given direction
    /// (spec.md §4.3.1).
    pub fn resetbuf(&mut self, write_flag: bool) {
        self.write_flag = write_flag;
        self.buf_ptr = 0;
        self.buf_end = if write_flag { self.buffer.len() } else { 0 };
    }

    fn checksum_absorb(&mut self, upto: usize) {
        if let Some(cs) = &mut self.checksum {
            if upto > cs.ptr {
                cs.value = (cs.update)(cs.value, &self.buffer[cs.ptr..upto]);
            }
            cs.ptr = 0;
        }
    }

    /// Begins a checksum window at the current write/read cursor.
    pub fn init_checksum(&mut self, update: fn(u32, &[u8]) -> u32, seed: u32) {
        self.checksum = Some(Checksum {
            update,
            value: seed,
            ptr: self.buf_ptr,
        });
    }

    /// Absorbs any trailing bytes, disarms the checksum hook, and returns
    /// the accumulated value.
    pub fn get_checksum(&mut self) -> Option<u32> {
        let cursor = self.buf_ptr;
        self.checksum_absorb(cursor);
        self.checksum.take().map(|cs| cs.value)
    }

    // ---- write path (§4.3.2) ----

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buf_ptr == 0 {
            return Ok(());
        }

        let chunk = &self.buffer[..self.buf_ptr];
        if let Some(write_packet) = &mut self.write_packet {
            match write_packet(chunk) {
                Ok(()) => {}
                Err(e) => {
                    self.error = true;
                    self.pos += self.buf_ptr as i64;
                    self.checksum_absorb(self.buf_ptr);
                    self.buf_ptr = 0;
                    return Err(e);
                }
            }
        } else {
            self.error = true;
        }

        self.pos += self.buf_ptr as i64;
        self.checksum_absorb(self.buf_ptr);
        self.buf_ptr = 0;
        Ok(())
    }

    /// Writes `buf`, copying into the internal buffer and flushing whenever
    /// it fills, or bypassing the buffer entirely when `direct` is set and
    /// no checksum is active. On a packet-mode stream (`max_packet_size >
    /// 0`), also flushes at the end of the call, so each `write()` maps to
    /// exactly one `write_packet` invocation.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        debug_assert!(self.write_flag, "write on a read-mode BufferedStream");

        if self.direct && self.checksum.is_none() {
            self.flush_buffer()?;
            return match &mut self.write_packet {
                Some(write_packet) => {
                    let r = write_packet(buf);
                    self.pos += buf.len() as i64;
                    if r.is_err() {
                        self.error = true;
                    }
                    r
                }
                None => {
                    self.error = true;
                    self.pos += buf.len() as i64;
                    Err(Error::Unsupported)
                }
            };
        }

        let mut remaining = buf;
        while !remaining.is_empty() {
            let space = self.buffer.len() - self.buf_ptr;
            let n = space.min(remaining.len());
            self.buffer[self.buf_ptr..self.buf_ptr + n].copy_from_slice(&remaining[..n]);
            self.buf_ptr += n;
            remaining = &remaining[n..];
            if self.buf_ptr == self.buffer.len() {
                self.flush_buffer()?;
            }
        }

        // Packet-oriented transports need write_packet invoked once per
        // caller write, not once per buffer-fill: each write() call is one
        // packet, so flush even if the buffer still has room.
        if self.max_packet_size > 0 {
            self.flush_buffer()?;
        }

        Ok(())
    }

    fn write_u8(&mut self, byte: u8) {
        if self.buf_ptr >= self.buffer.len() {
            let _ = self.flush_buffer();
        }
        self.buffer[self.buf_ptr] = byte;
        self.buf_ptr += 1;
        if self.buf_ptr == self.buffer.len() {
            let _ = self.flush_buffer();
        }
    }

    /// Writes a single byte.
    pub fn w8(&mut self, v: u8) {
        self.write_u8(v);
    }

    /// Writes a little-endian 16-bit integer.
    pub fn wl16(&mut self, v: u16) {
        self.write_u8(v as u8);
        self.write_u8((v >> 8) as u8);
    }

    /// Writes a big-endian 16-bit integer.
    pub fn wb16(&mut self, v: u16) {
        self.write_u8((v >> 8) as u8);
        self.write_u8(v as u8);
    }

    /// Writes a little-endian 24-bit integer (low 3 bytes of `v`).
    pub fn wl24(&mut self, v: u32) {
        self.write_u8(v as u8);
        self.write_u8((v >> 8) as u8);
        self.write_u8((v >> 16) as u8);
    }

    /// Writes a big-endian 24-bit integer (low 3 bytes of `v`).
    pub fn wb24(&mut self, v: u32) {
        self.write_u8((v >> 16) as u8);
        self.write_u8((v >> 8) as u8);
        self.write_u8(v as u8);
    }

    /// Writes a little-endian 32-bit integer.
    pub fn wl32(&mut self, v: u32) {
        for i in 0..4 {
            self.write_u8((v >> (8 * i)) as u8);
        }
    }

    /// Writes a big-endian 32-bit integer.
    pub fn wb32(&mut self, v: u32) {
        for i in (0..4).rev() {
            self.write_u8((v >> (8 * i)) as u8);
        }
    }

    /// Writes a little-endian 64-bit integer.
    pub fn wl64(&mut self, v: u64) {
        for i in 0..8 {
            self.write_u8((v >> (8 * i)) as u8);
        }
    }

    /// Writes a big-endian 64-bit integer.
    pub fn wb64(&mut self, v: u64) {
        for i in (0..8).rev() {
            self.write_u8((v >> (8 * i)) as u8);
        }
    }

    /// Writes `v` using 7-bit continuation encoding, most-significant group
    /// first, matching [`BufferedStream::read_varlen`].
    pub fn write_varlen(&mut self, v: u64) {
        let mut groups = [0u8; 10];
        let mut n = 0;
        let mut rem = v;
        loop {
            groups[n] = (rem & 0x7f) as u8;
            rem >>= 7;
            n += 1;
            if rem == 0 {
                break;
            }
        }
        for i in (0..n).rev() {
            let continuation = if i == 0 { 0 } else { 0x80 };
            self.write_u8(groups[i] | continuation);
        }
    }

    /// Writes a NUL-terminated UTF-8 string, returning the number of bytes
    /// written including the terminator. A nil string writes a single NUL.
    pub fn put_str(&mut self, s: Option<&str>) -> usize {
        let bytes = s.map(str::as_bytes).unwrap_or(&[]);
        for &b in bytes {
            self.write_u8(b);
        }
        self.write_u8(0);
        bytes.len() + 1
    }

    /// Transcodes `s` to UTF-16LE code units (surrogate pairs for
    /// codepoints ≥ U+10000), terminated by a NUL code unit, returning the
    /// total bytes written.
    pub fn put_str16le(&mut self, s: &str) -> usize {
        let mut written = 0;
        for c in s.encode_utf16() {
            self.wl16(c);
            written += 2;
        }
        self.wl16(0);
        written + 2
    }

    /// Forces a flush of any buffered output and clears `must_flush`.
    pub fn flush(&mut self) -> Result<()> {
        let r = self.flush_buffer();
        self.must_flush = false;
        r
    }

    // ---- read path (§4.3.3/§4.3.4) ----

    fn fill_buffer(&mut self) -> Result<()> {
        let append = self.max_packet_size == 0 && self.buf_end < self.buffer.len();

        if append {
            let default_cap = self.default_capacity();
            if self.buffer.len() > default_cap {
                let target = default_cap.max(self.buf_end);
                self.buffer.resize(target, 0);
            }
        } else {
            self.checksum_absorb(self.buf_end);
        }

        let dst_start = if append { self.buf_end } else { 0 };
        let Some(read_packet) = &mut self.read_packet else {
            if self.buf_ptr == self.buf_end {
                self.eof_reached = true;
            }
            return Ok(());
        };

        let len = match read_packet(&mut self.buffer[dst_start..]) {
            Ok(0) => {
                self.eof_reached = true;
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => {
                self.eof_reached = true;
                self.error = true;
                return Err(e);
            }
        };

        self.pos += len as i64;
        self.buf_ptr = dst_start;
        self.buf_end = dst_start + len;
        self.bytes_read += len as u64;
        self.eof_reached = false;
        Ok(())
    }

    /// Reads and discards bytes until the buffer is exhausted, returning the
    /// next byte or 0 at EOF/on error (the latched state is inspectable via
    /// [`BufferedStream::has_error`]/[`BufferedStream::feof`]).
    pub fn r8(&mut self) -> u8 {
        if self.buf_ptr >= self.buf_end {
            let _ = self.fill_buffer();
        }
        if self.buf_ptr < self.buf_end {
            let b = self.buffer[self.buf_ptr];
            self.buf_ptr += 1;
            b
        } else {
            0
        }
    }

    /// Reads a little-endian 16-bit integer via [`BufferedStream::r8`].
    pub fn rl16(&mut self) -> u16 {
        let lo = self.r8() as u16;
        let hi = self.r8() as u16;
        lo | (hi << 8)
    }

    /// Reads a big-endian 16-bit integer via [`BufferedStream::r8`].
    pub fn rb16(&mut self) -> u16 {
        let hi = self.r8() as u16;
        let lo = self.r8() as u16;
        (hi << 8) | lo
    }

    /// Reads a little-endian 24-bit integer via [`BufferedStream::r8`].
    pub fn rl24(&mut self) -> u32 {
        let b0 = self.r8() as u32;
        let b1 = self.r8() as u32;
        let b2 = self.r8() as u32;
        b0 | (b1 << 8) | (b2 << 16)
    }

    /// Reads a big-endian 24-bit integer via [`BufferedStream::r8`].
    pub fn rb24(&mut self) -> u32 {
        let b2 = self.r8() as u32;
        let b1 = self.r8() as u32;
        let b0 = self.r8() as u32;
        (b2 << 16) | (b1 << 8) | b0
    }

    /// Reads a little-endian 32-bit integer via [`BufferedStream::r8`].
    pub fn rl32(&mut self) -> u32 {
        let mut v = 0u32;
        for i in 0..4 {
            v |= (self.r8() as u32) << (8 * i);
        }
        v
    }

    /// Reads a big-endian 32-bit integer via [`BufferedStream::r8`].
    pub fn rb32(&mut self) -> u32 {
        let mut v = 0u32;
        for i in (0..4).rev() {
            v |= (self.r8() as u32) << (8 * i);
        }
        v
    }

    /// Reads a little-endian 64-bit integer via [`BufferedStream::r8`].
    pub fn rl64(&mut self) -> u64 {
        let mut v = 0u64;
        for i in 0..8 {
            v |= (self.r8() as u64) << (8 * i);
        }
        v
    }

    /// Reads a big-endian 64-bit integer via [`BufferedStream::r8`].
    pub fn rb64(&mut self) -> u64 {
        let mut v = 0u64;
        for i in (0..8).rev() {
            v |= (self.r8() as u64) << (8 * i);
        }
        v
    }

    /// Reads the inverse of [`BufferedStream::write_varlen`].
    pub fn read_varlen(&mut self) -> u64 {
        let mut v = 0u64;
        loop {
            let b = self.r8();
            v = (v << 7) | (b & 0x7f) as u64;
            if b & 0x80 == 0 {
                break;
            }
        }
        v
    }

    /// Drains the buffer, refilling as needed, until `buf` is full or the
    /// source returns 0. Returns bytes delivered, or the latched
    /// error/EOF if nothing was delivered.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut delivered = 0;
        while delivered < buf.len() {
            if self.buf_ptr < self.buf_end {
                let avail = self.buf_end - self.buf_ptr;
                let n = avail.min(buf.len() - delivered);
                buf[delivered..delivered + n]
                    .copy_from_slice(&self.buffer[self.buf_ptr..self.buf_ptr + n]);
                self.buf_ptr += n;
                delivered += n;
                continue;
            }

            if self.direct && self.checksum.is_none() {
                let Some(read_packet) = &mut self.read_packet else {
                    self.eof_reached = true;
                    break;
                };
                match read_packet(&mut buf[delivered..]) {
                    Ok(0) => {
                        self.eof_reached = true;
                        break;
                    }
                    Ok(n) => {
                        self.pos += n as i64;
                        self.bytes_read += n as u64;
                        delivered += n;
                        self.eof_reached = false;
                    }
                    Err(e) => {
                        self.error = true;
                        if delivered == 0 {
                            return Err(e);
                        }
                        break;
                    }
                }
            } else {
                match self.fill_buffer() {
                    Ok(()) => {
                        if self.buf_ptr >= self.buf_end {
                            break;
                        }
                    }
                    Err(e) => {
                        if delivered == 0 {
                            return Err(e);
                        }
                        break;
                    }
                }
            }
        }

        if delivered == 0 {
            if self.error {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "buffered stream latched error",
                )));
            }
            if self.eof_reached {
                return Err(Error::Eof);
            }
        }
        Ok(delivered)
    }

    /// Returns whatever is immediately available after at most one
    /// [`fill_buffer`] call (possibly 0, only to surface EOF/error).
    pub fn read_partial(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.buf_ptr >= self.buf_end {
            self.fill_buffer()?;
        }
        let avail = self.buf_end.saturating_sub(self.buf_ptr);
        let n = avail.min(buf.len());
        buf[..n].copy_from_slice(&self.buffer[self.buf_ptr..self.buf_ptr + n]);
        self.buf_ptr += n;
        Ok(n)
    }

    /// Reads bytes until `\n` or NUL, storing up to `buf.len() - 1` bytes
    /// and always NUL-terminating. Returns the number of bytes stored
    /// (excluding the terminator).
    pub fn get_line(&mut self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut written = 0;
        loop {
            let b = self.r8();
            if b == 0 || (self.buf_ptr >= self.buf_end && self.eof_reached && b == 0) {
                break;
            }
            if written < buf.len() - 1 {
                buf[written] = b;
                written += 1;
            }
            if b == b'\n' {
                break;
            }
            if self.eof_reached && self.buf_ptr >= self.buf_end {
                break;
            }
        }
        buf[written] = 0;
        written
    }

    /// Reads exactly `max` bytes from the source (a NUL-terminated short
    /// string on the wire), writing up to `buf.len() - 1` of them into
    /// `buf` and always NUL-terminating.
    pub fn get_str(&mut self, max: usize, buf: &mut [u8]) -> usize {
        let cap = buf.len().saturating_sub(1);
        let mut written = 0;
        for _ in 0..max {
            let b = self.r8();
            if written < cap {
                buf[written] = b;
                written += 1;
            }
        }
        if !buf.is_empty() {
            buf[written] = 0;
        }
        written
    }

    fn get_str16(&mut self, max: usize, buf: &mut [u8], big_endian: bool) -> usize {
        let mut units = Vec::with_capacity(max / 2);
        let mut consumed = 0;
        while consumed < max {
            let unit = if big_endian { self.rb16() } else { self.rl16() };
            units.push(unit);
            consumed += 2;
        }
        let s = String::from_utf16_lossy(&units);
        let bytes = s.as_bytes();
        let cap = buf.len().saturating_sub(1);
        let n = bytes.len().min(cap);
        buf[..n].copy_from_slice(&bytes[..n]);
        if !buf.is_empty() {
            buf[n] = 0;
        }
        n
    }

    /// Transcodes exactly `max` bytes of little-endian UTF-16 to UTF-8.
    pub fn get_str16le(&mut self, max: usize, buf: &mut [u8]) -> usize {
        self.get_str16(max, buf, false)
    }

    /// Transcodes exactly `max` bytes of big-endian UTF-16 to UTF-8.
    pub fn get_str16be(&mut self, max: usize, buf: &mut [u8]) -> usize {
        self.get_str16(max, buf, true)
    }

    // ---- seek policy (§4.3.5) ----

    fn current_pos(&self) -> i64 {
        if self.write_flag {
            self.pos
        } else {
            self.pos - self.buf_end as i64
        }
    }

    /// Seeks to `pos` relative to `whence`, applying the in-buffer,
    /// short-forward-skip, and delegate-to-transport policies in that
    /// order (spec.md §4.3.5). `force` corresponds to the `FORCE` bit OR-ed
    /// onto a whence value in the source; it only affects whether
    /// [`Whence::End`] may still be resolved (see DESIGN.md).
    pub fn seek(&mut self, pos: i64, whence: Whence, force: bool) -> Result<i64> {
        if matches!(whence, Whence::End) {
            return self.seek_delegate(pos, Whence::End, force);
        }

        let current_pos = self.current_pos();
        let target = match whence {
            Whence::Set => pos,
            // `current_pos` is the absolute offset of `buffer[0]`; the
            // caller's actual cursor is `buf_ptr` bytes further in, whether
            // those are already-consumed read bytes or already-staged
            // unflushed write bytes.
            Whence::Cur => current_pos + self.buf_ptr as i64 + pos,
            Whence::End => unreachable!(),
            Whence::Size => return Err(Error::Invalid("Whence::Size is not a seek".into())),
        };

        let in_buffer_ok = if self.write_flag {
            target >= current_pos && target <= current_pos + self.buffer.len() as i64
        } else {
            target >= current_pos && target <= self.pos
        };

        if !self.must_flush && !(self.direct && self.seek_fn.is_some()) && in_buffer_ok {
            self.buf_ptr = (target - current_pos) as usize;
            self.eof_reached = false;
            return Ok(target);
        }

        if !self.write_flag
            && !self.direct
            && target > self.pos
            && (!self.seekable || target - self.pos <= SHORT_SEEK_THRESHOLD)
        {
            while self.pos < target {
                self.fill_buffer()?;
                if self.eof_reached {
                    return Err(Error::Eof);
                }
            }
            self.buf_ptr = self.buf_end - (self.pos - target) as usize;
            self.eof_reached = false;
            return Ok(target);
        }

        self.seek_delegate(target, Whence::Set, force)
    }

    fn seek_delegate(&mut self, pos: i64, whence: Whence, _force: bool) -> Result<i64> {
        if self.write_flag {
            self.flush_buffer()?;
            self.must_flush = false;
        }

        let Some(seek_fn) = &mut self.seek_fn else {
            return Err(Error::BrokenPipe);
        };

        let new_pos = seek_fn(pos, whence)?;
        self.seek_count += 1;
        self.resetbuf(self.write_flag);
        self.pos = new_pos;
        self.eof_reached = false;
        Ok(new_pos)
    }

    /// `seek(n, Whence::Cur, false)`.
    pub fn skip(&mut self, n: i64) -> Result<i64> {
        self.seek(n, Whence::Cur, false)
    }

    /// The stream's length: a direct `Whence::Size` query if the transport
    /// supports one, else seek-to-end-and-restore.
    pub fn size(&mut self) -> Result<i64> {
        if let Some(seek_fn) = &mut self.seek_fn {
            if let Ok(size) = seek_fn(0, Whence::Size) {
                return Ok(size);
            }
        }
        let current = self.seek(0, Whence::Cur, false)?;
        let end = self.seek_delegate(-1, Whence::End, false)?;
        self.seek(current, Whence::Set, false)?;
        Ok(end + 1)
    }

    /// If the last I/O latched EOF, clears it, attempts one refill, and
    /// reports the new state.
    pub fn feof(&mut self) -> bool {
        if self.eof_reached {
            self.eof_reached = false;
            let _ = self.fill_buffer();
        }
        self.eof_reached
    }

    /// Splices a provisional probe buffer's still-valid tail behind it so
    /// absolute offset 0 is restored (spec.md §4.3.6).
    pub fn rewind_with_probe_data(&mut self, probe: &[u8]) -> Result<()> {
        if self.write_flag {
            return Err(Error::Invalid("cannot rewind a write-mode stream".into()));
        }

        let buffer_start_pos = self.pos - self.buf_end as i64;
        if buffer_start_pos > probe.len() as i64 {
            return Err(Error::Invalid(
                "probe buffer does not overlap the current buffer window".into(),
            ));
        }

        let overlap = (probe.len() as i64 - buffer_start_pos).max(0) as usize;
        let tail = &self.buffer[overlap.min(self.buffer.len())..self.buf_end];

        let mut combined = Vec::with_capacity(probe.len() + tail.len());
        combined.extend_from_slice(probe);
        combined.extend_from_slice(tail);

        let new_len = combined.len();
        self.buffer = combined;
        self.buf_ptr = 0;
        self.buf_end = new_len;
        self.pos = new_len as i64;
        self.eof_reached = false;
        Ok(())
    }
}
