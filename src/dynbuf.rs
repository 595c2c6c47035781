//! Dynamic Buffer (C6): an in-memory sink that grows on demand, in either a
//! continuous or a length-prefixed packetised form.

use byteorder::{BigEndian, WriteBytesExt};

use crate::buffered::{BufferedStream, INPUT_BUFFER_PADDING_SIZE};
use crate::error::{Error, Result};
use crate::protocol::Whence;

/// Initial allocation for a dynamic buffer, chosen to avoid a string of
/// reallocations for small outputs.
const INITIAL_CAPACITY: usize = 1024;

/// An upper bound matching the source's `INT_MAX / 2` growth-overflow guard.
const MAX_CAPACITY: i64 = (i32::MAX as i64) / 2;

struct DynBuf {
    data: Vec<u8>,
    /// High-water mark: the largest offset ever written, independent of the
    /// current seek position (spec.md §4.5).
    size: usize,
}

fn next_capacity(current: usize, needed: usize) -> Result<usize> {
    let grown = current + current / 2 + 1;
    let target = grown.max(needed);
    if target as i64 > MAX_CAPACITY {
        return Err(Error::OutOfMemory);
    }
    Ok(target)
}

/// A dynamic buffer that owns both the [`BufferedStream`] front-end and the
/// byte storage behind it, so closing it can hand the bytes back directly
/// rather than reaching into an opaque closure (spec.md §4.5).
pub struct DynamicBuffer {
    stream: BufferedStream,
    data: std::sync::Arc<std::sync::Mutex<DynBuf>>,
}

impl DynamicBuffer {
    /// Creates a continuous, seekable dynamic buffer.
    pub fn new() -> Self {
        use std::sync::{Arc, Mutex};

        let data = Arc::new(Mutex::new(DynBuf {
            data: Vec::with_capacity(INITIAL_CAPACITY),
            size: 0,
        }));

        let write_data = data.clone();
        let seek_data = data.clone();

        let stream = BufferedStream::new(INITIAL_CAPACITY, true)
            .with_write_packet(move |buf| {
                let mut s = write_data.lock().unwrap();
                let end = s.size;
                let needed = end + buf.len();
                if needed > s.data.len() {
                    let cap = next_capacity(s.data.len(), needed)?;
                    s.data.resize(cap, 0);
                }
                s.data[end..end + buf.len()].copy_from_slice(buf);
                s.size = s.size.max(needed);
                Ok(())
            })
            .with_seek(move |pos, whence| {
                let s = seek_data.lock().unwrap();
                let target = match whence {
                    Whence::Set => pos,
                    Whence::End => s.size as i64 + pos,
                    Whence::Size => return Ok(s.size as i64),
                    Whence::Cur => return Err(Error::Unsupported),
                };
                if !(0..=i32::MAX as i64).contains(&target) {
                    return Err(Error::Invalid("dynamic buffer seek out of range".into()));
                }
                Ok(target)
            });

        DynamicBuffer { stream, data }
    }

    /// The buffered front-end; write through this.
    pub fn stream(&mut self) -> &mut BufferedStream {
        &mut self.stream
    }

    /// Flushes any pending writes, appends padding, and returns the
    /// logical (unpadded) byte array.
    pub fn close(mut self) -> Result<Vec<u8>> {
        self.stream.flush()?;
        let mut s = self.data.lock().unwrap();
        s.data.truncate(s.size);
        s.data.resize(s.size + INPUT_BUFFER_PADDING_SIZE, 0);
        let size = s.size;
        let mut out = std::mem::take(&mut s.data);
        out.truncate(size + INPUT_BUFFER_PADDING_SIZE);
        Ok(out)
    }
}

impl Default for DynamicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A packetised dynamic buffer: each [`BufferedStream::write`] call that
/// reaches the transport is framed with a 4-byte big-endian length prefix,
/// and the stream is not seekable (spec.md §4.5).
pub struct PacketDynamicBuffer {
    stream: BufferedStream,
    data: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

impl PacketDynamicBuffer {
    /// Creates a packetised dynamic buffer.
    pub fn new() -> Self {
        use std::sync::{Arc, Mutex};

        let data: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::with_capacity(INITIAL_CAPACITY)));
        let write_data = data.clone();

        let mut stream = BufferedStream::new(INITIAL_CAPACITY, true).with_write_packet(move |buf| {
            let mut out = write_data.lock().unwrap();
            out.write_u32::<BigEndian>(buf.len() as u32)
                .expect("writes to a Vec<u8> never fail");
            out.extend_from_slice(buf);
            Ok(())
        });
        stream.set_seekable(false);
        // Not a real transport bound: this only tells write() to flush after
        // every call, so each write() is framed as its own packet regardless
        // of whether the caller remembers to flush.
        stream.set_max_packet_size(u32::MAX);

        PacketDynamicBuffer { stream, data }
    }

    /// The buffered front-end; write through this.
    pub fn stream(&mut self) -> &mut BufferedStream {
        &mut self.stream
    }

    /// Flushes any pending writes and returns the framed byte array.
    pub fn close(mut self) -> Result<Vec<u8>> {
        self.stream.flush()?;
        Ok(std::mem::take(&mut self.data.lock().unwrap()))
    }
}

impl Default for PacketDynamicBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuous_buffer_grows_and_supports_patch_seek() {
        let mut dyn_buf = DynamicBuffer::new();
        dyn_buf.stream().write(b"hello world").unwrap();
        dyn_buf.stream().seek(0, Whence::Set, false).unwrap();
        dyn_buf.stream().write(b"HELLO").unwrap();
        let bytes = dyn_buf.close().unwrap();
        assert_eq!(&bytes[..11], b"HELLO world");
    }

    #[test]
    fn continuous_buffer_close_pads_and_reports_logical_size() {
        let mut dyn_buf = DynamicBuffer::new();
        dyn_buf.stream().write(b"abc").unwrap();
        let bytes = dyn_buf.close().unwrap();
        assert_eq!(bytes.len(), 3 + INPUT_BUFFER_PADDING_SIZE);
        assert_eq!(&bytes[..3], b"abc");
        assert!(bytes[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn packetised_buffer_frames_each_write_without_manual_flush() {
        let mut dyn_buf = PacketDynamicBuffer::new();
        dyn_buf.stream().write(b"one").unwrap();
        dyn_buf.stream().write(b"two").unwrap();
        let bytes = dyn_buf.close().unwrap();

        let mut expected = Vec::new();
        expected.extend_from_slice(&3u32.to_be_bytes());
        expected.extend_from_slice(b"one");
        expected.extend_from_slice(&3u32.to_be_bytes());
        expected.extend_from_slice(b"two");
        assert_eq!(bytes, expected);
    }
}
