//! Buffered Stream over a URL Context (C5): wires a [`UrlContext`] in as the
//! byte source/sink of a [`BufferedStream`].

use std::sync::{Arc, Mutex};

use crate::buffered::{BufferedStream, DEFAULT_BUFFER_SIZE};
use crate::error::Result;
use crate::protocol::{OpenFlags, Whence};
use crate::url::UrlContext;

/// Wraps `ctx` in a [`BufferedStream`], sized by the transport's
/// `max_packet_size` (or [`DEFAULT_BUFFER_SIZE`] for stream transports), and
/// propagating `direct` and seekability (spec.md §4.4).
pub fn buffer_url(ctx: UrlContext, direct: bool) -> BufferedStream {
    let write_flag = ctx.flags().contains(OpenFlags::WRITE);
    let capacity = if ctx.max_packet_size() > 0 {
        ctx.max_packet_size() as usize
    } else {
        DEFAULT_BUFFER_SIZE
    };

    let seekable = !ctx.is_streamed();
    let max_packet_size = ctx.max_packet_size();
    let ctx = Arc::new(Mutex::new(ctx));

    let read_ctx = ctx.clone();
    let write_ctx = ctx.clone();
    let seek_ctx = ctx.clone();
    let pause_ctx = ctx.clone();
    let seek_ts_ctx = ctx;

    let mut stream = BufferedStream::new(capacity, write_flag)
        .with_read_packet(move |buf| read_ctx.lock().unwrap().read(buf))
        .with_write_packet(move |buf| write_ctx.lock().unwrap().write(buf).map(|_| ()))
        .with_seek(move |pos, whence| seek_ctx.lock().unwrap().seek_or_size(pos, whence))
        .with_read_pause(move |pause| pause_ctx.lock().unwrap().read_pause(pause))
        .with_read_seek(move |ts, flags| seek_ts_ctx.lock().unwrap().read_seek(ts, flags));

    stream.set_direct(direct);
    stream.set_seekable(seekable);
    stream.set_max_packet_size(max_packet_size);
    stream
}

impl UrlContext {
    /// A single entry point for both an ordinary seek and the `Whence::Size`
    /// query, so the adapter's seek callback can stay one closure.
    fn seek_or_size(&mut self, pos: i64, whence: Whence) -> Result<i64> {
        if matches!(whence, Whence::Size) {
            self.size()
        } else {
            self.seek(pos, whence)
        }
    }
}
