//! A non-blocking `tcp` transport, built on [`mio::net::TcpStream`].
//!
//! The original's `tcp.c` is summarized out of spec.md's scope list, but
//! the retry/timeout machinery in §4.2.4 has nothing to exercise without at
//! least one transport that can actually return `WouldBlock` (spec.md §10,
//! point 2). This mirrors the way the teacher crate reaches for
//! `mio::net::UnixStream` for its own socket.

use std::io::{Read, Write};
use std::net::{Shutdown, ToSocketAddrs};

use mio::net::TcpStream as MioTcpStream;

use crate::error::{Error, Result};
use crate::protocol::{OpenFlags, Options, Protocol, ShutdownFlags, Whence};

pub(crate) struct TcpProtocol {
    stream: MioTcpStream,
}

/// Extracts `host:port` from a `tcp://host:port` or (post embedded-option
/// excision) `tcp,host:port` filename.
fn host_port(filename: &str) -> Result<&str> {
    filename
        .strip_prefix("tcp://")
        .or_else(|| filename.strip_prefix("tcp,"))
        .map(|rest| rest.trim_end_matches('/'))
        .ok_or_else(|| Error::Invalid(format!("malformed tcp URL {filename:?}")))
}

pub(crate) fn open(filename: &str, _flags: OpenFlags, _options: &Options) -> Result<Box<dyn Protocol>> {
    let addr_str = host_port(filename)?;
    let addr = addr_str
        .to_socket_addrs()
        .map_err(Error::from_io)?
        .next()
        .ok_or_else(|| Error::Invalid(format!("could not resolve {addr_str:?}")))?;

    log::debug!("connecting to {addr}");
    let std_stream = std::net::TcpStream::connect(addr).map_err(Error::from_io)?;
    std_stream.set_nonblocking(true).map_err(Error::from_io)?;

    Ok(Box::new(TcpProtocol {
        stream: MioTcpStream::from_std(std_stream),
    }))
}

impl Protocol for TcpProtocol {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from_io)
    }

    fn close(&mut self) -> Result<()> {
        let _ = self.stream.shutdown(Shutdown::Both);
        Ok(())
    }

    fn shutdown(&mut self, flags: ShutdownFlags) -> Result<()> {
        let how = match (
            flags.contains(ShutdownFlags::READ),
            flags.contains(ShutdownFlags::WRITE),
        ) {
            (true, true) => Shutdown::Both,
            (true, false) => Shutdown::Read,
            (false, true) => Shutdown::Write,
            (false, false) => return Ok(()),
        };
        self.stream.shutdown(how).map_err(Error::from_io)
    }

    fn seek(&mut self, _pos: i64, _whence: Whence) -> Result<i64> {
        Err(Error::Unsupported)
    }

    #[cfg(unix)]
    fn file_handle(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        Some(self.stream.as_raw_fd())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read as _;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn round_trips_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).unwrap();
            assert_eq!(&buf, b"hello");
            sock.write_all(b"world").unwrap();
        });

        let url = format!("tcp://{addr}");
        let mut proto = open(&url, OpenFlags::READ_WRITE, &Options::new()).unwrap();

        // The socket is non-blocking; a freshly connected loopback pair is
        // usually writable immediately, but retry on WouldBlock regardless.
        loop {
            match proto.write(b"hello") {
                Ok(_) => break,
                Err(Error::WouldBlock) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        let mut got = Vec::new();
        while got.len() < 5 {
            let mut chunk = [0u8; 5];
            match proto.read(&mut chunk) {
                Ok(n) => got.extend_from_slice(&chunk[..n]),
                Err(Error::WouldBlock) => continue,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(got, b"world");

        server.join().unwrap();
    }
}
