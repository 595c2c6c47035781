//! The `file` transport: a thin wrapper over [`std::fs::File`].

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::{Error, Result};
use crate::protocol::{OpenFlags, Options, Protocol, ShutdownFlags, Whence};

pub(crate) struct FileProtocol {
    file: File,
}

/// Strips a `file://` prefix, if present, leaving a plain filesystem path
/// (spec.md §4.2.1's DOS-path and bare-path cases are both forced to this
/// scheme before the filename ever reaches here).
fn path_of(filename: &str) -> &str {
    filename.strip_prefix("file://").unwrap_or(filename)
}

pub(crate) fn open(filename: &str, flags: OpenFlags, _options: &Options) -> Result<Box<dyn Protocol>> {
    let path = path_of(filename);
    let mut opts = OpenOptions::new();
    opts.read(flags.contains(OpenFlags::READ));
    opts.write(flags.contains(OpenFlags::WRITE));
    if flags.contains(OpenFlags::WRITE) {
        opts.create(true);
        if !flags.contains(OpenFlags::READ) {
            opts.truncate(true);
        }
    }

    let file = opts.open(path).map_err(Error::from_io)?;
    Ok(Box::new(FileProtocol { file }))
}

impl Protocol for FileProtocol {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.file.read(buf).map_err(Error::from_io)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.file.write(buf).map_err(Error::from_io)
    }

    fn seek(&mut self, pos: i64, whence: Whence) -> Result<i64> {
        let from = match whence {
            Whence::Set => SeekFrom::Start(pos.max(0) as u64),
            Whence::Cur => SeekFrom::Current(pos),
            Whence::End => SeekFrom::End(pos),
            Whence::Size => {
                let current = self.file.stream_position().map_err(Error::from_io)?;
                let size = self.file.metadata().map_err(Error::from_io)?.len();
                self.file
                    .seek(SeekFrom::Start(current))
                    .map_err(Error::from_io)?;
                return Ok(size as i64);
            }
        };
        self.file.seek(from).map(|p| p as i64).map_err(Error::from_io)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn file_handle(&self) -> Option<std::os::unix::io::RawFd> {
        use std::os::unix::io::AsRawFd;
        Some(self.file.as_raw_fd())
    }

    fn shutdown(&mut self, _flags: ShutdownFlags) -> Result<()> {
        Err(Error::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roundtrip.bin");
        std::fs::File::create(&path).unwrap().write_all(b"abcdef").unwrap();

        let url = format!("file://{}", path.display());
        let mut proto = open(&url, OpenFlags::READ, &Options::new()).unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(proto.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf, b"abc");

        assert_eq!(proto.seek(0, Whence::Set).unwrap(), 0);
        let mut all = [0u8; 6];
        assert_eq!(proto.read(&mut all).unwrap(), 6);
        assert_eq!(&all, b"abcdef");
    }

    #[test]
    fn write_creates_and_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let url = format!("file://{}", path.display());

        let mut proto = open(&url, OpenFlags::WRITE, &Options::new()).unwrap();
        proto.write(b"hello").unwrap();
        drop(proto);

        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }
}
