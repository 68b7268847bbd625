//! Parent↔child self-pipe used to ship `execve` failures back across
//! `fork`. Grounded in
//! `samply/src/linux/process.rs`'s resume/execerr pipe pair, which uses
//! the identical `nix::unistd::pipe2(O_CLOEXEC)` + read/write shape.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use crate::error::{Error, Result};

/// A unidirectional pipe, optionally marked close-on-exec so the write end
/// doesn't leak into an `execve`d child unless explicitly released.
pub struct Pipe {
    read: Option<OwnedFd>,
    write: Option<OwnedFd>,
}

impl Pipe {
    pub fn new(close_on_exec: bool) -> Result<Self> {
        let flags = if close_on_exec {
            nix::fcntl::OFlag::O_CLOEXEC
        } else {
            nix::fcntl::OFlag::empty()
        };
        let (read, write) = nix::unistd::pipe2(flags).map_err(|_| Error::os("pipe2"))?;
        Ok(Pipe {
            read: Some(read),
            write: Some(write),
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.read.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    pub fn write_fd(&self) -> RawFd {
        self.write.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    /// Hands ownership of the read end to the caller, who is now
    /// responsible for closing it.
    pub fn release_read(&mut self) -> Option<OwnedFd> {
        self.read.take()
    }

    pub fn release_write(&mut self) -> Option<OwnedFd> {
        self.write.take()
    }

    pub fn close_read(&mut self) {
        self.read = None;
    }

    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// Reads whatever is currently available, up to a 1KiB chunk — enough
    /// for the short error messages this pipe is used to carry.
    pub fn read(&self) -> Result<Vec<u8>> {
        let fd = self.read.as_ref().expect("pipe read end already released");
        let mut buf = [0u8; 1024];
        let n = nix::unistd::read(fd.as_raw_fd(), &mut buf).map_err(|_| Error::os("read(pipe)"))?;
        Ok(buf[..n].to_vec())
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        let fd = self.write.as_ref().expect("pipe write end already released");
        nix::unistd::write(fd, bytes).map_err(|_| Error::os("write(pipe)"))?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_bytes() {
        let pipe = Pipe::new(true).unwrap();
        pipe.write(b"hello").unwrap();
        let got = pipe.read().unwrap();
        assert_eq!(&got, b"hello");
    }
}
