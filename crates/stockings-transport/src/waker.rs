use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// Self-pipe used to interrupt a blocked [`crate::EventReadiness`].
///
/// Wakes coalesce: any number of [`Waker::wake`] calls before the next
/// [`Waker::drain`] produce a single wakeup.
#[derive(Debug)]
pub struct Waker {
    tx: UnixStream,
    rx: UnixStream,
}

impl Waker {
    pub fn new() -> std::io::Result<Self> {
        let (tx, rx) = UnixStream::pair()?;
        tx.set_nonblocking(true)?;
        rx.set_nonblocking(true)?;
        Ok(Self { tx, rx })
    }

    /// Make the read end readable.
    pub fn wake(&self) -> std::io::Result<()> {
        loop {
            match (&self.tx).write(&[1]) {
                Ok(_) => return Ok(()),
                // Full pipe: a wakeup is already pending.
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Consume every pending wakeup.
    pub fn drain(&self) -> std::io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.rx).read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl AsRawFd for Waker {
    fn as_raw_fd(&self) -> RawFd {
        self.rx.as_raw_fd()
    }
}
