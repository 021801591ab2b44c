use std::io::ErrorKind;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Arc;

use crate::readiness::{Interest, Readiness, ReadinessKind, Ready};
use crate::waker::Waker;

/// Event-driven readiness: blocks in `poll(2)` with no timeout.
///
/// The socket and the waker's read end are watched together, so a thread
/// that enqueues bytes or closes the connection can cut the wait short.
pub struct EventReadiness {
    fd: RawFd,
    waker: Arc<Waker>,
    interest: Interest,
}

impl EventReadiness {
    pub fn new(fd: RawFd, waker: Arc<Waker>) -> Self {
        Self {
            fd,
            waker,
            interest: Interest::READABLE,
        }
    }
}

impl Readiness for EventReadiness {
    fn register_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }

    fn wait(&mut self) -> std::io::Result<Ready> {
        let mut events = libc::POLLIN;
        if self.interest.writable {
            events |= libc::POLLOUT;
        }

        let mut fds = [
            libc::pollfd {
                fd: self.fd,
                events,
                revents: 0,
            },
            libc::pollfd {
                fd: self.waker.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];

        // SAFETY: `fds` is a valid, writable array of `fds.len()` pollfd entries
        // that outlives the call.
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(Ready::default());
            }
            return Err(err);
        }

        let socket = fds[0].revents;
        if socket & libc::POLLNVAL != 0 {
            return Err(std::io::Error::from_raw_os_error(libc::EBADF));
        }

        let woken = fds[1].revents & libc::POLLIN != 0;
        if woken {
            self.waker.drain()?;
        }

        Ok(Ready {
            // Hangups and errors surface through the next read call.
            readable: socket & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
            writable: self.interest.writable && socket & libc::POLLOUT != 0,
            woken,
            timed_out: false,
        })
    }

    fn kind(&self) -> ReadinessKind {
        ReadinessKind::Event
    }
}
