use std::io::ErrorKind;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::error::{Result, TransportError};
use crate::readiness::{Interest, Readiness, ReadinessKind, Ready};

/// Fallback readiness: `select(2)` with a fixed wake interval.
///
/// There is no waker; newly queued bytes and close requests are noticed at
/// the next interval at the latest.
pub struct TimedReadiness {
    fd: RawFd,
    interval: Duration,
    interest: Interest,
}

impl TimedReadiness {
    pub fn new(fd: RawFd, interval: Duration) -> Result<Self> {
        if fd < 0 || fd as usize >= libc::FD_SETSIZE as usize {
            return Err(TransportError::DescriptorOutOfRange {
                fd,
                max: libc::FD_SETSIZE as usize,
            });
        }
        Ok(Self {
            fd,
            interval,
            interest: Interest::READABLE,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Readiness for TimedReadiness {
    fn register_interest(&mut self, interest: Interest) {
        self.interest = interest;
    }

    fn wait(&mut self) -> std::io::Result<Ready> {
        // SAFETY: fd_set is plain old data; FD_ZERO initialises it below.
        let mut read_set: libc::fd_set = unsafe { std::mem::zeroed() };
        let mut write_set: libc::fd_set = unsafe { std::mem::zeroed() };

        // SAFETY: both sets are valid and `self.fd` is below FD_SETSIZE (checked in `new`).
        unsafe {
            libc::FD_ZERO(&mut read_set);
            libc::FD_ZERO(&mut write_set);
            libc::FD_SET(self.fd, &mut read_set);
            if self.interest.writable {
                libc::FD_SET(self.fd, &mut write_set);
            }
        }

        let mut timeout = libc::timeval {
            tv_sec: self.interval.as_secs() as libc::time_t,
            tv_usec: self.interval.subsec_micros() as libc::suseconds_t,
        };
        let write_ptr = if self.interest.writable {
            &mut write_set as *mut libc::fd_set
        } else {
            std::ptr::null_mut()
        };

        // SAFETY: every pointer is either null or points to a live local.
        let rc = unsafe {
            libc::select(
                self.fd + 1,
                &mut read_set,
                write_ptr,
                std::ptr::null_mut(),
                &mut timeout,
            )
        };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == ErrorKind::Interrupted {
                return Ok(Ready::default());
            }
            return Err(err);
        }
        if rc == 0 {
            return Ok(Ready {
                timed_out: true,
                ..Ready::default()
            });
        }

        // SAFETY: the sets were filled in by select above.
        let (readable, writable) = unsafe {
            (
                libc::FD_ISSET(self.fd, &read_set),
                self.interest.writable && libc::FD_ISSET(self.fd, &write_set),
            )
        };

        Ok(Ready {
            readable,
            writable,
            woken: false,
            timed_out: false,
        })
    }

    fn kind(&self) -> ReadinessKind {
        ReadinessKind::Timed
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::time::Instant;

    use super::*;

    #[test]
    fn idle_socket_times_out() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut readiness = TimedReadiness::new(left.as_raw_fd(), Duration::from_millis(20)).unwrap();

        let started = Instant::now();
        let ready = readiness.wait().unwrap();

        assert!(ready.timed_out);
        assert!(!ready.readable);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn reports_readable_before_interval() {
        let (left, mut right) = UnixStream::pair().unwrap();
        let mut readiness = TimedReadiness::new(left.as_raw_fd(), Duration::from_secs(10)).unwrap();

        right.write_all(b"x").unwrap();
        let started = Instant::now();
        let ready = readiness.wait().unwrap();

        assert!(ready.readable);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn reports_writable_when_asked() {
        let (left, _right) = UnixStream::pair().unwrap();
        let mut readiness = TimedReadiness::new(left.as_raw_fd(), Duration::from_secs(10)).unwrap();

        readiness.register_interest(Interest::READ_WRITE);
        let ready = readiness.wait().unwrap();
        assert!(ready.writable);
    }

    #[test]
    fn rejects_descriptor_beyond_fd_setsize() {
        let result = TimedReadiness::new(libc::FD_SETSIZE as RawFd, Duration::from_millis(1));
        assert!(matches!(
            result,
            Err(TransportError::DescriptorOutOfRange { .. })
        ));
    }
}
