//! Readiness facility.
//!
//! [`Poller`] is the narrow interface the scheduler needs from the OS; [`EpollPoller`]
//! implements it with level-triggered Linux `epoll`.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use super::Ready;

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub fd: RawFd,
    pub ready: Ready,
}

#[cfg_attr(test, mockall::automock)]
pub trait Poller {
    /// Starts watching `fd` for `interest`.
    fn add(&self, fd: RawFd, interest: Ready) -> io::Result<()>;

    /// Replaces the interest of a watched `fd`.
    fn modify(&self, fd: RawFd, interest: Ready) -> io::Result<()>;

    /// Stops watching `fd`. A descriptor the OS no longer knows is not an error.
    fn delete(&self, fd: RawFd) -> io::Result<()>;

    /// Blocks up to `timeout` (forever when `None`) and replaces the content of
    /// `events` with at most `max_events` notifications. Returns how many arrived.
    fn wait(&mut self, events: &mut Vec<Event>, max_events: usize, timeout: Option<Duration>) -> io::Result<usize>;
}

pub struct EpollPoller {
    epoll: OwnedFd,
    buffer: Vec<libc::epoll_event>,
}

impl fmt::Debug for EpollPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EpollPoller").field("epoll", &self.epoll).finish_non_exhaustive()
    }
}

impl EpollPoller {
    pub fn new() -> io::Result<Self> {
        // SAFETY: epoll_create1 takes no pointers.
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        // SAFETY: `fd` was just created and nothing else owns it.
        let epoll = unsafe { OwnedFd::from_raw_fd(fd) };
        Ok(Self { epoll, buffer: Vec::new() })
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, interest: Ready) -> io::Result<()> {
        let mut event = libc::epoll_event { events: interest.bits(), u64: fd as u64 };

        // SAFETY: `event` outlives the call and the epoll descriptor is open.
        let ret = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsRawFd for EpollPoller {
    fn as_raw_fd(&self) -> RawFd {
        self.epoll.as_raw_fd()
    }
}

impl Poller for EpollPoller {
    fn add(&self, fd: RawFd, interest: Ready) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, interest)
    }

    fn modify(&self, fd: RawFd, interest: Ready) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, interest)
    }

    fn delete(&self, fd: RawFd) -> io::Result<()> {
        match self.ctl(libc::EPOLL_CTL_DEL, fd, Ready::EMPTY) {
            Err(e) if matches!(e.raw_os_error(), Some(libc::ENOENT | libc::EBADF)) => Ok(()),
            result => result,
        }
    }

    fn wait(&mut self, events: &mut Vec<Event>, max_events: usize, timeout: Option<Duration>) -> io::Result<usize> {
        let capacity = max_events.clamp(1, libc::c_int::MAX as usize);
        self.buffer.resize(capacity, libc::epoll_event { events: 0, u64: 0 });

        let timeout_ms = match timeout {
            // round up so a sub-millisecond timeout does not become a busy poll
            Some(timeout) => libc::c_int::try_from(timeout.as_micros().div_ceil(1000)).unwrap_or(libc::c_int::MAX),
            None => -1,
        };

        // SAFETY: the buffer holds `capacity` initialized entries the kernel may overwrite.
        let n = unsafe { libc::epoll_wait(self.epoll.as_raw_fd(), self.buffer.as_mut_ptr(), capacity as libc::c_int, timeout_ms) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }

        events.clear();
        for raw in &self.buffer[..n as usize] {
            let raw = *raw;
            events.push(Event { fd: raw.u64 as RawFd, ready: Ready::from_bits(raw.events) });
        }
        Ok(events.len())
    }
}
