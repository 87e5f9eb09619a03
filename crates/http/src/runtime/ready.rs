use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Not};

/// Set of readiness kinds, in epoll's bit layout.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Ready(u32);

impl Ready {
    pub const EMPTY: Ready = Ready(0);
    pub const READABLE: Ready = Ready(libc::EPOLLIN as u32);
    pub const WRITABLE: Ready = Ready(libc::EPOLLOUT as u32);
    pub const ERROR: Ready = Ready(libc::EPOLLERR as u32);
    pub const HANGUP: Ready = Ready(libc::EPOLLHUP as u32);
    pub const READ_HANGUP: Ready = Ready(libc::EPOLLRDHUP as u32);

    /// Conditions that end a connection rather than make progress possible.
    pub const ERRORS: Ready = Ready(Self::ERROR.0 | Self::HANGUP.0 | Self::READ_HANGUP.0);

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Ready(bits)
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn contains(self, other: Ready) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn intersects(self, other: Ready) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Ready {
    type Output = Ready;

    fn bitor(self, rhs: Ready) -> Ready {
        Ready(self.0 | rhs.0)
    }
}

impl BitOrAssign for Ready {
    fn bitor_assign(&mut self, rhs: Ready) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Ready {
    type Output = Ready;

    fn bitand(self, rhs: Ready) -> Ready {
        Ready(self.0 & rhs.0)
    }
}

impl Not for Ready {
    type Output = Ready;

    fn not(self) -> Ready {
        Ready(!self.0)
    }
}

impl fmt::Debug for Ready {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Ready, &str); 5] = [
            (Ready::READABLE, "READABLE"),
            (Ready::WRITABLE, "WRITABLE"),
            (Ready::ERROR, "ERROR"),
            (Ready::HANGUP, "HANGUP"),
            (Ready::READ_HANGUP, "READ_HANGUP"),
        ];

        let mut list = f.debug_set();
        for (flag, name) in NAMES {
            if self.contains(flag) {
                list.entry(&format_args!("{name}"));
            }
        }
        list.finish()
    }
}

/// Desired readiness of one descriptor, tracked as the value last handed to the
/// OS plus a pending delta.
///
/// Tasks change their interest freely while running; the scheduler applies the
/// delta once the task yields, and only when it is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    applied: Ready,
    changes: Ready,
}

impl Interest {
    /// Interest already registered with the OS as `applied`.
    pub fn new(applied: Ready) -> Self {
        Self { applied, changes: Ready::EMPTY }
    }

    /// The interest the task currently wants.
    #[inline]
    pub fn current(&self) -> Ready {
        Ready(self.applied.0 ^ self.changes.0)
    }

    #[inline]
    pub fn applied(&self) -> Ready {
        self.applied
    }

    /// Bits that differ from what the OS has.
    #[inline]
    pub fn changes(&self) -> Ready {
        self.changes
    }

    pub fn set(&mut self, ready: Ready) {
        self.changes = Ready(ready.0 ^ self.applied.0);
    }

    pub fn enable(&mut self, ready: Ready) {
        self.set(self.current() | ready);
    }

    pub fn disable(&mut self, ready: Ready) {
        self.set(self.current() & !ready);
    }

    /// Folds the pending delta into the applied value. Returns the new value when
    /// the OS registration must change.
    pub fn sync(&mut self) -> Option<Ready> {
        if self.changes.is_empty() {
            return None;
        }
        self.applied = Ready(self.applied.0 ^ self.changes.0);
        self.changes = Ready::EMPTY;
        Some(self.applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_tracks_difference_from_applied() {
        let mut interest = Interest::new(Ready::READABLE | Ready::ERRORS);

        interest.enable(Ready::WRITABLE);
        assert_eq!(interest.changes(), Ready::WRITABLE);
        assert_eq!(interest.current(), Ready::READABLE | Ready::WRITABLE | Ready::ERRORS);

        interest.disable(Ready::WRITABLE);
        assert!(interest.changes().is_empty());
        assert_eq!(interest.sync(), None);
    }

    #[test]
    fn sync_applies_once() {
        let mut interest = Interest::new(Ready::READABLE);

        interest.set(Ready::WRITABLE | Ready::HANGUP);
        assert_eq!(interest.sync(), Some(Ready::WRITABLE | Ready::HANGUP));
        assert_eq!(interest.applied(), Ready::WRITABLE | Ready::HANGUP);
        assert_eq!(interest.sync(), None);
    }

    #[test]
    fn disabling_unset_bits_is_a_no_op() {
        let mut interest = Interest::new(Ready::READABLE);
        interest.disable(Ready::ERRORS);
        assert_eq!(interest.sync(), None);
    }

    #[test]
    fn set_operations() {
        let ready = Ready::READABLE | Ready::HANGUP;
        assert!(ready.contains(Ready::READABLE));
        assert!(!ready.contains(Ready::READABLE | Ready::WRITABLE));
        assert!(ready.intersects(Ready::ERRORS));
        assert_eq!(ready & Ready::ERRORS, Ready::HANGUP);
        assert_eq!(format!("{ready:?}"), "{READABLE, HANGUP}");
    }
}
