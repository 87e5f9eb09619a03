use std::fmt;
use std::io;
use thiserror::Error;

/// Handle of a timer wheel registered with [`Scheduler::add_timer`](super::Scheduler::add_timer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) usize);

impl TimerId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Handle of a task owned by the scheduler.
///
/// The generation changes every time a slot is reused, so a handle left behind in
/// a timer wheel never resumes the task that took the slot later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}.{}", self.index, self.generation)
    }
}

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("deadline of {timer} expired")]
    Timeout { timer: TimerId },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl TaskError {
    pub fn timeout(&self) -> Option<TimerId> {
        match self {
            Self::Timeout { timer } => Some(*timer),
            Self::Io { .. } => None,
        }
    }
}
