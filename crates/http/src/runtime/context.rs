//! The task side of the runtime.
//!
//! Every task body receives a [`TaskContext`]. Its I/O wrappers look blocking to the
//! body: on would-block they record the wanted readiness and suspend until the
//! scheduler resumes the task with a [`Wake`].

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::LocalBoxFuture;

use super::{Interest, Ready, TaskError, TaskId, TimerId};
use crate::coroutine::Suspender;

/// Value a suspended task is resumed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The descriptor became ready; error bits seen on earlier wake-ups are included.
    Io(Ready),
    /// An armed deadline on this wheel expired.
    Timer(TimerId),
}

/// Value a task suspends with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Yield {
    /// Waiting for readiness or a deadline.
    Blocked,
    /// Finished; the scheduler tears the task down.
    Exit,
}

/// Per-task bookkeeping shared by the scheduler and the task's context.
#[derive(Debug)]
pub(crate) struct TaskState {
    pub(crate) fd: RawFd,
    /// Interest the descriptor is registered with when the task is not waiting.
    pub(crate) base: Ready,
    pub(crate) interest: Cell<Interest>,
    /// Bits of the last readiness event.
    pub(crate) ready: Cell<Ready>,
    /// Error and hangup bits seen so far. Never cleared.
    pub(crate) errors: Cell<Ready>,
}

impl TaskState {
    pub(crate) fn new(fd: RawFd, base: Ready) -> Self {
        Self {
            fd,
            base,
            interest: Cell::new(Interest::new(base)),
            ready: Cell::new(Ready::EMPTY),
            errors: Cell::new(Ready::EMPTY),
        }
    }

    fn set_interest(&self, ready: Ready) {
        let mut interest = self.interest.get();
        interest.set(ready);
        self.interest.set(interest);
    }
}

pub(crate) type TaskEntry = Box<dyn FnOnce(TaskContext) -> LocalBoxFuture<'static, ()>>;

/// Requests a task leaves for the scheduler. They are applied right after the task yields.
pub(crate) enum Command {
    Spawn { fd: RawFd, interest: Ready, entry: TaskEntry },
    SetTimer { timer: TimerId, task: TaskId, delay: Duration },
    ClearTimer { timer: TimerId, task: TaskId },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Spawn { fd, interest, .. } => {
                f.debug_struct("Spawn").field("fd", fd).field("interest", interest).finish_non_exhaustive()
            }
            Command::SetTimer { timer, task, delay } => {
                f.debug_struct("SetTimer").field("timer", timer).field("task", task).field("delay", delay).finish()
            }
            Command::ClearTimer { timer, task } => {
                f.debug_struct("ClearTimer").field("timer", timer).field("task", task).finish()
            }
        }
    }
}

pub(crate) type Commands = Rc<RefCell<VecDeque<Command>>>;

pub(crate) fn boxed_entry<F, Fut>(entry: F) -> TaskEntry
where
    F: FnOnce(TaskContext) -> Fut + 'static,
    Fut: Future<Output = ()> + 'static,
{
    Box::new(move |ctx| entry(ctx).boxed_local())
}

/// Handle a task body uses to do I/O, arm deadlines and spawn other tasks.
pub struct TaskContext {
    id: TaskId,
    state: Rc<TaskState>,
    suspender: Suspender<Wake, Yield>,
    commands: Commands,
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext").field("id", &self.id).field("fd", &self.state.fd).finish_non_exhaustive()
    }
}

impl TaskContext {
    pub(crate) fn new(id: TaskId, state: Rc<TaskState>, suspender: Suspender<Wake, Yield>, commands: Commands) -> Self {
        Self { id, state, suspender, commands }
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Descriptor this task was registered with.
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.state.fd
    }

    /// Readiness bits of the last wake-up, error bits from earlier wake-ups included.
    #[inline]
    pub fn ready(&self) -> Ready {
        self.state.ready.get()
    }

    /// Every error or hangup bit reported for the descriptor so far.
    #[inline]
    pub fn errors(&self) -> Ready {
        self.state.errors.get()
    }

    /// Suspends until the descriptor reports `wanted` (or an error condition not seen
    /// before), or until one of the task's deadlines expires.
    ///
    /// The returned bits carry every error and hangup bit seen so far, not only
    /// those of the event that woke the task.
    pub async fn wait(&self, wanted: Ready) -> Result<Ready, TaskError> {
        self.state.set_interest(wanted | (Ready::ERRORS & !self.state.errors.get()));
        let wake = self.suspender.suspend(Yield::Blocked).await;
        self.state.set_interest(self.state.base);

        match wake {
            Wake::Io(ready) => Ok(ready),
            Wake::Timer(timer) => Err(TaskError::Timeout { timer }),
        }
    }

    /// Reads into `buf`, suspending while the source would block.
    ///
    /// `Ok(0)` means end of stream.
    pub async fn read<R: Read + ?Sized>(&self, io: &mut R, buf: &mut [u8]) -> Result<usize, TaskError> {
        loop {
            match io.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.wait(Ready::READABLE).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Writes part of `buf`, suspending while the sink would block.
    pub async fn write<W: Write + ?Sized>(&self, io: &mut W, buf: &[u8]) -> Result<usize, TaskError> {
        loop {
            match io.write(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.wait(Ready::WRITABLE).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn write_all<W: Write + ?Sized>(&self, io: &mut W, mut buf: &[u8]) -> Result<(), TaskError> {
        while !buf.is_empty() {
            match self.write(io, buf).await? {
                0 => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                n => buf = &buf[n..],
            }
        }
        Ok(())
    }

    /// Accepts one connection. The returned stream is already non-blocking.
    pub async fn accept(&self, listener: &TcpListener) -> Result<(TcpStream, SocketAddr), TaskError> {
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true)?;
                    return Ok((stream, addr));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.wait(Ready::READABLE).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Arms this task on wheel `timer`. Re-arming moves the deadline.
    pub fn set_timer(&self, timer: TimerId, delay: Duration) {
        self.commands.borrow_mut().push_back(Command::SetTimer { timer, task: self.id, delay });
    }

    pub fn clear_timer(&self, timer: TimerId) {
        self.commands.borrow_mut().push_back(Command::ClearTimer { timer, task: self.id });
    }

    /// Starts a new task for `fd` once this task yields.
    ///
    /// The entry usually owns the socket behind `fd`, so the socket is closed when
    /// the new task is torn down.
    pub fn spawn<F, Fut>(&self, fd: RawFd, interest: Ready, entry: F)
    where
        F: FnOnce(TaskContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.commands.borrow_mut().push_back(Command::Spawn { fd, interest, entry: boxed_entry(entry) });
    }

    /// Ends the task. Never returns.
    pub async fn exit(&self) {
        loop {
            self.suspender.suspend(Yield::Exit).await;
        }
    }
}
