//! Single-threaded cooperative runtime.
//!
//! - [`Scheduler`]: the event loop, owning tasks, descriptors and timer wheels
//! - [`TaskContext`]: what a task body uses to wait, do I/O and arm deadlines
//! - [`Poller`] / [`EpollPoller`]: the readiness facility
//! - [`Ready`] / [`Interest`]: readiness bits and lazily applied interest
//!
//! Tasks are never sent across threads; everything here is `!Send`.

mod arena;
mod context;
mod error;
mod poller;
mod ready;
mod scheduler;

pub use context::{TaskContext, Wake, Yield};
pub use error::{TaskError, TaskId, TimerId};
#[cfg(test)]
pub(crate) use poller::MockPoller;
pub use poller::{EpollPoller, Event, Poller};
pub use ready::{Interest, Ready};
pub use scheduler::{Scheduler, SchedulerConfig};
