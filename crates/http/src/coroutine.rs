//! Stackless coroutine engine.
//!
//! A [`Coroutine`] wraps a task body written as ordinary sequential code. The body
//! receives a [`Suspender`] and may call [`Suspender::suspend`] at any point; control
//! then returns to whoever called [`Coroutine::resume`], carrying the yielded value.
//! The next `resume` continues the body exactly where it stopped and delivers the
//! resume value as the result of the suspension.
//!
//! The body is an `async` block polled with a no-op waker, so no stack is allocated
//! and no platform context switching is involved. Hand-off is synchronous: `resume`
//! does not return until the body (or anything it transitively resumes) suspends
//! or finishes, so exactly one body executes at any instant.
//!
//! # Example
//!
//! ```
//! use coro_http::coroutine::{Coroutine, Resumed};
//!
//! let mut co = Coroutine::<u32, u32>::spawn(|suspender| async move {
//!     let mut total = suspender.resumed().unwrap_or_default();
//!     loop {
//!         total += suspender.suspend(total).await;
//!     }
//! });
//!
//! assert_eq!(co.resume(1), Resumed::Yielded(1));
//! assert_eq!(co.resume(2), Resumed::Yielded(3));
//! ```

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::task::{Context, Poll};

use futures::future::{poll_fn, LocalBoxFuture};
use futures::task::noop_waker_ref;
use futures::FutureExt;

/// Outcome of a single [`Coroutine::resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resumed<Y> {
    /// The body suspended and handed back a value.
    Yielded(Y),
    /// The body is parked on something other than its suspender.
    Idle,
    /// The body returned. Further resumes are no-ops.
    Complete,
}

impl<Y> Resumed<Y> {
    #[inline]
    pub fn is_complete(&self) -> bool {
        matches!(self, Resumed::Complete)
    }
}

/// Slots shared by the coroutine handle and its suspender.
struct Channel<R, Y> {
    resume: Cell<Option<R>>,
    yielded: Cell<Option<Y>>,
}

/// A suspended task body plus the channel used to pass values across switches.
pub struct Coroutine<R, Y> {
    body: Option<LocalBoxFuture<'static, ()>>,
    channel: Rc<Channel<R, Y>>,
}

impl<R: 'static, Y: 'static> Coroutine<R, Y> {
    /// Creates a coroutine around `entry`. The returned task has not run yet; the
    /// first [`resume`](Self::resume) starts it.
    pub fn spawn<F, Fut>(entry: F) -> Self
    where
        F: FnOnce(Suspender<R, Y>) -> Fut,
        Fut: Future<Output = ()> + 'static,
    {
        let channel = Rc::new(Channel { resume: Cell::new(None), yielded: Cell::new(None) });
        let suspender = Suspender { channel: Rc::clone(&channel) };
        Self { body: Some(entry(suspender).boxed_local()), channel }
    }

    /// Switches into the body, passing `value`, and returns once it suspends or ends.
    pub fn resume(&mut self, value: R) -> Resumed<Y> {
        let Some(body) = self.body.as_mut() else {
            return Resumed::Complete;
        };

        self.channel.resume.set(Some(value));
        let mut cx = Context::from_waker(noop_waker_ref());
        let poll = body.as_mut().poll(&mut cx);
        // an unread resume value never survives the switch back
        self.channel.resume.take();

        match poll {
            Poll::Ready(()) => {
                self.body = None;
                self.channel.yielded.take();
                Resumed::Complete
            }
            Poll::Pending => match self.channel.yielded.take() {
                Some(value) => Resumed::Yielded(value),
                None => Resumed::Idle,
            },
        }
    }

    /// Returns true once the body has returned.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.body.is_none()
    }
}

impl<R, Y> fmt::Debug for Coroutine<R, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine").field("complete", &self.body.is_none()).finish()
    }
}

/// The body's end of the channel: suspends back to the resumer.
pub struct Suspender<R, Y> {
    channel: Rc<Channel<R, Y>>,
}

impl<R, Y> Clone for Suspender<R, Y> {
    fn clone(&self) -> Self {
        Self { channel: Rc::clone(&self.channel) }
    }
}

impl<R, Y> fmt::Debug for Suspender<R, Y> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspender").finish_non_exhaustive()
    }
}

impl<R, Y> Suspender<R, Y> {
    /// Takes the value passed to the `resume` call that is currently running the body.
    ///
    /// Mostly useful right at the start of a body to read the first resume value.
    pub fn resumed(&self) -> Option<R> {
        self.channel.resume.take()
    }

    /// Yields `value` to the resumer and waits for the next resume value.
    pub async fn suspend(&self, value: Y) -> R {
        let mut pending = Some(value);
        poll_fn(|_cx| {
            if let Some(value) = pending.take() {
                self.channel.resume.take();
                self.channel.yielded.set(Some(value));
                return Poll::Pending;
            }
            match self.channel.resume.take() {
                Some(resumed) => Poll::Ready(resumed),
                None => Poll::Pending,
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn body_does_not_run_before_first_resume() {
        let ran = Rc::new(Cell::new(false));
        let flag = Rc::clone(&ran);
        let mut co = Coroutine::<(), ()>::spawn(move |_s| async move {
            flag.set(true);
        });

        assert!(!ran.get());
        assert_eq!(co.resume(()), Resumed::Complete);
        assert!(ran.get());
        assert!(co.is_complete());
    }

    #[test]
    fn values_cross_every_switch() {
        let mut co = Coroutine::<&'static str, usize>::spawn(|s| async move {
            let first = s.resumed().unwrap();
            let second = s.suspend(first.len()).await;
            let third = s.suspend(second.len()).await;
            s.suspend(third.len()).await;
        });

        assert_eq!(co.resume("a"), Resumed::Yielded(1));
        assert_eq!(co.resume("bb"), Resumed::Yielded(2));
        assert_eq!(co.resume("ccc"), Resumed::Yielded(3));
        assert_eq!(co.resume("done"), Resumed::Complete);
        assert_eq!(co.resume("again"), Resumed::Complete);
    }

    #[test]
    fn suspension_keeps_local_state() {
        let mut co = Coroutine::<(), u32>::spawn(|s| async move {
            let mut counter = 0;
            loop {
                counter += 1;
                s.suspend(counter).await;
            }
        });

        for expected in 1..=5 {
            assert_eq!(co.resume(()), Resumed::Yielded(expected));
        }
    }

    #[test]
    fn nested_resume_returns_only_when_inner_yields() {
        let trace = Rc::new(RefCell::new(Vec::new()));

        let inner_trace = Rc::clone(&trace);
        let inner = Coroutine::<(), ()>::spawn(move |s| async move {
            inner_trace.borrow_mut().push("inner a");
            s.suspend(()).await;
            inner_trace.borrow_mut().push("inner b");
            s.suspend(()).await;
        });

        let outer_trace = Rc::clone(&trace);
        let mut outer = Coroutine::<(), ()>::spawn(move |s| async move {
            let mut inner = inner;
            outer_trace.borrow_mut().push("outer a");
            inner.resume(());
            outer_trace.borrow_mut().push("outer b");
            s.suspend(()).await;
            inner.resume(());
            outer_trace.borrow_mut().push("outer c");
        });

        trace.borrow_mut().push("main a");
        assert_eq!(outer.resume(()), Resumed::Yielded(()));
        trace.borrow_mut().push("main b");
        assert_eq!(outer.resume(()), Resumed::Complete);

        assert_eq!(
            *trace.borrow(),
            vec!["main a", "outer a", "inner a", "outer b", "main b", "inner b", "outer c"]
        );
    }

    #[test]
    fn idle_when_parked_outside_the_suspender() {
        let mut co = Coroutine::<(), ()>::spawn(|_s| async move {
            futures::future::pending::<()>().await;
        });

        assert_eq!(co.resume(()), Resumed::Idle);
        assert!(!co.is_complete());
    }
}
