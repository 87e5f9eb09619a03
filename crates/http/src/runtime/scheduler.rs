//! The event loop.
//!
//! A [`Scheduler`] owns the poller, every task and every timer wheel. One
//! [`turn`](Scheduler::turn) polls once, resumes each task whose descriptor is ready,
//! then sweeps the wheels and resumes each task whose deadline expired. A task's
//! interest change reaches the OS only after it yields, and only when it differs
//! from what the OS already has.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::arena::Arena;
use super::context::{Command, Commands, TaskEntry, TaskState, boxed_entry};
use super::{EpollPoller, Event, Poller, Ready, TaskContext, TaskId, TimerId, Wake, Yield};
use crate::coroutine::{Coroutine, Resumed};
use crate::timer::TimerWheel;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(10);
const DEFAULT_MAX_EVENTS: usize = 8192;

/// Settings of the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Longest a single poll blocks. Bounds how late a deadline can be noticed.
    pub poll_timeout: Duration,
    /// Events fetched per poll.
    pub max_events: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { poll_timeout: DEFAULT_POLL_TIMEOUT, max_events: DEFAULT_MAX_EVENTS }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    #[must_use]
    pub fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }
}

struct Task {
    coroutine: Coroutine<Wake, Yield>,
    state: Rc<TaskState>,
}

pub struct Scheduler<P: Poller = EpollPoller> {
    poller: P,
    config: SchedulerConfig,
    tasks: Arena<Task>,
    fds: HashMap<RawFd, TaskId>,
    wheels: Vec<TimerWheel<TaskId>>,
    commands: Commands,
    events: Vec<Event>,
}

impl<P: Poller> std::fmt::Debug for Scheduler<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tasks", &self.tasks.len())
            .field("wheels", &self.wheels.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler<EpollPoller> {
    /// Creates a scheduler over a fresh epoll instance.
    pub fn new(config: SchedulerConfig) -> io::Result<Self> {
        Ok(Self::with_poller(EpollPoller::new()?, config))
    }
}

impl<P: Poller> Scheduler<P> {
    pub fn with_poller(poller: P, config: SchedulerConfig) -> Self {
        Self {
            poller,
            config,
            tasks: Arena::default(),
            fds: HashMap::new(),
            wheels: Vec::new(),
            commands: Commands::default(),
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Registers a new timer wheel and returns its handle.
    ///
    /// # Panics
    /// Panics when `granularity` is zero.
    pub fn add_timer(&mut self, max_horizon: Duration, granularity: Duration) -> TimerId {
        self.wheels.push(TimerWheel::new(max_horizon, granularity));
        let timer = TimerId(self.wheels.len() - 1);
        debug!(%timer, ?max_horizon, ?granularity, "timer wheel added");
        timer
    }

    /// Arms `task` on wheel `timer`, `delay` from now. Returns false when either is unknown.
    pub fn set_timer(&mut self, timer: TimerId, task: TaskId, delay: Duration) -> bool {
        if !self.tasks.contains(task) {
            return false;
        }
        let Some(wheel) = self.wheels.get_mut(timer.0) else {
            warn!(%timer, %task, "unknown timer wheel");
            return false;
        };
        wheel.insert(delay, task);
        true
    }

    /// Disarms `task` on wheel `timer`. Returns false when it was not armed.
    pub fn clear_timer(&mut self, timer: TimerId, task: TaskId) -> bool {
        self.wheels.get_mut(timer.0).is_some_and(|wheel| wheel.remove(task))
    }

    /// Registers `fd` with `interest` (plus the error conditions) and starts a task
    /// running `entry` right away, up to its first suspension.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] when `fd` already belongs to a task.
    pub fn spawn<F, Fut>(&mut self, fd: RawFd, interest: Ready, entry: F) -> io::Result<TaskId>
    where
        F: FnOnce(TaskContext) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.spawn_boxed(fd, interest, boxed_entry(entry))
    }

    fn spawn_boxed(&mut self, fd: RawFd, interest: Ready, entry: TaskEntry) -> io::Result<TaskId> {
        if self.fds.contains_key(&fd) {
            return Err(io::Error::new(ErrorKind::AlreadyExists, format!("fd {fd} already belongs to a task")));
        }

        let base = interest | Ready::ERRORS;
        self.poller.add(fd, base)?;

        let state = Rc::new(TaskState::new(fd, base));
        let commands = Rc::clone(&self.commands);
        let id = self.tasks.insert_with(|id| {
            let task_state = Rc::clone(&state);
            let coroutine =
                Coroutine::spawn(move |suspender| entry(TaskContext::new(id, task_state, suspender, commands)));
            Task { coroutine, state }
        });
        self.fds.insert(fd, id);
        debug!(fd, task = %id, "task spawned");

        self.resume(id, Wake::Io(Ready::EMPTY));
        Ok(id)
    }

    /// Number of live tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains(task)
    }

    /// Runs one loop iteration: poll, resume ready tasks, sweep every wheel.
    pub fn turn(&mut self) -> io::Result<()> {
        let mut events = std::mem::take(&mut self.events);
        match self.poller.wait(&mut events, self.config.max_events, Some(self.config.poll_timeout)) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => events.clear(),
            Err(e) => {
                error!(cause = %e, "poll failed");
                self.events = events;
                return Err(e);
            }
        }

        for event in events.drain(..) {
            self.dispatch(event);
        }
        self.events = events;

        self.sweep_timers(Instant::now());
        Ok(())
    }

    /// Turns until no task is left.
    pub fn run(&mut self) -> io::Result<()> {
        info!(tasks = self.tasks.len(), "scheduler started");
        while !self.tasks.is_empty() {
            self.turn()?;
        }
        info!("no task left, scheduler stopped");
        Ok(())
    }

    fn dispatch(&mut self, event: Event) {
        let Some(&id) = self.fds.get(&event.fd) else {
            trace!(fd = event.fd, "event for a descriptor without task");
            return;
        };
        let Some(task) = self.tasks.get(id) else {
            return;
        };

        let errors = task.state.errors.get() | (event.ready & Ready::ERRORS);
        let ready = event.ready | errors;
        task.state.errors.set(errors);
        task.state.ready.set(ready);
        trace!(fd = event.fd, task = %id, ?ready, "resuming on readiness");
        self.resume(id, Wake::Io(ready));
    }

    fn sweep_timers(&mut self, now: Instant) {
        for index in 0..self.wheels.len() {
            let mut expired = Vec::new();
            self.wheels[index].sweep(now, |task| expired.push(task));

            for task in expired {
                if self.tasks.contains(task) {
                    trace!(%task, timer = index, "deadline expired");
                    self.resume(task, Wake::Timer(TimerId(index)));
                }
            }
        }
    }

    fn resume(&mut self, id: TaskId, wake: Wake) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };
        let resumed = task.coroutine.resume(wake);
        self.apply_commands();

        match resumed {
            Resumed::Complete | Resumed::Yielded(Yield::Exit) => self.terminate(id),
            Resumed::Yielded(Yield::Blocked) => self.reconcile(id),
            Resumed::Idle => {
                warn!(task = %id, "task parked outside its context");
                self.reconcile(id);
            }
        }
    }

    fn apply_commands(&mut self) {
        loop {
            let commands = std::mem::take(&mut *self.commands.borrow_mut());
            if commands.is_empty() {
                return;
            }

            for command in commands {
                match command {
                    Command::Spawn { fd, interest, entry } => {
                        if let Err(e) = self.spawn_boxed(fd, interest, entry) {
                            error!(fd, cause = %e, "failed to spawn task");
                        }
                    }
                    Command::SetTimer { timer, task, delay } => {
                        self.set_timer(timer, task, delay);
                    }
                    Command::ClearTimer { timer, task } => {
                        self.clear_timer(timer, task);
                    }
                }
            }
        }
    }

    /// Pushes a yielded task's interest delta to the OS.
    fn reconcile(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get(id) else {
            return;
        };

        let state = &task.state;
        let mut interest = state.interest.get();
        interest.disable(state.errors.get());
        let changed = interest.sync();
        state.interest.set(interest);

        let Some(applied) = changed else {
            return;
        };
        let fd = state.fd;
        if let Err(e) = self.poller.modify(fd, applied) {
            error!(fd, task = %id, cause = %e, "failed to update interest");
            self.terminate(id);
        }
    }

    fn terminate(&mut self, id: TaskId) {
        let Some(task) = self.tasks.remove(id) else {
            return;
        };
        for wheel in &mut self.wheels {
            wheel.remove(id);
        }

        let fd = task.state.fd;
        if self.fds.get(&fd) == Some(&id) {
            self.fds.remove(&fd);
            if let Err(e) = self.poller.delete(fd) {
                warn!(fd, cause = %e, "failed to deregister descriptor");
            }
        }
        // dropping the body closes the sockets it owns, after deregistration
        drop(task);
        debug!(fd, task = %id, remaining = self.tasks.len(), "task terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockPoller;
    use crate::runtime::TaskError;
    use mockall::predicate::eq;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    type Log<T> = Rc<RefCell<Vec<T>>>;

    fn log<T>() -> Log<T> {
        Rc::new(RefCell::new(Vec::new()))
    }

    fn deliver_once(poller: &mut MockPoller, event: Event) {
        let mut pending = Some(event);
        poller.expect_wait().returning(move |events, _, _| {
            events.clear();
            events.extend(pending.take());
            Ok(events.len())
        });
    }

    #[test]
    fn task_lifecycle_registers_and_deletes_exactly_once() {
        let mut poller = MockPoller::new();
        poller.expect_add().with(eq(7), eq(Ready::READABLE | Ready::ERRORS)).times(1).returning(|_, _| Ok(()));
        poller.expect_modify().never();
        poller.expect_delete().with(eq(7)).times(1).returning(|_| Ok(()));
        deliver_once(&mut poller, Event { fd: 7, ready: Ready::READABLE });

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        let wakes = log();
        let sink = Rc::clone(&wakes);
        let id = scheduler
            .spawn(7, Ready::READABLE, move |ctx| async move {
                let ready = ctx.wait(Ready::READABLE).await;
                sink.borrow_mut().push(ready.map_err(|e| e.to_string()));
            })
            .unwrap();

        assert!(scheduler.contains(id));
        scheduler.turn().unwrap();
        scheduler.turn().unwrap();

        assert!(scheduler.is_empty());
        assert!(!scheduler.contains(id));
        assert_eq!(*wakes.borrow(), vec![Ok(Ready::READABLE)]);
    }

    #[test]
    fn seen_error_bits_are_disarmed() {
        let mut poller = MockPoller::new();
        poller.expect_add().returning(|_, _| Ok(()));
        poller
            .expect_modify()
            .with(eq(3), eq(Ready::READABLE | Ready::ERROR | Ready::HANGUP))
            .times(1)
            .returning(|_, _| Ok(()));
        deliver_once(&mut poller, Event { fd: 3, ready: Ready::READABLE | Ready::READ_HANGUP });

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        let errors = log();
        let sink = Rc::clone(&errors);
        scheduler
            .spawn(3, Ready::READABLE, move |ctx| async move {
                loop {
                    let _ = ctx.wait(Ready::READABLE).await;
                    sink.borrow_mut().push(ctx.errors());
                }
            })
            .unwrap();

        for _ in 0..3 {
            scheduler.turn().unwrap();
        }
        assert_eq!(*errors.borrow(), vec![Ready::READ_HANGUP]);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn wakes_carry_error_bits_seen_earlier() {
        let mut poller = MockPoller::new();
        poller.expect_add().returning(|_, _| Ok(()));
        poller.expect_modify().returning(|_, _| Ok(()));
        let mut pending: VecDeque<Event> = [
            Event { fd: 6, ready: Ready::READABLE | Ready::READ_HANGUP },
            Event { fd: 6, ready: Ready::READABLE },
        ]
        .into();
        poller.expect_wait().returning(move |events, _, _| {
            events.clear();
            events.extend(pending.pop_front());
            Ok(events.len())
        });

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        let wakes = log();
        let sink = Rc::clone(&wakes);
        scheduler
            .spawn(6, Ready::READABLE, move |ctx| async move {
                loop {
                    if let Ok(ready) = ctx.wait(Ready::READABLE).await {
                        sink.borrow_mut().push((ready, ctx.ready()));
                    }
                }
            })
            .unwrap();

        scheduler.turn().unwrap();
        scheduler.turn().unwrap();

        let sticky = Ready::READABLE | Ready::READ_HANGUP;
        assert_eq!(*wakes.borrow(), vec![(sticky, sticky), (sticky, sticky)]);
    }

    #[test]
    fn duplicate_descriptor_is_refused() {
        let mut poller = MockPoller::new();
        poller.expect_add().times(1).returning(|_, _| Ok(()));

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        scheduler.spawn(5, Ready::READABLE, |ctx| async move {
            let _ = ctx.wait(Ready::READABLE).await;
        }).unwrap();

        let err = scheduler.spawn(5, Ready::READABLE, |_ctx| async {}).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(scheduler.len(), 1);
    }

    #[test]
    fn expired_deadline_resumes_with_timeout() {
        let mut poller = MockPoller::new();
        poller.expect_add().returning(|_, _| Ok(()));
        poller.expect_delete().with(eq(9)).times(1).returning(|_| Ok(()));
        poller.expect_wait().returning(|events, _, _| {
            events.clear();
            Ok(0)
        });

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        let timer = scheduler.add_timer(Duration::from_secs(1), Duration::from_millis(1));
        let outcome = log();
        let sink = Rc::clone(&outcome);
        scheduler
            .spawn(9, Ready::READABLE, move |ctx| async move {
                ctx.set_timer(timer, Duration::ZERO);
                let result = ctx.wait(Ready::READABLE).await;
                sink.borrow_mut().push(result.map_err(|e| e.timeout()));
            })
            .unwrap();

        scheduler.run().unwrap();
        assert_eq!(*outcome.borrow(), vec![Err(Some(timer))]);
    }

    #[test]
    fn cleared_deadline_never_fires() {
        let mut poller = MockPoller::new();
        poller.expect_add().returning(|_, _| Ok(()));
        poller.expect_wait().returning(|events, _, _| {
            events.clear();
            std::thread::sleep(Duration::from_millis(2));
            Ok(0)
        });

        let mut scheduler = Scheduler::with_poller(poller, SchedulerConfig::default());
        let timer = scheduler.add_timer(Duration::from_secs(1), Duration::from_millis(1));
        let id = scheduler
            .spawn(4, Ready::READABLE, move |ctx| async move {
                ctx.set_timer(timer, Duration::ZERO);
                ctx.clear_timer(timer);
                let _ = ctx.wait(Ready::READABLE).await;
                ctx.exit().await;
            })
            .unwrap();

        for _ in 0..5 {
            scheduler.turn().unwrap();
        }
        assert!(scheduler.contains(id));
        assert!(!scheduler.clear_timer(timer, id));
    }

    #[test]
    fn consumed_bytes_are_never_delivered_again() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let (mut client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();

        let received: Log<Vec<u8>> = log();
        let sink = Rc::clone(&received);
        scheduler
            .spawn(server.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                let mut server = server;
                let mut buf = [0u8; 64];
                while let Ok(n @ 1..) = ctx.read(&mut server, &mut buf).await {
                    sink.borrow_mut().push(buf[..n].to_vec());
                }
            })
            .unwrap();

        client.write_all(b"hello").unwrap();
        scheduler.turn().unwrap();
        scheduler.turn().unwrap();
        assert_eq!(*received.borrow(), vec![b"hello".to_vec()]);

        client.write_all(b"world").unwrap();
        scheduler.turn().unwrap();
        assert_eq!(*received.borrow(), vec![b"hello".to_vec(), b"world".to_vec()]);

        drop(client);
        scheduler.run().unwrap();
        assert!(scheduler.is_empty());
        assert_eq!(received.borrow().len(), 2);
    }

    #[test]
    fn deadline_interrupts_blocked_read() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let timer = scheduler.add_timer(Duration::from_secs(1), Duration::from_millis(5));
        let (_client, server) = UnixStream::pair().unwrap();
        server.set_nonblocking(true).unwrap();

        let outcome = log();
        let sink = Rc::clone(&outcome);
        let started = Instant::now();
        scheduler
            .spawn(server.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                let mut server = server;
                ctx.set_timer(timer, Duration::from_millis(20));
                let result = ctx.read(&mut server, &mut [0u8; 8]).await;
                sink.borrow_mut().push(matches!(result, Err(TaskError::Timeout { timer: t }) if t == timer));
            })
            .unwrap();

        scheduler.run().unwrap();
        assert_eq!(*outcome.borrow(), vec![true]);
        assert!(started.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn spawned_task_starts_after_parent_yields() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let (_parent_peer, parent) = UnixStream::pair().unwrap();
        let (mut child_peer, child) = UnixStream::pair().unwrap();
        child.set_nonblocking(true).unwrap();
        child_peer.write_all(b"x").unwrap();

        let trace = log();
        let parent_trace = Rc::clone(&trace);
        scheduler
            .spawn(parent.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                let child_trace = Rc::clone(&parent_trace);
                ctx.spawn(child.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                    let mut child = child;
                    let mut buf = [0u8; 4];
                    let n = ctx.read(&mut child, &mut buf).await.unwrap_or(0);
                    child_trace.borrow_mut().push(format!("child read {n}"));
                });
                parent_trace.borrow_mut().push("parent exits".to_string());
                ctx.exit().await;
                parent_trace.borrow_mut().push("unreachable".to_string());
            })
            .unwrap();

        assert!(scheduler.is_empty());
        assert_eq!(*trace.borrow(), vec!["parent exits".to_string(), "child read 1".to_string()]);
        drop(parent);
    }

    #[test]
    fn accept_waits_for_a_client() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default()).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap();

        let peers = log();
        let sink = Rc::clone(&peers);
        scheduler
            .spawn(listener.as_raw_fd(), Ready::READABLE, move |ctx| async move {
                if let Ok((_stream, peer)) = ctx.accept(&listener).await {
                    sink.borrow_mut().push(peer);
                }
            })
            .unwrap();
        assert_eq!(scheduler.len(), 1);

        let client = TcpStream::connect(addr).unwrap();
        scheduler.run().unwrap();
        assert_eq!(*peers.borrow(), vec![client.local_addr().unwrap()]);
    }
}
