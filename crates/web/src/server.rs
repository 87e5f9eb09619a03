//! Listener tasks wired onto a scheduler.
//!
//! Every configured address gets a listening socket and a task that accepts
//! connections forever, spawning one [`HttpConnection`] task per client.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use coro_http::connection::{ConnectionConfig, HttpConnection};
use coro_http::handler::{Handler, make_handler};
use coro_http::net::{ListenError, listen, parse_ip};
use coro_http::runtime::{Ready, Scheduler, SchedulerConfig, TaskContext, TimerId};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handler::echo;

/// Pause after a failed accept, e.g. when the process ran out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Error, Debug)]
pub enum ServerError {
    #[error(transparent)]
    Listen(#[from] ListenError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub struct Server {
    scheduler: Scheduler,
    local_addrs: Vec<SocketAddr>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").field("scheduler", &self.scheduler).field("local_addrs", &self.local_addrs).finish()
    }
}

impl Server {
    /// Opens every listening socket of `config` and registers its accept task.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let mut scheduler = Scheduler::new(SchedulerConfig::default())?;

        let timer = scheduler.add_timer(config.max_timeout(), config.timer_granularity);
        let connection_config = ConnectionConfig::default()
            .with_header_read(timer, config.header_timeout)
            .with_keep_alive(timer, config.keep_alive_timeout)
            .with_body_read(timer, config.body_timeout)
            .with_write(timer, config.write_timeout);

        let handler = Rc::new(make_handler(echo));
        let mut local_addrs = Vec::with_capacity(config.addresses.len());
        for address in &config.addresses {
            let addr = parse_ip(address, config.port)?;
            let listener = listen(addr, config.backlog, config.reuse_port)?;
            let local_addr = listener.local_addr()?;

            let handler = Rc::clone(&handler);
            scheduler.spawn(listener.as_raw_fd(), Ready::READABLE, move |ctx| {
                accept_loop(ctx, listener, handler, connection_config, timer)
            })?;
            info!(addr = %local_addr, backlog = config.backlog, reuse_port = config.reuse_port, "start listening");
            local_addrs.push(local_addr);
        }

        Ok(Self { scheduler, local_addrs })
    }

    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Runs one scheduler iteration.
    pub fn turn(&mut self) -> io::Result<()> {
        self.scheduler.turn()
    }

    /// Serves until every listener task has ended.
    pub fn run(mut self) -> Result<(), ServerError> {
        self.scheduler.run()?;
        Ok(())
    }
}

async fn accept_loop<H>(ctx: TaskContext, listener: TcpListener, handler: Rc<H>, config: ConnectionConfig, timer: TimerId)
where
    H: Handler<Bytes> + 'static,
{
    loop {
        let (stream, peer) = match ctx.accept(&listener).await {
            Ok(stream_and_peer) => stream_and_peer,
            Err(e) => {
                warn!(cause = %e, backoff = ?ACCEPT_BACKOFF, "failed to accept");
                // a failing accept can repeat forever, never retry without suspending
                ctx.set_timer(timer, ACCEPT_BACKOFF);
                let _ = ctx.wait(Ready::EMPTY).await;
                ctx.clear_timer(timer);
                continue;
            }
        };
        debug!(%peer, fd = stream.as_raw_fd(), "accepted connection");

        let handler = Rc::clone(&handler);
        ctx.spawn(stream.as_raw_fd(), Ready::READABLE, move |ctx| async move {
            let connection = HttpConnection::new(stream, handler, config);
            match connection.process(&ctx).await {
                Ok(()) => debug!(%peer, "finished process, connection shutdown"),
                Err(e) => warn!(%peer, cause = %e, "service has error, connection shutdown"),
            }
        });
    }
}
