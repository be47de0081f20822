//! Service assembly
//!
//! Opens one bus handle per server (both behind the same transaction lock),
//! creates the shared poll registry, binds both listeners and runs the
//! servers until shutdown. The poll server runs on a spawned task, the
//! command server on the caller's task.

use std::net::SocketAddr;
use std::sync::Arc;

use errors::{ProxyError, ProxyResult};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::bus::{open_bus, BusBackend, BusTransactionLock};
use crate::clock::{Clock, MonotonicClock};
use crate::commands::CommandDispatcher;
use crate::config::ProxyConfig;
use crate::poll::{PollExecutor, SharedRegistry};
use crate::server::{bind_listener, CommandServer, PollServer, SessionLimits};

/// Listener ports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ports {
    pub command: u16,
    pub poll: u16,
}

impl Ports {
    /// Command port `port`, poll port `port + 1`
    pub fn adjacent(port: u16) -> ProxyResult<Self> {
        let poll = port.checked_add(1).ok_or_else(|| {
            ProxyError::invalid_config("port", format!("{} leaves no room for the poll port", port))
        })?;
        Ok(Self {
            command: port,
            poll,
        })
    }
}

/// Both servers, bound and ready to run
pub struct ProxyService {
    command: CommandServer,
    poll: PollServer,
    registry: Arc<SharedRegistry>,
}

impl ProxyService {
    /// Open the bus handles and bind both ports. Any failure here is fatal.
    pub fn bind(
        config: &ProxyConfig,
        ports: Ports,
        bus_id: u32,
        backend: &BusBackend,
    ) -> ProxyResult<Self> {
        let lock = BusTransactionLock::new();
        let command_bus = open_bus(&config.bus, bus_id, backend, &lock)?;
        let poll_bus = open_bus(&config.bus, bus_id, backend, &lock)?;
        info!("Bus {} opened ({})", bus_id, command_bus.name());

        let registry = Arc::new(SharedRegistry::new());
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

        let poll_listener = bind_listener(&config.bind_host, ports.poll, config.listen_backlog)?;
        let command_listener =
            bind_listener(&config.bind_host, ports.command, config.listen_backlog)?;

        let executor = PollExecutor::new(
            registry.clone(),
            poll_bus,
            clock.clone(),
            config.poll.clone(),
        );
        let dispatcher = CommandDispatcher::new(
            command_bus,
            registry.clone(),
            clock,
            config.reply_capacity,
            config.max_register_count,
        );
        let limits = SessionLimits {
            line_buffer_size: config.line_buffer_size,
            max_request_len: config.max_request_len,
        };

        Ok(Self {
            command: CommandServer::new(command_listener, dispatcher, registry.clone(), limits),
            poll: PollServer::new(poll_listener, executor),
            registry,
        })
    }

    pub fn command_addr(&self) -> ProxyResult<SocketAddr> {
        self.command.local_addr()
    }

    pub fn poll_addr(&self) -> ProxyResult<SocketAddr> {
        self.poll.local_addr()
    }

    pub fn registry(&self) -> Arc<SharedRegistry> {
        self.registry.clone()
    }

    /// Serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> ProxyResult<()> {
        let Self { command, poll, .. } = self;

        let poll_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move { poll.run(cancel).await })
        };

        let result = command.run(cancel.clone()).await;
        cancel.cancel();

        match poll_task.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => error!("Poll server failed: {}", e),
            Err(e) => return Err(ProxyError::internal(format!("Poll server task panicked: {}", e))),
        }

        result
    }
}
