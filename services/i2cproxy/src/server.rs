//! Command and poll servers
//!
//! Each server owns one listener and serves one connection at a time; later
//! clients wait in the listen backlog. The command server frames requests
//! with a [`LineReader`] and answers each one. The poll server hands its
//! connection to the [`PollExecutor`]. Either session clears the poll
//! registry when it ends.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use errors::{ProxyError, ProxyResult};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::CommandDispatcher;
use crate::line_reader::{LineError, LineReader};
use crate::poll::{PollExecutor, SessionEnd, SharedRegistry};

/// Bind a listener with address reuse and the configured backlog
pub fn bind_listener(host: &str, port: u16, backlog: u32) -> ProxyResult<TcpListener> {
    let ip: IpAddr = host
        .parse()
        .map_err(|_| ProxyError::invalid_config("bind_host", format!("'{}' is not an IP address", host)))?;
    let addr = SocketAddr::new(ip, port);

    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(|e| ProxyError::bind(addr, e.to_string()))?;
    socket
        .set_reuseaddr(true)
        .map_err(|e| ProxyError::bind(addr, e.to_string()))?;
    socket
        .bind(addr)
        .map_err(|e| ProxyError::bind(addr, e.to_string()))?;
    let listener = socket
        .listen(backlog)
        .map_err(|e| ProxyError::bind(addr, e.to_string()))?;

    info!("Listening on {}", addr);
    Ok(listener)
}

/// Wait for the next client, or `None` on shutdown
async fn accept(
    listener: &TcpListener,
    cancel: &CancellationToken,
    service: &str,
) -> Option<(TcpStream, SocketAddr)> {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                    }
                    info!("Accepted {} connection from {}", service, peer);
                    return Some((stream, peer));
                },
                Err(e) => warn!("Error accepting {} connection: {}", service, e),
            },
        }
    }
}

/// Limits applied to each command connection
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub line_buffer_size: usize,
    pub max_request_len: usize,
}

/// Serves the command port
pub struct CommandServer {
    listener: TcpListener,
    dispatcher: CommandDispatcher,
    registry: Arc<SharedRegistry>,
    limits: SessionLimits,
}

impl CommandServer {
    pub fn new(
        listener: TcpListener,
        dispatcher: CommandDispatcher,
        registry: Arc<SharedRegistry>,
        limits: SessionLimits,
    ) -> Self {
        Self {
            listener,
            dispatcher,
            registry,
            limits,
        }
    }

    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve command clients until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> ProxyResult<()> {
        while let Some((stream, peer)) = accept(&self.listener, &cancel, "command").await {
            self.serve(stream, &cancel).await;

            let dropped = self.registry.clear_all();
            info!(
                "Command connection from {} closed, {} poll records cleared",
                peer, dropped
            );
        }

        info!("Command server stopped");
        Ok(())
    }

    async fn serve(&self, stream: TcpStream, cancel: &CancellationToken) {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = LineReader::new(read_half, self.limits.line_buffer_size);

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return,
                line = reader.read_line(self.limits.max_request_len) => line,
            };

            let request = match line {
                Ok(bytes) => bytes,
                Err(LineError::Disconnected) => return,
                Err(e) => {
                    warn!("Closing command connection: {}", e);
                    return;
                },
            };

            let request = String::from_utf8_lossy(&request);
            debug!("Request: {}", request.trim_end());
            let reply = self.dispatcher.dispatch(&request).await;
            debug!("Reply: {}", reply.trim_end());

            if let Err(e) = write_half.write_all(reply.as_bytes()).await {
                warn!("Error sending reply: {}", e);
                return;
            }
        }
    }
}

/// Serves the poll port
pub struct PollServer {
    listener: TcpListener,
    executor: PollExecutor,
}

impl PollServer {
    pub fn new(listener: TcpListener, executor: PollExecutor) -> Self {
        Self { listener, executor }
    }

    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and serve monitoring clients until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) -> ProxyResult<()> {
        while let Some((stream, peer)) = accept(&self.listener, &cancel, "poll").await {
            let (reader, writer) = stream.into_split();
            match self.executor.serve(reader, writer, &cancel).await {
                SessionEnd::ClientClosed => info!("Poll connection from {} closed", peer),
                SessionEnd::SendFailed(e) => {
                    warn!("Error sending poll results to {}: {}", peer, e)
                },
                SessionEnd::Cancelled => break,
            }
        }

        info!("Poll server stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::bus::MockBus;
    use crate::clock::MonotonicClock;
    use crate::poll::PollRecord;
    use tokio::io::AsyncReadExt;

    fn command_server(limits: SessionLimits) -> (CommandServer, Arc<SharedRegistry>) {
        let registry = Arc::new(SharedRegistry::new());
        let dispatcher = CommandDispatcher::new(
            Arc::new(MockBus::new("mock")),
            registry.clone(),
            Arc::new(MonotonicClock::new()),
            256,
            256,
        );
        let listener = bind_listener("127.0.0.1", 0, 20).unwrap();
        (
            CommandServer::new(listener, dispatcher, registry.clone(), limits),
            registry,
        )
    }

    #[tokio::test]
    async fn test_bind_rejects_hostname() {
        let err = bind_listener("localhost", 0, 20).unwrap_err();
        assert!(err.to_string().contains("bind_host"));
    }

    #[tokio::test]
    async fn test_bind_conflict_reports_endpoint() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = first.local_addr().unwrap().port();

        let err = bind_listener("127.0.0.1", port, 20).unwrap_err();
        assert!(matches!(err, ProxyError::Bind { .. }));
        assert!(err.to_string().contains(&port.to_string()));
    }

    #[tokio::test]
    async fn test_oversized_request_closes_connection() {
        let (server, _) = command_server(SessionLimits {
            line_buffer_size: 1024,
            max_request_len: 16,
        });
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(cancel).await })
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping\n").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OK\r\n");

        client
            .write_all(b"get 16 3 1 and then a lot more\n")
            .await
            .unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_command_session_end_clears_registry() {
        let (server, registry) = command_server(SessionLimits {
            line_buffer_size: 4096,
            max_request_len: 256,
        });
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(cancel).await })
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"addpoll 100 16 3\r\n").await.unwrap();
        let mut reply = [0u8; 6];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"OK 1\r\n");
        assert_eq!(registry.lock().len(), 1);
        drop(client);

        // The next client is served only after the first session was torn down
        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping\n").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert!(registry.lock().is_empty());

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_poll_server_streams_due_records() {
        let bus = MockBus::new("mock");
        bus.set_register(16, 3, 5);
        let registry = Arc::new(SharedRegistry::new());
        let clock = Arc::new(MonotonicClock::new());
        registry.add(
            PollRecord {
                next_run_ms: Some(0),
                ..PollRecord::new(50, 16, 3, 1)
            },
            0,
        );

        let executor = PollExecutor::new(
            registry.clone(),
            Arc::new(bus),
            clock,
            crate::config::PollSettings::default(),
        );
        let server = PollServer::new(bind_listener("127.0.0.1", 0, 20).unwrap(), executor);
        let addr = server.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let handle = {
            let cancel = cancel.clone();
            tokio::spawn(async move { server.run(cancel).await })
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut line = [0u8; 6];
        client.read_exact(&mut line).await.unwrap();
        assert_eq!(&line, b"1: 5\r\n");

        cancel.cancel();
        handle.await.unwrap().unwrap();
        assert!(registry.lock().is_empty());
    }
}
