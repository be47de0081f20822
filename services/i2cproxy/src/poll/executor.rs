//! Poll executor
//!
//! Serves one monitoring client: repeatedly drains due records from the
//! registry, reads their registers, streams the formatted batch, then sleeps
//! until the next record is due. The sleep ends early when the registry
//! changes, when the client closes its side, or on shutdown.
//!
//! The registry lock is only held to peek the due head and to reschedule it;
//! bus reads happen with the lock released.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::record::PollRecord;
use super::registry::SharedRegistry;
use crate::bus::RegisterBus;
use crate::clock::Clock;
use crate::config::PollSettings;

const ERROR_MARKER: &[u8] = b"ERROR";

/// Why a poll session ended
#[derive(Debug)]
pub enum SessionEnd {
    /// The client closed its side of the connection
    ClientClosed,
    /// Writing a batch failed
    SendFailed(io::Error),
    /// Process shutdown
    Cancelled,
}

/// Drains the shared registry for one client at a time
pub struct PollExecutor {
    registry: Arc<SharedRegistry>,
    bus: Arc<dyn RegisterBus>,
    clock: Arc<dyn Clock>,
    settings: PollSettings,
}

impl PollExecutor {
    pub fn new(
        registry: Arc<SharedRegistry>,
        bus: Arc<dyn RegisterBus>,
        clock: Arc<dyn Clock>,
        settings: PollSettings,
    ) -> Self {
        Self {
            registry,
            bus,
            clock,
            settings,
        }
    }

    /// Stream poll results to a client until it leaves, a send fails or `cancel` fires.
    ///
    /// The registry is cleared when the session ends.
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W, cancel: &CancellationToken) -> SessionEnd
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut probe = [0u8; 64];

        let end = loop {
            let batch = self.drain().await;
            if !batch.is_empty() {
                if let Err(e) = send_batch(&mut writer, &batch).await {
                    break SessionEnd::SendFailed(e);
                }
            }

            let pause = self.sleep_duration();
            tokio::select! {
                _ = cancel.cancelled() => break SessionEnd::Cancelled,
                _ = tokio::time::sleep(pause) => {},
                _ = self.registry.changed() => {},
                read = reader.read(&mut probe) => match read {
                    Ok(0) => break SessionEnd::ClientClosed,
                    Ok(n) => debug!("Ignoring {} bytes from poll client", n),
                    Err(e) => {
                        debug!("Poll client read failed: {}", e);
                        break SessionEnd::ClientClosed;
                    },
                },
            }
        };

        let dropped = self.registry.clear_all();
        info!("Poll session ended, {} poll records cleared", dropped);
        end
    }

    /// One drain pass: service every due record in order and return the batch
    pub async fn drain(&self) -> Vec<u8> {
        let grace = self.settings.due_grace_ms;
        let capacity = self.settings.batch_capacity;
        let mut batch = Vec::new();

        while let Some(record) = self.due_record() {
            let mut line = match self
                .bus
                .read_registers(record.address, record.register, record.count)
                .await
            {
                Ok(values) => format_values_line(record.id, &values),
                Err(e) => {
                    warn!("Poll {} read failed on {}: {}", record.id, self.bus.name(), e);
                    format_error_line(record.id)
                },
            };

            if batch.len() + line.len() > capacity {
                if batch.is_empty() {
                    warn!(
                        "Poll {} output ({} bytes) exceeds batch capacity {}",
                        record.id,
                        line.len(),
                        capacity
                    );
                    line = format_error_line(record.id);
                } else {
                    warn!(
                        "Poll batch full ({} of {} bytes), remaining records deferred to the next pass",
                        batch.len(),
                        capacity
                    );
                    break;
                }
            }
            batch.extend_from_slice(&line);

            let now = self.clock.now_ms();
            let skipped = self.registry.lock().complete_run(record.id, now, grace);
            match skipped {
                Some(0) => {},
                Some(skipped) => warn!(
                    "Poll {} is running behind, skipped {} periods",
                    record.id, skipped
                ),
                None => debug!("Poll {} was removed while it ran", record.id),
            }
        }

        batch
    }

    /// Time until the next record is due, capped by the idle sleep
    pub fn sleep_duration(&self) -> Duration {
        let idle = self.settings.idle_sleep_ms;
        let now = self.clock.now_ms();
        let wait = match self.registry.lock().next_due_ms() {
            Some(next) => next.saturating_sub(now).min(idle),
            None => idle,
        };
        Duration::from_millis(wait)
    }

    fn due_record(&self) -> Option<PollRecord> {
        let now = self.clock.now_ms();
        let registry = self.registry.lock();
        registry.head_due(now, self.settings.due_grace_ms).cloned()
    }
}

async fn send_batch<W>(writer: &mut W, batch: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(batch).await?;
    writer.flush().await?;
    debug!("Sent {} byte poll batch", batch.len());
    Ok(())
}

/// `"<id>: v0 v1 ...\r\n"`
pub fn format_values_line(id: u32, values: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(12 + values.len() * 4);
    let mut digits = itoa::Buffer::new();
    line.extend_from_slice(digits.format(id).as_bytes());
    line.push(b':');
    for value in values {
        line.push(b' ');
        line.extend_from_slice(digits.format(*value).as_bytes());
    }
    line.extend_from_slice(b"\r\n");
    line
}

/// `"<id>: ERROR\r\n"`
pub fn format_error_line(id: u32) -> Vec<u8> {
    let mut digits = itoa::Buffer::new();
    let mut line = Vec::with_capacity(20);
    line.extend_from_slice(digits.format(id).as_bytes());
    line.extend_from_slice(b": ");
    line.extend_from_slice(ERROR_MARKER);
    line.extend_from_slice(b"\r\n");
    line
}
