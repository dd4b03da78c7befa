//! Relay bridge connection
//!
//! Sole owner, for the process's lifetime, of the one socket to the
//! external relay. On connect it sends the hello/subscription frame, then
//! reads frames under a bounded timeout, decodes envelopes and forwards
//! the resulting events to the dispatcher. Disconnects and read timeouts
//! enter a backoff reconnect loop that never blocks dispatch of already
//! decoded events.
//!
//! The connection also owns the session keepalive: the latest cursor token
//! surfaced by the decoder is echoed back to the relay on the heartbeat
//! cadence (relay-supplied, or the configured override).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{CaptureConfig, DEFAULT_ACK_INTERVAL};
use crate::dispatch::Dispatcher;
use crate::error::ConnectionError;
use crate::model::RoomId;
use crate::protocol::{decoder, wire, Frame};

use super::health::ConnectionHealth;

/// Keepalive state shared with the ack task
#[derive(Debug, Clone)]
struct AckState {
    cursor: Option<String>,
    interval: Duration,
}

/// The process's single connection to the external relay
pub struct BridgeConnection {
    config: CaptureConfig,
    dispatcher: Arc<Dispatcher>,
    health: Arc<ConnectionHealth>,
    sequence: Arc<AtomicU64>,
}

impl BridgeConnection {
    /// Create the bridge
    ///
    /// Exactly one instance should exist per process; it is the sole
    /// writer of the relay socket.
    pub fn new(config: CaptureConfig, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            config,
            dispatcher,
            health: Arc::new(ConnectionHealth::new()),
            sequence: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The liveness state shared with the health monitor
    pub fn health(&self) -> Arc<ConnectionHealth> {
        Arc::clone(&self.health)
    }

    /// Run the connect/read/reconnect loop forever
    pub async fn run(&self) {
        let mut backoff = self.config.reconnect_backoff;
        loop {
            let result = self.session().await;

            // A session that got as far as receiving frames resets the
            // backoff; repeated failures to get there keep doubling it.
            let made_progress = self.health.is_alive();
            self.health.set_alive(false);
            if made_progress {
                backoff = self.config.reconnect_backoff;
            }

            match result {
                Ok(()) => {
                    tracing::info!("Relay closed the connection, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        delay_ms = backoff.as_millis() as u64,
                        "Relay connection lost, reconnecting"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.health.reconnect_requested() => {
                    tracing::debug!("Backoff cut short by forced reconnect");
                }
            }
            backoff = next_backoff(backoff, self.config.reconnect_backoff_max);
        }
    }

    /// One connection attempt: handshake, then read until failure
    async fn session(&self) -> Result<(), ConnectionError> {
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.relay_addr.as_str()),
        )
        .await
        .map_err(|_| ConnectionError::ConnectTimeout)??;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let hello = Frame::hello(self.next_sequence(), &self.config.auth_token);
        write_frame(&mut writer, &hello).await?;
        tracing::info!(relay = %self.config.relay_addr, "Connected to relay");

        let (ack_tx, ack_rx) = watch::channel(AckState {
            cursor: None,
            interval: self.config.ack_interval.unwrap_or(DEFAULT_ACK_INTERVAL),
        });
        let ack_task = self.spawn_ack_task(writer, ack_rx);

        let result = self.read_loop(&mut reader, &ack_tx).await;
        ack_task.abort();
        result
    }

    async fn read_loop(
        &self,
        reader: &mut OwnedReadHalf,
        ack_tx: &watch::Sender<AckState>,
    ) -> Result<(), ConnectionError> {
        loop {
            let frame = tokio::select! {
                _ = self.health.reconnect_requested() => {
                    return Err(ConnectionError::ForcedReconnect);
                }
                read = tokio::time::timeout(
                    self.config.read_timeout,
                    read_frame(reader, self.config.max_frame_size),
                ) => read.map_err(|_| ConnectionError::ReadTimeout)??,
            };

            self.health.set_alive(true);
            self.handle_frame(frame, ack_tx).await;
        }
    }

    async fn handle_frame(&self, frame: Frame, ack_tx: &watch::Sender<AckState>) {
        match frame.frame_type() {
            Some(wire::FRAME_TYPE_DATA) => {
                let Some(room) = frame.room() else {
                    tracing::warn!(sequence = frame.sequence, "Data frame without room header");
                    return;
                };
                let room = RoomId::new(room);
                let host = frame.header(wire::HEADER_HOST).map(str::to_string);

                match decoder::decode(frame.payload.clone()) {
                    Ok(decoded) => {
                        if decoded.cursor.is_some() || decoded.heartbeat.is_some() {
                            let override_set = self.config.ack_interval.is_some();
                            ack_tx.send_modify(|state| {
                                if let Some(cursor) = decoded.cursor.clone() {
                                    state.cursor = Some(cursor);
                                }
                                if !override_set {
                                    if let Some(heartbeat) = decoded.heartbeat {
                                        state.interval = heartbeat;
                                    }
                                }
                            });
                        }
                        if !decoded.events.is_empty() {
                            self.dispatcher
                                .dispatch(&room, host.as_deref(), decoded.events)
                                .await;
                        }
                    }
                    Err(e) => {
                        // One bad frame never takes the connection down.
                        tracing::warn!(
                            sequence = frame.sequence,
                            room = %room,
                            error = %e,
                            "Dropping undecodable envelope"
                        );
                    }
                }
            }
            Some(wire::FRAME_TYPE_PING) => {
                tracing::trace!(sequence = frame.sequence, "Relay ping");
            }
            other => {
                tracing::debug!(frame_type = ?other, "Ignoring frame");
            }
        }
    }

    fn spawn_ack_task(
        &self,
        mut writer: OwnedWriteHalf,
        ack_rx: watch::Receiver<AckState>,
    ) -> JoinHandle<()> {
        let health = Arc::clone(&self.health);
        let sequence = Arc::clone(&self.sequence);
        tokio::spawn(async move {
            loop {
                let interval = ack_rx.borrow().interval;
                tokio::time::sleep(interval).await;

                let cursor = ack_rx.borrow().cursor.clone();
                let Some(cursor) = cursor else { continue };

                let frame = Frame::ack(sequence.fetch_add(1, Ordering::Relaxed), &cursor);
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    tracing::warn!(error = %e, "Ack write failed, forcing reconnect");
                    health.force_reconnect();
                    return;
                }
                tracing::trace!(cursor = %cursor, "Cursor acknowledged");
            }
        })
    }

    fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

/// Double the backoff delay, capped at the configured maximum
fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

/// Write one length-prefixed frame to the transport
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), ConnectionError> {
    let encoded = frame.encode()?;
    writer.write_u32(encoded.len() as u32).await?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame from the transport
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Frame, ConnectionError> {
    let len = reader.read_u32().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ConnectionError::Closed
        } else {
            ConnectionError::Io(e)
        }
    })? as usize;
    if len > max_frame_size {
        return Err(ConnectionError::FrameTooLarge(len, max_frame_size));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let mut bytes = Bytes::from(buf);
    Ok(Frame::decode(&mut bytes)?)
}
