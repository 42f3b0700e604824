//! # Signaling Client
//!
//! WebSocket link to the meshcall relay.
//!
//! ```text
//!   sessions / manager ──► outbound mpsc ──► writer task ──► WebSocket
//!   relay ──► WebSocket ──► reader task ──► inbound mpsc ──► MeshClient
//! ```
//!
//! Everything outbound goes through one channel and one writer task, so
//! messages to a given peer leave in the order they were produced.

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::Result;
use crate::protocol::{ClientMessage, ServerMessage};

/// An open connection to the relay.
pub struct SignalingClient {
    outbound: mpsc::UnboundedSender<ClientMessage>,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    shutdown: Option<oneshot::Sender<()>>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SignalingClient {
    /// Connect to the relay's WebSocket endpoint.
    pub async fn connect(url: &str) -> Result<Self> {
        tracing::info!("Connecting to relay: {}", url);
        let (ws_stream, _) = connect_async(url).await?;
        tracing::info!("Connected to relay");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (inbound_tx, inbound) = mpsc::unbounded_channel::<ServerMessage>();
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();

        let writer = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = outbound_rx.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = &mut shutdown_rx => {
                        // Flush whatever was queued before the shutdown.
                        while let Ok(message) = outbound_rx.try_recv() {
                            if !write_message(&mut ws_sink, &message).await {
                                break;
                            }
                        }
                        break;
                    }
                };
                if !write_message(&mut ws_sink, &message).await {
                    break;
                }
            }
            let _ = ws_sink.close().await;
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_source.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(message) => {
                            if inbound_tx.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping unparseable relay message");
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Relay closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "Relay connection error");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            outbound,
            inbound,
            shutdown: Some(shutdown),
            writer,
            reader,
        })
    }

    /// Sender for the single ordered outbound channel.
    pub fn sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound.clone()
    }

    pub fn send(&self, message: ClientMessage) -> Result<()> {
        self.outbound
            .send(message)
            .map_err(|_| crate::error::Error::NotConnected)
    }

    /// Next message from the relay, or `None` once the link is gone.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        self.inbound.recv().await
    }

    /// Flush queued messages and close the socket.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = self.writer.await {
            tracing::warn!(error = %e, "Signaling writer task failed");
        }
        self.reader.abort();
    }
}

async fn write_message<S>(sink: &mut S, message: &ClientMessage) -> bool
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize signaling message");
            return true;
        }
    };
    match sink.send(Message::Text(text)).await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to send to relay");
            false
        }
    }
}
