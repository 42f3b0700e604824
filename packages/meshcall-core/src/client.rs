//! # Mesh Client
//!
//! Connects a [`SignalingClient`] to a [`PeerSessionManager`] and runs the
//! call until the user leaves or the relay goes away.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::manager::{MeshEvent, PeerSessionManager};
use crate::media::LocalMedia;
use crate::signaling::SignalingClient;
use crate::transport::TransportFactory;

/// Commands the UI issues while a call is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientCommand {
    ToggleAudio,
    ToggleVideo,
    Leave,
}

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEnd {
    /// The user left
    Left,
    /// The relay connection dropped
    Disconnected,
}

/// One participant's view of the call.
pub struct MeshClient {
    config: ClientConfig,
    signaling: SignalingClient,
    manager: PeerSessionManager,
    commands_tx: mpsc::UnboundedSender<ClientCommand>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
}

impl MeshClient {
    /// Validate the config and connect to the relay.
    ///
    /// On failure the local media is released, since it will never be used.
    pub async fn connect(
        config: ClientConfig,
        factory: Arc<dyn TransportFactory>,
        media: LocalMedia,
    ) -> Result<(Self, mpsc::UnboundedReceiver<MeshEvent>)> {
        let connected = match config.validate() {
            Ok(config) => SignalingClient::connect(&config.server_url)
                .await
                .map(|signaling| (config, signaling)),
            Err(e) => Err(e),
        };
        let (config, signaling) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                media.release();
                return Err(e);
            }
        };

        let (events_tx, events) = mpsc::unbounded_channel();
        let manager = PeerSessionManager::new(factory, media, signaling.sender(), events_tx);
        let (commands_tx, commands) = mpsc::unbounded_channel();

        Ok((
            Self {
                config,
                signaling,
                manager,
                commands_tx,
                commands,
            },
            events,
        ))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn manager(&self) -> &PeerSessionManager {
        &self.manager
    }

    /// Sender for UI commands; usable from any task.
    pub fn commands(&self) -> mpsc::UnboundedSender<ClientCommand> {
        self.commands_tx.clone()
    }

    /// Send `join-room` and drive the call to its end.
    ///
    /// Returns [`Error::RoomFull`] when admission is refused.
    pub async fn run(mut self) -> Result<CallEnd> {
        self.manager.join(&self.config.display_name)?;

        let end = loop {
            tokio::select! {
                message = self.signaling.recv() => match message {
                    Some(message) => match self.manager.handle_server_message(message).await {
                        Ok(()) => {}
                        Err(Error::RoomFull) => {
                            self.signaling.close().await;
                            return Err(Error::RoomFull);
                        }
                        Err(e) => tracing::warn!(error = %e, "Failed to handle relay message"),
                    },
                    None => {
                        self.manager.disconnected().await;
                        break CallEnd::Disconnected;
                    }
                },
                // `commands_tx` lives in `self`, so this never yields `None`.
                Some(command) = self.commands.recv() => match command {
                    ClientCommand::ToggleAudio => log_toggle("audio", self.manager.toggle_audio()),
                    ClientCommand::ToggleVideo => log_toggle("video", self.manager.toggle_video()),
                    ClientCommand::Leave => {
                        self.manager.leave().await;
                        break CallEnd::Left;
                    }
                },
            }
        };

        self.signaling.close().await;
        tracing::info!(?end, "Call ended");
        Ok(end)
    }
}

fn log_toggle(kind: &str, result: Result<Option<bool>>) {
    match result {
        Ok(Some(enabled)) => tracing::debug!(kind, enabled, "Toggled local track"),
        Ok(None) => tracing::debug!(kind, "No local track to toggle"),
        Err(e) => tracing::warn!(kind, error = %e, "Toggle failed"),
    }
}
