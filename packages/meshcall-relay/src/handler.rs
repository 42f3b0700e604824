//! WebSocket connection handler.
//!
//! Manages individual WebSocket connections: assigning connection ids,
//! parsing client messages, routing them through the registry and relay, and
//! cleaning up when the socket goes away.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ConnectionId, RosterEntry, ServerMessage, SignalKind};
use crate::registry::AdmitError;
use crate::relay;
use crate::state::RelayState;

/// Handle a single WebSocket connection.
///
/// This function runs for the lifetime of the connection:
/// 1. Assigns a connection id and registers an outbound channel
/// 2. Spawns a sender task that drains the channel in order
/// 3. Processes incoming messages until the connection closes
/// 4. Removes the participant from the room and notifies the others
pub async fn handle_websocket(socket: WebSocket, state: RelayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection_id = ConnectionId::generate();

    // ── Step 1: Register Connection ───────────────────────────────────────

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.register_connection(&connection_id, tx);
    tracing::info!(connection_id = %connection_id, "Client connected");

    // ── Step 2: Spawn Sender Task ─────────────────────────────────────────

    let sender_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json)).await.is_err() {
                        break; // Connection closed
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize server message: {}", e);
                }
            }
        }
    });

    // ── Step 3: Process Messages ──────────────────────────────────────────

    while let Some(msg_result) = ws_receiver.next().await {
        match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => {
                    handle_client_message(&state, &connection_id, client_msg);
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection_id,
                        error = %e,
                        "Failed to parse client message"
                    );
                    state.send_to_client(
                        &connection_id,
                        ServerMessage::Error {
                            message: format!("Invalid message format: {}", e),
                        },
                    );
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "Client sent close frame");
                break;
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
            _ => {} // Binary, Ping, Pong: axum answers pings itself
        }
    }

    // ── Step 4: Cleanup ───────────────────────────────────────────────────

    handle_leave_room(&state, &connection_id);
    state.unregister_connection(&connection_id);
    sender_task.abort();
    tracing::info!(connection_id = %connection_id, "Client disconnected");
}

/// Handle a parsed client message.
pub fn handle_client_message(state: &RelayState, from: &ConnectionId, msg: ClientMessage) {
    match msg {
        ClientMessage::JoinRoom { display_name } => {
            handle_join_room(state, from, &display_name);
        }

        ClientMessage::LeaveRoom => {
            handle_leave_room(state, from);
        }

        ClientMessage::Offer { description, to } => {
            relay::relay(state, SignalKind::Offer, description, from, &to);
        }

        ClientMessage::Answer { description, to } => {
            relay::relay(state, SignalKind::Answer, description, from, &to);
        }

        ClientMessage::IceCandidate { candidate, to } => {
            relay::relay(state, SignalKind::Candidate, candidate, from, &to);
        }

        ClientMessage::Ping => {
            state.send_to_client(from, ServerMessage::Pong);
        }
    }
}

// ── Message Handlers ──────────────────────────────────────────────────────────

/// Admit a connection, answer it with the current roster and tell everyone
/// else a newcomer arrived.
///
/// Both notices are queued while the room is locked, so a concurrent join or
/// leave cannot slip its own notices in ahead of them.
fn handle_join_room(state: &RelayState, joiner: &ConnectionId, display_name: &str) {
    let admitted = state.registry.admit_with(joiner, display_name, |admission| {
        state.send_to_client(
            joiner,
            ServerMessage::AllUsers {
                connection_id: joiner.clone(),
                users: admission.existing.clone(),
                is_host: admission.is_host,
            },
        );

        // Others never learn a newcomer is host; only the joiner's own
        // admission response carries that.
        let recipients: Vec<ConnectionId> = admission
            .existing
            .iter()
            .map(|p: &RosterEntry| p.connection_id.clone())
            .collect();
        let notified = state.broadcast(
            &recipients,
            &ServerMessage::UserJoined {
                connection_id: joiner.clone(),
                display_name: display_name.to_string(),
                is_host: false,
            },
        );
        tracing::debug!(
            connection_id = %joiner,
            notified = notified,
            "Announced new participant"
        );
    });

    match admitted {
        Ok(_) => {}
        Err(AdmitError::RoomFull { .. }) => {
            state.send_to_client(joiner, ServerMessage::RoomFull);
        }
        Err(e @ AdmitError::AlreadyJoined(_)) => {
            tracing::warn!(connection_id = %joiner, "Duplicate join-room ignored");
            state.send_to_client(
                joiner,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            );
        }
    }
}

/// Remove a connection from the room and notify the remaining participants.
/// Returns false if the connection was not in the room (nothing is sent).
fn handle_leave_room(state: &RelayState, leaver: &ConnectionId) -> bool {
    state
        .registry
        .remove_with(leaver, |removal| {
            state.broadcast(
                &removal.remaining,
                &ServerMessage::UserDisconnected {
                    connection_id: leaver.clone(),
                },
            );

            if let Some(host) = &removal.promoted {
                state.broadcast(
                    &removal.remaining,
                    &ServerMessage::HostChanged {
                        connection_id: host.clone(),
                    },
                );
            }
        })
        .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RelayConfig;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn connect(state: &RelayState, name: &str) -> (ConnectionId, UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::from(name);
        let (tx, rx) = mpsc::unbounded_channel();
        state.register_connection(&id, tx);
        (id, rx)
    }

    fn join(state: &RelayState, id: &ConnectionId, display_name: &str) {
        handle_client_message(
            state,
            id,
            ClientMessage::JoinRoom {
                display_name: display_name.to_string(),
            },
        );
    }

    fn disconnect(state: &RelayState, id: &ConnectionId) {
        handle_leave_room(state, id);
        state.unregister_connection(id);
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[test]
    fn test_two_party_scenario() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state, "conn-a");
        let (b, mut rx_b) = connect(&state, "conn-b");

        join(&state, &a, "Alice");
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::AllUsers {
                connection_id: a.clone(),
                users: vec![],
                is_host: true,
            }]
        );

        join(&state, &b, "Bob");
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::AllUsers {
                connection_id: b.clone(),
                users: vec![RosterEntry {
                    connection_id: a.clone(),
                    display_name: "Alice".to_string(),
                    is_host: true,
                }],
                is_host: false,
            }]
        );
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::UserJoined {
                connection_id: b.clone(),
                display_name: "Bob".to_string(),
                is_host: false,
            }]
        );

        let offer = json!({"type": "offer", "sdp": "v=0 offer"});
        handle_client_message(
            &state,
            &a,
            ClientMessage::Offer {
                description: offer.clone(),
                to: b.clone(),
            },
        );
        assert_eq!(
            drain(&mut rx_b),
            vec![ServerMessage::Offer {
                description: offer,
                from: a.clone(),
            }]
        );

        let answer = json!({"type": "answer", "sdp": "v=0 answer"});
        handle_client_message(
            &state,
            &b,
            ClientMessage::Answer {
                description: answer.clone(),
                to: a.clone(),
            },
        );
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::Answer {
                description: answer,
                from: b.clone(),
            }]
        );

        disconnect(&state, &a);
        assert_eq!(
            drain(&mut rx_b),
            vec![
                ServerMessage::UserDisconnected {
                    connection_id: a.clone(),
                },
                ServerMessage::HostChanged {
                    connection_id: b.clone(),
                },
            ]
        );

        let (c, mut rx_c) = connect(&state, "conn-c");
        join(&state, &c, "Carol");
        match drain(&mut rx_c).as_slice() {
            [ServerMessage::AllUsers { users, is_host, .. }] => {
                assert!(!is_host);
                assert_eq!(users.len(), 1);
                assert_eq!(users[0].connection_id, b);
            }
            other => panic!("Unexpected messages: {:?}", other),
        }
    }

    #[test]
    fn test_room_full_rejection_leaves_members_untouched() {
        let state = RelayState::new(RelayConfig {
            room_capacity: 2,
            ..RelayConfig::default()
        });
        let (a, mut rx_a) = connect(&state, "conn-a");
        let (b, mut rx_b) = connect(&state, "conn-b");
        let (c, mut rx_c) = connect(&state, "conn-c");
        join(&state, &a, "Alice");
        join(&state, &b, "Bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        join(&state, &c, "Carol");
        assert_eq!(drain(&mut rx_c), vec![ServerMessage::RoomFull]);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
        assert_eq!(state.registry.len(), 2);

        // The refused connection leaving produces no broadcast.
        disconnect(&state, &c);
        assert!(drain(&mut rx_a).is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_leave_unknown_produces_no_broadcast() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state, "conn-a");
        join(&state, &a, "Alice");
        drain(&mut rx_a);

        assert!(!handle_leave_room(&state, &ConnectionId::from("stranger")));
        assert!(drain(&mut rx_a).is_empty());
    }

    #[test]
    fn test_leave_room_then_rejoin() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state, "conn-a");
        let (b, mut rx_b) = connect(&state, "conn-b");
        join(&state, &a, "Alice");
        join(&state, &b, "Bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        handle_client_message(&state, &b, ClientMessage::LeaveRoom);
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerMessage::UserDisconnected {
                connection_id: b.clone(),
            }]
        );
        // Second leave is a no-op.
        handle_client_message(&state, &b, ClientMessage::LeaveRoom);
        assert!(drain(&mut rx_a).is_empty());

        join(&state, &b, "Bob");
        assert!(matches!(
            drain(&mut rx_b).as_slice(),
            [ServerMessage::AllUsers { is_host: false, .. }]
        ));
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerMessage::UserJoined { .. }]
        ));
    }

    #[test]
    fn test_duplicate_join_reports_error() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state, "conn-a");
        join(&state, &a, "Alice");
        drain(&mut rx_a);

        join(&state, &a, "Alice");
        assert!(matches!(
            drain(&mut rx_a).as_slice(),
            [ServerMessage::Error { .. }]
        ));
        assert_eq!(state.registry.len(), 1);
    }

    #[test]
    fn test_relay_works_before_joining() {
        let state = RelayState::new(RelayConfig::default());
        let (a, _rx_a) = connect(&state, "conn-a");
        let (b, mut rx_b) = connect(&state, "conn-b");

        handle_client_message(
            &state,
            &a,
            ClientMessage::IceCandidate {
                candidate: json!({"candidate": "c1"}),
                to: b.clone(),
            },
        );
        assert!(matches!(
            drain(&mut rx_b).as_slice(),
            [ServerMessage::IceCandidate { from, .. }] if from == &a
        ));
    }

    #[test]
    fn test_ping_pong() {
        let state = RelayState::new(RelayConfig::default());
        let (a, mut rx_a) = connect(&state, "conn-a");
        handle_client_message(&state, &a, ClientMessage::Ping);
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::Pong]);
    }

    /// Replays one connection's inbox and checks every notice agrees with the
    /// roster it was admitted with.
    fn assert_consistent_view(me: &ConnectionId, inbox: Vec<ServerMessage>) {
        let mut known: Option<std::collections::HashSet<ConnectionId>> = None;
        for message in inbox {
            match message {
                ServerMessage::AllUsers { users, .. } => {
                    known = Some(users.into_iter().map(|u| u.connection_id).collect());
                }
                ServerMessage::UserJoined { connection_id, .. } => {
                    let known = known.as_mut().expect("user-joined before all-users");
                    assert!(known.insert(connection_id), "{} told of a duplicate join", me);
                }
                ServerMessage::UserDisconnected { connection_id } => {
                    let known = known.as_mut().expect("user-disconnected before all-users");
                    assert!(known.remove(&connection_id), "{} told of an unknown departure", me);
                }
                ServerMessage::HostChanged { connection_id } => {
                    let known = known.as_ref().expect("host-changed before all-users");
                    assert!(&connection_id == me || known.contains(&connection_id));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn test_concurrent_churn_keeps_notices_ordered() {
        let state = RelayState::new(RelayConfig::default());
        let members: Vec<_> = (0..8)
            .map(|n| connect(&state, &format!("conn-{}", n)))
            .collect();

        std::thread::scope(|scope| {
            for (id, _) in &members {
                let state = &state;
                scope.spawn(move || {
                    for _ in 0..200 {
                        join(state, id, "churn");
                        handle_client_message(state, id, ClientMessage::LeaveRoom);
                    }
                });
            }
        });

        assert!(state.registry.is_empty());
        for (id, mut rx) in members {
            assert_consistent_view(&id, drain(&mut rx));
        }
    }
}
