//! Negotiation relay.
//!
//! Stateless per-message forwarding of offers, answers and network
//! candidates. The sender field is always the connection the message arrived
//! on; the payload passes through untouched. A target that is not connected is
//! dropped silently: its own departure notice reconciles the sender.

use serde_json::Value;

use crate::protocol::{ConnectionId, SignalKind};
use crate::state::RelayState;

/// Forward one negotiation message. Returns true if it was queued for the
/// target.
pub fn relay(
    state: &RelayState,
    kind: SignalKind,
    payload: Value,
    from: &ConnectionId,
    to: &ConnectionId,
) -> bool {
    let message = kind.into_server_message(payload, from.clone());

    if state.send_to_client(to, message) {
        tracing::debug!(kind = %kind, from = %from, to = %to, "Relayed negotiation message");
        true
    } else {
        tracing::debug!(kind = %kind, from = %from, to = %to, "Relay target not connected, dropped");
        false
    }
}
