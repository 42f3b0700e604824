//! # Error Handling
//!
//! Error types for meshcall Core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Room Errors (100-199)                                                  │
//! │   ├── RoomFull                    - Admission refused, terminal         │
//! │   └── InvalidDisplayName          - Empty or over-long name             │
//! │                                                                         │
//! │  Media Errors (200-299)                                                 │
//! │   ├── MediaAccessDenied           - Capture refused, terminal           │
//! │   └── MediaReleased               - Local capture already stopped       │
//! │                                                                         │
//! │  Negotiation Errors (300-399)                                           │
//! │   ├── MalformedNegotiationPayload - Message discarded                   │
//! │   ├── UnexpectedNegotiationMessage- Wrong state, message discarded      │
//! │   ├── TransportFailed             - Transport capability failed         │
//! │   └── SessionClosed               - Session already torn down           │
//! │                                                                         │
//! │  Signaling Errors (400-499)                                             │
//! │   ├── NotConnected                - No link to the relay                │
//! │   ├── ConnectionFailed            - Could not reach the relay           │
//! │   └── ProtocolError               - Relay reported an error             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing in the core retries automatically. Negotiation errors are logged
//! and the offending message dropped; the session keeps running until the
//! next membership event changes its fate.

use thiserror::Error;

use crate::session::NegotiationState;

/// Result type alias for meshcall Core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for meshcall Core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Room Errors (100-199)
    // ========================================================================

    /// The room is at capacity
    #[error("The room is full.")]
    RoomFull,

    /// The display name is empty or too long
    #[error("Invalid display name: {0}")]
    InvalidDisplayName(String),

    // ========================================================================
    // Media Errors (200-299)
    // ========================================================================

    /// The capture collaborator refused access to camera/microphone
    #[error("Unable to access camera/microphone: {0}")]
    MediaAccessDenied(String),

    /// Local capture has already been released
    #[error("Local media has already been released.")]
    MediaReleased,

    // ========================================================================
    // Negotiation Errors (300-399)
    // ========================================================================

    /// A relayed description or candidate could not be understood
    #[error("Malformed negotiation payload: {0}")]
    MalformedNegotiationPayload(String),

    /// A negotiation message arrived in a state that cannot accept it
    #[error("Unexpected {message} while {state}")]
    UnexpectedNegotiationMessage {
        state: NegotiationState,
        message: &'static str,
    },

    /// The media transport reported a failure
    #[error("Media transport failed: {0}")]
    TransportFailed(String),

    /// The session has been closed
    #[error("Session with {0} is closed.")]
    SessionClosed(String),

    // ========================================================================
    // Signaling Errors (400-499)
    // ========================================================================

    /// No signaling connection is open
    #[error("Not connected to the relay.")]
    NotConnected,

    /// Connecting to the relay failed
    #[error("Failed to connect to the relay: {0}")]
    ConnectionFailed(String),

    /// The relay reported an error
    #[error("Relay protocol error: {0}")]
    ProtocolError(String),

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================

    /// Serialization failed
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Numeric error code, grouped by category.
    pub fn code(&self) -> i32 {
        match self {
            Error::RoomFull => 100,
            Error::InvalidDisplayName(_) => 101,

            Error::MediaAccessDenied(_) => 200,
            Error::MediaReleased => 201,

            Error::MalformedNegotiationPayload(_) => 300,
            Error::UnexpectedNegotiationMessage { .. } => 301,
            Error::TransportFailed(_) => 302,
            Error::SessionClosed(_) => 303,

            Error::NotConnected => 400,
            Error::ConnectionFailed(_) => 401,
            Error::ProtocolError(_) => 402,

            Error::SerializationError(_) => 900,
            Error::Internal(_) => 901,
        }
    }

    /// Whether the session survives this error.
    ///
    /// Recoverable errors cost the offending message only; the next event
    /// from the relay proceeds normally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::MalformedNegotiationPayload(_)
                | Error::UnexpectedNegotiationMessage { .. }
                | Error::TransportFailed(_)
                | Error::ProtocolError(_)
        )
    }

    /// Check if this error must be shown to the user
    pub fn requires_user_action(&self) -> bool {
        matches!(
            self,
            Error::RoomFull | Error::MediaAccessDenied(_) | Error::InvalidDisplayName(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::ConnectionFailed(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
