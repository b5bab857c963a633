//! Crate error type.
//!
//! Only call-setup failures and resource exhaustion surface as errors; the
//! per-frame paths log and continue so a recoverable fault never drops the
//! call.

use thiserror::Error;

/// Errors surfaced to the embedding SIP layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Socket bind/configure failure (fatal for the call).
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Could not spawn a dedicated thread (fatal for the call).
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        source: std::io::Error,
    },

    /// WebSocket connect/handshake failure.
    #[error("AI connection failed: {0}")]
    AiConnect(String),

    /// The RTP payload type offered by the peer is not G.711.
    #[error("unsupported RTP payload type {0}")]
    UnsupportedPayloadType(u8),
}
