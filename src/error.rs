use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AgentError>;

/// Everything that can go wrong inside the agent.
///
/// Only configuration and keyring construction errors are fatal; they are
/// raised once, at startup. Runtime transport and crypto failures are counted
/// and swallowed by the transport task — a peer going `Faulty` is the only
/// failure the protocol surfaces to consumers.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("keyring requires at least one key")]
    EmptyKeyring,

    #[error("keyring keys must be 32 octets, got {0}")]
    BadKeyLength(usize),

    /// The datagram failed authentication against every key in the ring.
    #[error("datagram failed verification")]
    FailedVerification,

    #[error("malformed message: {0}")]
    Malformed(#[from] bincode::error::DecodeError),

    #[error("message encoding failed: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The detector actor is gone; the agent has been shut down.
    #[error("agent terminated")]
    Terminated,
}
