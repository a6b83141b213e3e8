use thiserror::Error;

/// Errors surfaced by the broker's public API.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The broker has shut down and no longer accepts connections.
    #[error("broker is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, BrokerError>;
