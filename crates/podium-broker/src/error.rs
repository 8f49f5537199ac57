use thiserror::Error;

use podium_wire::WireError;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("command endpoint bind failed on {endpoint}: {reason}")]
    Bind { endpoint: String, reason: String },
    #[error("could not reach the coordinator: {0}")]
    Connect(String),
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
    #[error("no response within {0}ms, peer may not be alive")]
    ResponseTimeout(u64),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
