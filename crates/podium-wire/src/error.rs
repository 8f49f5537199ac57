use thiserror::Error;

#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame exhausted before the value was complete")]
    Exhausted,
    #[error("varint longer than 10 bytes")]
    VarintOverflow,
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("unknown code {code} for {what}")]
    UnknownCode { what: &'static str, code: i64 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
