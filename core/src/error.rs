use thiserror::Error;

/// Failures while turning target text into addresses.
#[derive(Debug, Error)]
pub enum RangeError {
    #[error("invalid IPv4 address: {0}")]
    InvalidAddress(String),
    #[error("start address {start} is bigger than end address {end}")]
    InvalidRange { start: String, end: String },
    #[error("invalid CIDR {text}: {reason}")]
    InvalidCidr { text: String, reason: String },
    #[error("not an IPv4 block: {0}")]
    NotIpv4(String),
    #[error("address consumer went away")]
    SinkClosed,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe input is closed")]
    InputClosed,
    #[error("probe has no output channel")]
    NoOutput,
    #[error("probe was not set up")]
    NotInitialized,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
