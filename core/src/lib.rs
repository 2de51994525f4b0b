//! Core building blocks for the nextnet scanner: address range expansion, the shared
//! rate limiter, the probe capability set and the pipeline that wires them together.

pub mod error;
pub mod pipeline;
pub mod probe;
pub mod range;
pub mod ratelimiter;
pub mod result;

pub use error::{ProbeError, RangeError};
pub use pipeline::{Pipeline, RunSummary};
pub use probe::{Probe, ProbeBase};
pub use ratelimiter::RateLimiter;
pub use result::{ResultSink, ScanResult};

pub const fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
