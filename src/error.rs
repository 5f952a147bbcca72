//! Error types for gateway-scan.

use thiserror::Error;

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Rule code outside the enumerated scan patterns.
    #[error("invalid scan rule code: {0}")]
    InvalidRule(u8),

    /// Base prefix that cannot be turned into octets for the selected rule.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A config line that does not have the `base_ip:port,rule_code` shape.
    #[error("line {line}: {reason}")]
    InvalidConfigLine { line: usize, reason: String },

    /// The decode-probe executable could not be run.
    #[error("decode probe unavailable: {0}")]
    ProbeUnavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
