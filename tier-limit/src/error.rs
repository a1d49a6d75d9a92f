/// Errors from [`CircularQueue`](crate::CircularQueue) operations.
///
/// These never escape the crate's admission APIs: `Full` becomes a rejection
/// and `Empty` means there was nothing to prune.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is full")]
    Full,
    #[error("queue is empty")]
    Empty,
}

/// Reasons a string could not be parsed as a dotted-decimal IPv4 address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpError {
    #[error("empty address")]
    Empty,
    #[error("expected 4 octets, found {0}")]
    OctetCount(usize),
    #[error("invalid octet {0:?}")]
    InvalidOctet(String),
    /// IPv6 addresses cannot be folded into a 32 bit key.
    #[error("IPv6 address {0:?} is not supported for keying")]
    Ipv6Unsupported(String),
}

/// Errors produced while loading rule or limiter configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid duration {value:?}: {source}")]
    InvalidDuration {
        value: String,
        #[source]
        source: humantime::DurationError,
    },

    #[error("a rule configuration needs at least one window")]
    EmptyRules,
}
