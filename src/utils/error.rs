//! Customized unified error type.

use std::fmt;
use std::io;
use std::net;

/// Customized error type for Shardset.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ShardsetError(pub String);

impl ShardsetError {
    /// Constructs an error from any message-like thing.
    pub fn msg(msg: impl ToString) -> Self {
        ShardsetError(msg.to_string())
    }
}

impl fmt::Display for ShardsetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0) // do not display literal quotes
    }
}

impl std::error::Error for ShardsetError {}

// Helper macro for saving boiler-plate `impl From<T>`s for transparent
// conversion from various common error types to `ShardsetError`.
macro_rules! impl_from_error {
    ($error:ty) => {
        impl From<$error> for ShardsetError {
            fn from(e: $error) -> Self {
                // just store the source error's string representation
                ShardsetError(e.to_string())
            }
        }
    };
}

impl_from_error!(io::Error);
impl_from_error!(net::AddrParseError);
impl_from_error!(rmp_serde::encode::Error);
impl_from_error!(rmp_serde::decode::Error);
impl_from_error!(toml::ser::Error);
impl_from_error!(toml::de::Error);
impl_from_error!(tokio::task::JoinError);

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn error_display() {
        let e = ShardsetError("shard 3 has no owner".into());
        assert_eq!(format!("{}", e), String::from("shard 3 has no owner"));
    }

    #[test]
    fn from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::ConnectionReset, "gone");
        let e = ShardsetError::from(io_error);
        assert!(e.0.contains("gone"));
    }
}
