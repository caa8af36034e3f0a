use crate::ipconfig::IpConfigState;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no available IP configurations")]
    NoAvailableIps,

    #[error("{0} not found")]
    NotFound(String),

    #[error("requested {requested} IP configurations to release, only {marked} were available")]
    InsufficientAvailable { requested: usize, marked: usize },

    #[error("invalid state transition {from} -> {to} for IP configuration {id}")]
    InvalidStateTransition {
        id: String,
        from: IpConfigState,
        to: IpConfigState,
    },

    #[error("IP address {0} is not available")]
    IpNotAvailable(String),

    #[error("{0}: {1}")]
    AddrParseError(String, #[source] std::net::AddrParseError),

    #[error("{0}: {1}")]
    PrefixParseError(String, #[source] ipnet::AddrParseError),

    #[error("{0}: {1}")]
    SerializationError(String, #[source] serde_json::Error),

    #[error("{0}: {1}")]
    ConfigError(String, #[source] std::io::Error),

    #[error("{0}")]
    InvalidConfiguration(String),

    #[error("spec update failed: {0}")]
    SpecWrite(#[source] Box<dyn std::error::Error + Send + Sync>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
