use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}: {1}")]
    KubeError(String, #[source] Box<kube::Error>),

    #[error("unsupported network container quantity {0}: exactly one NC per node is supported")]
    UnsupportedNcQuantity(usize),

    #[error("{0}: {1}")]
    AddrParseError(String, #[source] std::net::AddrParseError),

    #[error("{0}: {1}")]
    PrefixParseError(String, #[source] ipnet::AddrParseError),

    #[error("network container programming failed: {0}")]
    DataplaneError(&'static str),

    #[error(transparent)]
    IpamError(#[from] cnsd_ipam::error::Error),
}

impl Error {
    /// Validation errors are permanent: retrying the same NNC cannot fix a
    /// malformed address or an unsupported shape.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedNcQuantity(_)
                | Error::AddrParseError(..)
                | Error::PrefixParseError(..)
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
