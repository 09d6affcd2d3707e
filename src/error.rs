use natkeep_core::nat::NatType;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("resolve {server}: {source}")]
    Resolve {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("resolve {0}: no address")]
    Unresolved(String),
    #[error("{0}: no address")]
    NoAddress(String),
    #[error("{server}: bad result: {nat_type}")]
    BadResult { server: String, nat_type: NatType },
    #[error("not punchable: {0}")]
    NotPunchable(NatType),
    #[error("unreasonably low keepalive: {0:?}")]
    KeepaliveTooLow(Duration),
    #[error("disabled")]
    Disabled,
    #[error("shutdown")]
    Shutdown,
    #[error(transparent)]
    Stun(#[from] natkeep_core::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
