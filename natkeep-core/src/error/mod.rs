use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io")]
    Io(#[from] io::Error),
    #[error("stun request timed out")]
    Timeout,
    #[error("invalid stun response: {0}")]
    InvalidResponse(String),
    #[error("channel closed")]
    ChannelClosed,
}

pub type Result<T, E = Error> = ::std::result::Result<T, E>;
