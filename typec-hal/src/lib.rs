#![doc = include_str!("../README.md")]

pub mod autosuspend;
pub mod config;
pub mod coordinator;
mod dispatcher;
pub mod gadget;
pub mod observer;
pub mod props;
pub mod role_switch;
pub mod status;
pub mod sysfs;
pub mod types;
pub mod uevent;

use std::num::ParseIntError;

use rustix::io::Errno;
use thiserror::Error;

pub use coordinator::Coordinator;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("I/O: {0}")]
    Io(std::io::ErrorKind),
    #[error("parse error")]
    Parse,
    #[error("invalid port name {0:?}")]
    InvalidPortName(String),
    #[error("timed out waiting for a partner to attach")]
    Timeout,
    #[error("unrecognized role {0:?}")]
    UnrecognizedRole(String),
    #[error("role reads back as {actual:?} instead of {expected:?}")]
    RoleNotApplied { expected: String, actual: String },
    #[error("no Type-C ports found")]
    NoPorts,
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value.kind())
    }
}

impl From<Errno> for Error {
    fn from(value: Errno) -> Self {
        std::io::Error::from(value).into()
    }
}

impl From<nix::errno::Errno> for Error {
    fn from(value: nix::errno::Errno) -> Self {
        Errno::from_raw_os_error(value as i32).into()
    }
}

impl From<strum::ParseError> for Error {
    fn from(_: strum::ParseError) -> Self {
        Error::Parse
    }
}

impl From<ParseIntError> for Error {
    fn from(_: ParseIntError) -> Self {
        Error::Parse
    }
}

pub type Result<T> = std::result::Result<T, Error>;
