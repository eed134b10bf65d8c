use crate::backend::TransportError;
use crate::config::RegistryError;
use thiserror::Error;

/// The top level error type of the crate.
#[derive(Error, Debug)]
pub enum Error {
    #[error("no node or property named '{0}'")]
    NotFound(String),
    #[error("target {0} is not ready for operations, probe it first")]
    TargetNotReady(String),
    #[error("transport failure")]
    Transport(#[from] TransportError),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("remote protocol error: {0}")]
    Protocol(String),
    #[error("unable to load a system description")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
