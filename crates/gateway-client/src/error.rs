//! Client error types

use crate::transport::TransportError;
use gateway_common::AppError;
use thiserror::Error;

/// Failures that stop the client before it reaches its run loop
///
/// Failures after the first connection are handled by the session state
/// machine and end in an exit reason instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Gateway URL could not be resolved: {0}")]
    Resolve(#[source] TransportError),

    #[error("Could not connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: TransportError,
    },
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        AppError::connection(err)
    }
}
