use std::time::Duration;

use thiserror::Error;

use crate::types::FacingMode;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("failed to acquire {} camera: {source}", facing.label())]
    Device {
        facing: FacingMode,
        #[source]
        source: anyhow::Error,
    },
    #[error("no video frame within {0:?}")]
    NotReady(Duration),
    #[error("tracking backend setup failed: {0}")]
    BackendSetup(#[source] anyhow::Error),
    #[error("tracking backend is no longer available")]
    BackendLost,
}

pub type Result<T, E = TrackingError> = std::result::Result<T, E>;
