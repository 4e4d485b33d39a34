use async_trait::async_trait;
use thiserror::Error;

use crate::errors::PeerCamError;
use crate::media::MediaStream;
use crate::types::{DeviceInfo, MediaConstraints};

/// Why a capture request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureFailure {
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("device busy: {0}")]
    DeviceBusy(String),
    #[error("constraints not satisfiable: {0}")]
    Overconstrained(String),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("capture failed: {0}")]
    Other(String),
}

impl From<CaptureFailure> for PeerCamError {
    fn from(failure: CaptureFailure) -> Self {
        match failure {
            CaptureFailure::PermissionDenied(msg) => PeerCamError::PermissionDenied(msg),
            other => PeerCamError::DeviceUnavailable(other.to_string()),
        }
    }
}

/// Capture boundary implemented by the host platform
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>, CaptureFailure>;

    /// Request an audio+video stream satisfying `constraints` as closely as possible
    async fn get_user_media(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<MediaStream, CaptureFailure>;
}
