use thiserror::Error;

/// Terminal failures of a single scan attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("QR code is not a valid session descriptor: {0}")]
    MalformedPayload(String),
    #[error("QR code has expired")]
    ExpiredQrCode,
    #[error("camera permission is required for QR scanning")]
    CameraPermissionDenied,
    #[error("location permission is required for attendance marking")]
    LocationPermissionDenied,
    #[error("attendance could not be stored offline: {0}")]
    StorageUnavailable(String),
    #[error("no scan is in progress")]
    NotScanning,
}

impl CaptureError {
    pub fn code(&self) -> &'static str {
        match self {
            CaptureError::MalformedPayload(_) => "malformed_payload",
            CaptureError::ExpiredQrCode => "expired_qr_code",
            CaptureError::CameraPermissionDenied => "camera_permission_denied",
            CaptureError::LocationPermissionDenied => "location_permission_denied",
            CaptureError::StorageUnavailable(_) => "storage_unavailable",
            CaptureError::NotScanning => "not_scanning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("attendance store unavailable: {0}")]
    Unavailable(String),
    #[error("attendance record {0} not found")]
    RecordNotFound(i64),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Unavailable(_) => "storage_unavailable",
            StoreError::RecordNotFound(_) => "record_not_found",
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Failures talking to the remote attendance API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),
    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("device is offline")]
    Offline,
    #[error("sync failed: {0}")]
    Failed(String),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Offline => "offline",
            SyncError::Failed(_) => "sync_failed",
        }
    }
}
