use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::CaptureError;
use crate::platform::{Capability, DevicePlatform, PermissionState, PlatformError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionStatus {
    pub camera: PermissionState,
    pub geolocation: PermissionState,
}

impl PermissionStatus {
    pub fn get(&self, capability: Capability) -> PermissionState {
        match capability {
            Capability::Camera => self.camera,
            Capability::Geolocation => self.geolocation,
        }
    }

    fn set(&mut self, capability: Capability, state: PermissionState) {
        match capability {
            Capability::Camera => self.camera = state,
            Capability::Geolocation => self.geolocation = state,
        }
    }

    /// Scanning needs both capabilities.
    pub fn can_scan(&self) -> bool {
        self.camera == PermissionState::Granted && self.geolocation == PermissionState::Granted
    }

    /// The error a scan start should surface, camera first.
    pub fn missing(&self) -> Option<CaptureError> {
        if self.camera != PermissionState::Granted {
            Some(CaptureError::CameraPermissionDenied)
        } else if self.geolocation != PermissionState::Granted {
            Some(CaptureError::LocationPermissionDenied)
        } else {
            None
        }
    }
}

pub struct PermissionGate {
    platform: Arc<dyn DevicePlatform>,
    status: watch::Sender<PermissionStatus>,
}

impl PermissionGate {
    pub fn new(platform: Arc<dyn DevicePlatform>) -> Self {
        let (status, _) = watch::channel(PermissionStatus::default());
        Self { platform, status }
    }

    pub fn status(&self) -> PermissionStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PermissionStatus> {
        self.status.subscribe()
    }

    /// Grant-change notification from the platform. Returns whether anything moved.
    pub fn apply_change(&self, capability: Capability, state: PermissionState) -> bool {
        let changed = self.status.send_if_modified(|s| {
            if s.get(capability) == state {
                return false;
            }
            s.set(capability, state);
            true
        });
        if changed {
            tracing::info!(?capability, ?state, "permission changed");
        }
        changed
    }

    /// Queries current grants without prompting. A failed query keeps the
    /// last known state for that capability.
    pub async fn check(&self) -> PermissionStatus {
        for capability in [Capability::Camera, Capability::Geolocation] {
            match self.platform.query_permission(capability).await {
                Ok(state) => {
                    self.apply_change(capability, state);
                }
                Err(e) => {
                    tracing::warn!(?capability, error = %e, "permission query failed");
                }
            }
        }
        self.status()
    }

    /// Prompts for camera, then geolocation, stopping at the first refusal.
    pub async fn request(&self) -> Result<PermissionStatus, CaptureError> {
        let current = self.status();

        if current.camera != PermissionState::Granted {
            match self.platform.open_camera().await {
                Ok(mut stream) => {
                    stream.close();
                    self.apply_change(Capability::Camera, PermissionState::Granted);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "camera permission refused");
                    if e == PlatformError::Denied {
                        self.apply_change(Capability::Camera, PermissionState::Denied);
                    }
                    return Err(CaptureError::CameraPermissionDenied);
                }
            }
        }

        if current.geolocation != PermissionState::Granted {
            match self.platform.current_position().await {
                Ok(_) => {
                    self.apply_change(Capability::Geolocation, PermissionState::Granted);
                }
                Err(PlatformError::Denied) => {
                    tracing::warn!("location permission refused");
                    self.apply_change(Capability::Geolocation, PermissionState::Denied);
                    return Err(CaptureError::LocationPermissionDenied);
                }
                Err(PlatformError::Unavailable(msg)) => {
                    // Answered, but no fix yet; the grant itself is decided by the re-check.
                    tracing::warn!(reason = %msg, "location prompt returned no position");
                }
            }
        }

        Ok(self.check().await)
    }
}
