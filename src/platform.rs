//! Device capabilities the capture path depends on.
//!
//! Business logic only ever sees [`DevicePlatform`]; the sidecar plugs in a
//! [`HostPlatform`] fed by the UI shell, tests plug in fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

use crate::model::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    Camera,
    Geolocation,
}

impl Capability {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "camera" => Some(Capability::Camera),
            "geolocation" | "location" => Some(Capability::Geolocation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PermissionState {
    #[default]
    Unknown,
    Granted,
    Denied,
}

impl PermissionState {
    /// Accepts browser permission-query vocabulary; "prompt" is not yet decided.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "granted" => Some(PermissionState::Granted),
            "denied" => Some(PermissionState::Denied),
            "unknown" | "prompt" => Some(PermissionState::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("permission denied")]
    Denied,
    #[error("unavailable: {0}")]
    Unavailable(String),
}

/// An open capture stream. `close` must tolerate repeated calls.
pub trait CameraStream: Send {
    fn close(&mut self);
}

#[async_trait]
pub trait DevicePlatform: Send + Sync {
    /// Current grant, without prompting.
    async fn query_permission(&self, capability: Capability)
        -> Result<PermissionState, PlatformError>;

    async fn open_camera(&self) -> Result<Box<dyn CameraStream>, PlatformError>;

    async fn current_position(&self) -> Result<Location, PlatformError>;

    fn user_agent(&self) -> String;
}

#[derive(Debug, Default)]
struct HostState {
    camera: PermissionState,
    geolocation: PermissionState,
    fix: Option<Location>,
}

/// Platform whose signals are pushed in by the UI shell over IPC.
///
/// The shell owns the real prompts and the camera widget; this side only
/// remembers what it was told and counts streams it handed out.
pub struct HostPlatform {
    state: Mutex<HostState>,
    open_streams: Arc<AtomicUsize>,
    user_agent: String,
}

impl HostPlatform {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            open_streams: Arc::new(AtomicUsize::new(0)),
            user_agent: user_agent.into(),
        }
    }

    pub fn report_permission(&self, capability: Capability, state: PermissionState) {
        let mut s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match capability {
            Capability::Camera => s.camera = state,
            Capability::Geolocation => s.geolocation = state,
        }
    }

    pub fn report_location(&self, fix: Option<Location>) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fix = fix;
    }

    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    fn grant(&self, capability: Capability) -> PermissionState {
        let s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match capability {
            Capability::Camera => s.camera,
            Capability::Geolocation => s.geolocation,
        }
    }
}

struct HostCameraStream {
    open_streams: Arc<AtomicUsize>,
    closed: bool,
}

impl CameraStream for HostCameraStream {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for HostCameraStream {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl DevicePlatform for HostPlatform {
    async fn query_permission(
        &self,
        capability: Capability,
    ) -> Result<PermissionState, PlatformError> {
        Ok(self.grant(capability))
    }

    async fn open_camera(&self) -> Result<Box<dyn CameraStream>, PlatformError> {
        if self.grant(Capability::Camera) != PermissionState::Granted {
            return Err(PlatformError::Denied);
        }
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(HostCameraStream {
            open_streams: Arc::clone(&self.open_streams),
            closed: false,
        }))
    }

    async fn current_position(&self) -> Result<Location, PlatformError> {
        let s = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if s.geolocation != PermissionState::Granted {
            return Err(PlatformError::Denied);
        }
        s.fix
            .ok_or_else(|| PlatformError::Unavailable("no position fix reported".to_string()))
    }

    fn user_agent(&self) -> String {
        self.user_agent.clone()
    }
}
