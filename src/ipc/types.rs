use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;
use tokio::task::JoinHandle;

use crate::api::HttpAttendanceApi;
use crate::config::Config;
use crate::connectivity::ConnectivityMonitor;
use crate::device::{DeviceIdentity, Prefs};
use crate::notices::Notices;
use crate::permissions::PermissionGate;
use crate::platform::HostPlatform;
use crate::scan::ScanSession;
use crate::store::RecordStore;
use crate::sync::SyncEngine;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything bound to the selected workspace. Dropping it stops its
/// background tasks and releases the camera.
pub struct WorkspaceCore {
    pub path: PathBuf,
    pub store: Arc<RecordStore>,
    pub sync: Arc<SyncEngine>,
    pub scan: Arc<ScanSession>,
    pub tasks: Vec<JoinHandle<()>>,
}

impl Drop for WorkspaceCore {
    fn drop(&mut self) {
        self.scan.stop();
        self.sync.shutdown();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub platform: Arc<HostPlatform>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub permissions: Arc<PermissionGate>,
    pub api: Arc<HttpAttendanceApi>,
    pub notices: Arc<Notices>,
    /// Set when the device id lives outside the workspaces.
    pub device_identity: Option<Arc<DeviceIdentity>>,
    pub core: Option<WorkspaceCore>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let platform = Arc::new(HostPlatform::new(config.user_agent.clone()));
        let api = HttpAttendanceApi::new(
            config.api_base_url.clone(),
            config.access_token.clone(),
            config.request_timeout,
            &config.user_agent,
        )?;
        Ok(Self {
            permissions: Arc::new(PermissionGate::new(platform.clone())),
            platform,
            connectivity: Arc::new(ConnectivityMonitor::new(false)),
            api: Arc::new(api),
            notices: Arc::new(Notices::new()),
            device_identity: config
                .device_prefs
                .clone()
                .map(|path| Arc::new(DeviceIdentity::new(Prefs::new(path)))),
            core: None,
            config,
        })
    }

    pub fn workspace(&self) -> Option<&PathBuf> {
        self.core.as_ref().map(|c| &c.path)
    }
}
