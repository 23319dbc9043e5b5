use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::AttendanceApi;
use crate::connectivity::ConnectivityMonitor;
use crate::error::CaptureError;
use crate::model::{AttendanceRecord, DeviceInfo};
use crate::notices::{NoticeKind, Notices};
use crate::permissions::{PermissionGate, PermissionStatus};
use crate::platform::{CameraStream, DevicePlatform};
use crate::qr;
use crate::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanPhase {
    Idle,
    Scanning,
    Success,
    Failed,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "delivery", rename_all = "camelCase")]
pub enum Delivery {
    Online {
        response: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    StoredOffline {
        pending_id: i64,
        /// Set when a live submission was attempted and failed.
        submission_error: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSuccess {
    pub record: AttendanceRecord,
    #[serde(flatten)]
    pub delivery: Delivery,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStatus {
    pub phase: ScanPhase,
    pub student_id: Option<i64>,
    pub camera_active: bool,
    pub last_error: Option<String>,
}

struct SessionState {
    phase: ScanPhase,
    student_id: Option<i64>,
    camera: Option<Box<dyn CameraStream>>,
    /// Bumped on every start/stop so late results from a torn-down
    /// activation can be recognised.
    epoch: u64,
    last_error: Option<CaptureError>,
}

impl SessionState {
    fn release_camera(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.close();
        }
    }
}

/// One camera activation at a time: start, a single decode, then back to idle.
pub struct ScanSession {
    gate: Arc<PermissionGate>,
    platform: Arc<dyn DevicePlatform>,
    connectivity: Arc<ConnectivityMonitor>,
    api: Arc<dyn AttendanceApi>,
    store: Arc<RecordStore>,
    notices: Arc<Notices>,
    state: Mutex<SessionState>,
}

impl ScanSession {
    pub fn new(
        gate: Arc<PermissionGate>,
        platform: Arc<dyn DevicePlatform>,
        connectivity: Arc<ConnectivityMonitor>,
        api: Arc<dyn AttendanceApi>,
        store: Arc<RecordStore>,
        notices: Arc<Notices>,
    ) -> Self {
        Self {
            gate,
            platform,
            connectivity,
            api,
            store,
            notices,
            state: Mutex::new(SessionState {
                phase: ScanPhase::Idle,
                student_id: None,
                camera: None,
                epoch: 0,
                last_error: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ScanStatus {
        let s = self.lock();
        ScanStatus {
            phase: s.phase,
            student_id: s.student_id,
            camera_active: s.camera.is_some(),
            last_error: s.last_error.as_ref().map(|e| e.code().to_string()),
        }
    }

    pub async fn start(&self, student_id: i64) -> Result<(), CaptureError> {
        if let Some(missing) = self.gate.status().missing() {
            self.notices.push(NoticeKind::PermissionRequired, missing.to_string());
            return Err(missing);
        }
        let epoch = {
            let s = self.lock();
            if s.phase == ScanPhase::Scanning {
                tracing::debug!("scan already active");
                return Ok(());
            }
            s.epoch
        };

        let mut camera = match self.platform.open_camera().await {
            Ok(camera) => camera,
            Err(e) => {
                tracing::warn!(error = %e, "camera could not be opened");
                let err = CaptureError::CameraPermissionDenied;
                self.notices.push(NoticeKind::PermissionRequired, err.to_string());
                return Err(err);
            }
        };

        let mut s = self.lock();
        if s.epoch != epoch {
            tracing::debug!("scan was stopped while the camera opened");
            camera.close();
            return Ok(());
        }
        s.release_camera();
        s.camera = Some(camera);
        s.phase = ScanPhase::Scanning;
        s.student_id = Some(student_id);
        s.last_error = None;
        s.epoch += 1;
        tracing::info!(student_id, "scan started");
        Ok(())
    }

    /// Tears the activation down from any phase. Safe to repeat.
    pub fn stop(&self) {
        let mut s = self.lock();
        s.release_camera();
        if s.phase != ScanPhase::Idle {
            tracing::info!(phase = ?s.phase, "scan stopped");
        }
        s.phase = ScanPhase::Idle;
        s.student_id = None;
        s.epoch += 1;
    }

    /// Ends an active scan as soon as either grant is withdrawn.
    pub fn spawn_permission_watch(
        self: &Arc<Self>,
        mut grants: watch::Receiver<PermissionStatus>,
    ) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            while grants.changed().await.is_ok() {
                let Some(missing) = grants.borrow_and_update().missing() else {
                    continue;
                };
                if session.lock().phase != ScanPhase::Scanning {
                    continue;
                }
                tracing::info!(error = %missing, "permission withdrawn during scan");
                session.stop();
                session
                    .notices
                    .push(NoticeKind::PermissionRequired, missing.to_string());
            }
        })
    }

    /// Handles one decoded QR payload from the camera reader.
    pub async fn on_decode(&self, raw: &str) -> Result<ScanSuccess, CaptureError> {
        let (epoch, student_id) = {
            let mut s = self.lock();
            let (ScanPhase::Scanning, Some(student_id)) = (s.phase, s.student_id) else {
                return Err(CaptureError::NotScanning);
            };
            // The stream is consumed by its first decode.
            if s.camera.is_none() {
                return Err(CaptureError::NotScanning);
            }
            s.release_camera();
            (s.epoch, student_id)
        };

        let result = self.capture(raw, student_id, Utc::now()).await;

        let mut s = self.lock();
        if s.epoch != epoch {
            tracing::debug!("scan was torn down while capturing; leaving session untouched");
            return result;
        }
        match &result {
            Ok(success) => {
                s.phase = ScanPhase::Success;
                s.last_error = None;
                let (kind, message) = match &success.delivery {
                    Delivery::Online { .. } => {
                        (NoticeKind::RecordedOnline, "Attendance marked successfully")
                    }
                    Delivery::StoredOffline { .. } => (
                        NoticeKind::StoredOffline,
                        "Attendance stored offline and will be synced when online",
                    ),
                };
                self.notices.push(kind, message);
            }
            Err(e) => {
                s.phase = match e {
                    CaptureError::ExpiredQrCode => ScanPhase::Expired,
                    _ => ScanPhase::Failed,
                };
                s.last_error = Some(e.clone());
                let kind = match e {
                    CaptureError::ExpiredQrCode => NoticeKind::ExpiredQrCode,
                    CaptureError::StorageUnavailable(_) => NoticeKind::StorageUnavailable,
                    _ => NoticeKind::MalformedPayload,
                };
                self.notices.push(kind, e.to_string());
            }
        }
        result
    }

    async fn capture(
        &self,
        raw: &str,
        student_id: i64,
        now: DateTime<Utc>,
    ) -> Result<ScanSuccess, CaptureError> {
        let descriptor = qr::parse(raw)?;
        if qr::is_expired(&descriptor, now) {
            tracing::info!(qr_code = %descriptor.id, "rejected expired QR code");
            return Err(CaptureError::ExpiredQrCode);
        }

        let device_info = self.device_info(now).await;
        let record = AttendanceRecord::from_descriptor(&descriptor, student_id, device_info);

        let mut submission_error = None;
        if self.connectivity.is_online() {
            match self.api.mark_qr_attendance(&record).await {
                Ok(response) => {
                    tracing::info!(qr_code = %record.qr_code, student_id, "attendance marked online");
                    return Ok(ScanSuccess {
                        record,
                        delivery: Delivery::Online { response },
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "live submission failed, storing offline");
                    submission_error = Some(e.to_string());
                }
            }
        }

        let pending_id = self
            .store
            .store(&record)
            .map_err(|e| CaptureError::StorageUnavailable(e.to_string()))?;
        Ok(ScanSuccess {
            record,
            delivery: Delivery::StoredOffline {
                pending_id,
                submission_error,
            },
        })
    }

    /// Location is best-effort; a failed fix simply leaves it out.
    async fn device_info(&self, now: DateTime<Utc>) -> DeviceInfo {
        let location = match self.platform.current_position().await {
            Ok(fix) => Some(fix),
            Err(e) => {
                tracing::warn!(error = %e, "unable to get location");
                None
            }
        };
        DeviceInfo {
            user_agent: self.platform.user_agent(),
            timestamp: now,
            location,
        }
    }
}
