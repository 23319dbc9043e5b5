//! Shared fakes for unit tests.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;

use crate::api::{AttendanceApi, SyncBatch};
use crate::error::ApiError;
use crate::model::{AttendanceRecord, DeviceInfo, Location};
use crate::platform::{Capability, CameraStream, DevicePlatform, PermissionState, PlatformError};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos(),
        TEMP_SEQ.fetch_add(1, Ordering::SeqCst)
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn sample_record(qr_code: &str, student_id: i64) -> AttendanceRecord {
    AttendanceRecord {
        student_id,
        class_id: 1,
        subject_id: 2,
        teacher_id: 3,
        date: NaiveDate::from_ymd_opt(2025, 4, 21).expect("date"),
        period: 1,
        qr_code: qr_code.to_string(),
        device_info: DeviceInfo {
            user_agent: "unit-test".to_string(),
            timestamp: Utc::now(),
            location: None,
        },
    }
}

/// Scriptable stand-in for the remote attendance API.
#[derive(Default)]
pub struct FakeApi {
    pub qr_calls: AtomicUsize,
    pub sync_calls: AtomicUsize,
    pub fail_qr: AtomicBool,
    pub fail_sync: AtomicBool,
    pub submitted: Mutex<Vec<AttendanceRecord>>,
    pub batches: Mutex<Vec<SyncBatch>>,
    /// When set, every call parks here until released.
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_sync() -> Arc<Self> {
        let api = Self::default();
        api.fail_sync.store(true, Ordering::SeqCst);
        Arc::new(api)
    }

    pub fn gated(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().expect("gate") = Some(Arc::clone(&notify));
        notify
    }

    async fn wait_gate(&self) {
        let gate = self.gate.lock().expect("gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl AttendanceApi for FakeApi {
    async fn mark_qr_attendance(
        &self,
        record: &AttendanceRecord,
    ) -> Result<serde_json::Value, ApiError> {
        self.qr_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;
        if self.fail_qr.load(Ordering::SeqCst) {
            return Err(ApiError::Server {
                status: 503,
                message: "Service Unavailable".to_string(),
            });
        }
        self.submitted.lock().expect("submitted").push(record.clone());
        Ok(serde_json::json!({ "id": 1, "qr_code": record.qr_code }))
    }

    async fn sync_offline_attendance(
        &self,
        batch: &SyncBatch,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        self.sync_calls.fetch_add(1, Ordering::SeqCst);
        self.wait_gate().await;
        self.batches.lock().expect("batches").push(batch.clone());
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".to_string()));
        }
        Ok(batch.sync_data.iter().map(|_| serde_json::json!({})).collect())
    }
}

pub struct FakeCamera {
    open: Arc<AtomicUsize>,
    closed: bool,
}

impl CameraStream for FakeCamera {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.close();
    }
}

/// Device with scriptable grants and prompt answers.
pub struct FakePlatform {
    pub camera: Mutex<PermissionState>,
    pub geolocation: Mutex<PermissionState>,
    pub camera_prompt: Mutex<Result<(), PlatformError>>,
    pub location: Mutex<Result<Location, PlatformError>>,
    pub open_cameras: Arc<AtomicUsize>,
    pub camera_opens: AtomicUsize,
    pub position_queries: AtomicUsize,
    /// When set, `open_camera` parks here until released.
    pub camera_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakePlatform {
    pub fn granted() -> Arc<Self> {
        Arc::new(Self::with_states(PermissionState::Granted, PermissionState::Granted))
    }

    pub fn with_states(camera: PermissionState, geolocation: PermissionState) -> Self {
        Self {
            camera: Mutex::new(camera),
            geolocation: Mutex::new(geolocation),
            camera_prompt: Mutex::new(Ok(())),
            location: Mutex::new(Ok(Location {
                latitude: -25.75,
                longitude: 28.23,
                accuracy: 12.0,
            })),
            open_cameras: Arc::new(AtomicUsize::new(0)),
            camera_opens: AtomicUsize::new(0),
            position_queries: AtomicUsize::new(0),
            camera_gate: Mutex::new(None),
        }
    }

    pub fn gated_camera(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.camera_gate.lock().expect("camera gate") = Some(Arc::clone(&notify));
        notify
    }

    pub fn open_camera_count(&self) -> usize {
        self.open_cameras.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DevicePlatform for FakePlatform {
    async fn query_permission(
        &self,
        capability: Capability,
    ) -> Result<PermissionState, PlatformError> {
        Ok(match capability {
            Capability::Camera => *self.camera.lock().expect("camera"),
            Capability::Geolocation => *self.geolocation.lock().expect("geolocation"),
        })
    }

    async fn open_camera(&self) -> Result<Box<dyn CameraStream>, PlatformError> {
        self.camera_opens.fetch_add(1, Ordering::SeqCst);
        let gate = self.camera_gate.lock().expect("camera gate").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.camera_prompt.lock().expect("prompt").clone()?;
        self.open_cameras.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCamera {
            open: Arc::clone(&self.open_cameras),
            closed: false,
        }))
    }

    async fn current_position(&self) -> Result<Location, PlatformError> {
        self.position_queries.fetch_add(1, Ordering::SeqCst);
        self.location.lock().expect("location").clone()
    }

    fn user_agent(&self) -> String {
        "fake-device/1.0".to_string()
    }
}
