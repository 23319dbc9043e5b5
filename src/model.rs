use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::qr::QrSessionDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub user_agent: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// Payload submitted to `/attendance/qr` and batched into `/attendance/sync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: i64,
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
    pub date: NaiveDate,
    pub period: u8,
    pub qr_code: String,
    pub device_info: DeviceInfo,
}

impl AttendanceRecord {
    pub fn from_descriptor(
        descriptor: &QrSessionDescriptor,
        student_id: i64,
        device_info: DeviceInfo,
    ) -> Self {
        Self {
            student_id,
            class_id: descriptor.class_id,
            subject_id: descriptor.subject_id,
            teacher_id: descriptor.teacher_id,
            date: descriptor.date,
            period: descriptor.period,
            qr_code: descriptor.id.clone(),
            device_info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordStatus {
    Pending,
    Synced,
    Failed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "PENDING",
            RecordStatus::Synced => "SYNCED",
            RecordStatus::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Some(RecordStatus::Pending),
            "SYNCED" => Some(RecordStatus::Synced),
            "FAILED" => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

/// A locally persisted submission awaiting confirmed delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRecord {
    pub id: i64,
    pub data: AttendanceRecord,
    pub timestamp: DateTime<Utc>,
    pub sync_status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCounts {
    pub pending: usize,
    pub failed: usize,
    pub synced: usize,
}

impl RecordCounts {
    /// Records still owed to the server.
    pub fn unsynced(&self) -> usize {
        self.pending + self.failed
    }
}
