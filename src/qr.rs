use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CaptureError;

/// The issuing side regenerates its code on this cadence.
pub const QR_VALIDITY_MS: i64 = 5 * 60 * 1000;

pub const MIN_PERIOD: u8 = 1;
pub const MAX_PERIOD: u8 = 8;

/// Decoded content of a class-session QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSessionDescriptor {
    pub id: String,
    pub class_id: i64,
    pub subject_id: i64,
    pub teacher_id: i64,
    pub date: NaiveDate,
    pub period: u8,
    pub timestamp: DateTime<Utc>,
}

pub fn parse(raw: &str) -> Result<QrSessionDescriptor, CaptureError> {
    let descriptor: QrSessionDescriptor = serde_json::from_str(raw.trim())
        .map_err(|e| CaptureError::MalformedPayload(e.to_string()))?;
    validate(&descriptor)?;
    Ok(descriptor)
}

#[allow(dead_code)]
pub fn encode(descriptor: &QrSessionDescriptor) -> serde_json::Result<String> {
    serde_json::to_string(descriptor)
}

fn validate(d: &QrSessionDescriptor) -> Result<(), CaptureError> {
    let malformed = |msg: &str| Err(CaptureError::MalformedPayload(msg.to_string()));
    if d.id.trim().is_empty() {
        return malformed("id is required");
    }
    if d.class_id <= 0 {
        return malformed("classId must be positive");
    }
    if d.subject_id <= 0 {
        return malformed("subjectId must be positive");
    }
    if d.teacher_id <= 0 {
        return malformed("teacherId must be positive");
    }
    if !(MIN_PERIOD..=MAX_PERIOD).contains(&d.period) {
        return malformed("period must be between 1 and 8");
    }
    Ok(())
}

pub fn is_expired(descriptor: &QrSessionDescriptor, now: DateTime<Utc>) -> bool {
    now.signed_duration_since(descriptor.timestamp) > Duration::milliseconds(QR_VALIDITY_MS)
}
