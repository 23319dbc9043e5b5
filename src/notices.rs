use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

const MAX_QUEUED: usize = 256;

/// One kind per user-visible outcome, so the operator can tell whether a scan counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    RecordedOnline,
    StoredOffline,
    MalformedPayload,
    ExpiredQrCode,
    PermissionRequired,
    StorageUnavailable,
    SyncCompleted,
    SyncFailed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub seq: u64,
    pub kind: NoticeKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Default)]
struct Queue {
    next_seq: u64,
    items: VecDeque<Notice>,
}

/// Notices waiting for the UI shell to pick them up.
#[derive(Default)]
pub struct Notices {
    queue: Mutex<Queue>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: NoticeKind, message: impl Into<String>) -> Notice {
        let mut q = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        q.next_seq += 1;
        let notice = Notice {
            seq: q.next_seq,
            kind,
            message: message.into(),
            at: Utc::now(),
        };
        if q.items.len() == MAX_QUEUED {
            q.items.pop_front();
        }
        q.items.push_back(notice.clone());
        notice
    }

    pub fn drain(&self) -> Vec<Notice> {
        let mut q = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        q.items.drain(..).collect()
    }

    #[cfg(test)]
    pub fn kinds(&self) -> Vec<NoticeKind> {
        let q = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        q.items.iter().map(|n| n.kind).collect()
    }
}
