use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::api::{AttendanceApi, SyncBatch};
use crate::connectivity::ConnectivityMonitor;
use crate::device::DeviceIdentity;
use crate::error::SyncError;
use crate::model::{RecordCounts, RecordStatus};
use crate::notices::{NoticeKind, Notices};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per externally triggered drain, first one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: attempt k waits `base_delay * (k - 1)`.
    pub fn delay_before(&self, attempt: u32) -> Option<Duration> {
        if attempt < 2 || attempt > self.max_attempts {
            return None;
        }
        Some(self.base_delay * (attempt - 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DrainOutcome {
    Offline,
    AlreadyRunning,
    /// A newer drain took over before this scheduled retry fired.
    Superseded,
    Empty,
    #[serde(rename_all = "camelCase")]
    Synced { count: usize, reaped: usize },
    #[serde(rename_all = "camelCase")]
    Failed {
        count: usize,
        error: String,
        attempt: u32,
        retry_in_ms: Option<u64>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub syncing: bool,
    pub pending_count: usize,
    pub failed_count: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempt: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct EngineState {
    last_sync_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
    attempt: u32,
    next_retry_at: Option<DateTime<Utc>>,
    badge: RecordCounts,
}

/// Releases the single-flight flag on every exit path.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

type DrainFuture = Pin<Box<dyn Future<Output = DrainOutcome> + Send>>;

/// Flushes the durable store to `/attendance/sync` in whole batches.
pub struct SyncEngine {
    store: Arc<RecordStore>,
    api: Arc<dyn AttendanceApi>,
    connectivity: Arc<ConnectivityMonitor>,
    identity: Arc<DeviceIdentity>,
    notices: Arc<Notices>,
    policy: RetryPolicy,
    in_flight: AtomicBool,
    generation: AtomicU64,
    closed: AtomicBool,
    state: Mutex<EngineState>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<RecordStore>,
        api: Arc<dyn AttendanceApi>,
        connectivity: Arc<ConnectivityMonitor>,
        identity: Arc<DeviceIdentity>,
        notices: Arc<Notices>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            api,
            connectivity,
            identity,
            notices,
            policy,
            in_flight: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Automatic drain. Starts a fresh retry sequence at attempt 1; a no-op when
    /// offline or when another drain is already running.
    pub async fn drain(self: &Arc<Self>) -> DrainOutcome {
        Arc::clone(self).run_attempt(1, None).await
    }

    /// User-initiated drain. Same sequence as [`drain`](Self::drain), but
    /// refuses outright when offline.
    pub async fn trigger_sync(self: &Arc<Self>) -> Result<DrainOutcome, SyncError> {
        if !self.connectivity.is_online() {
            return Err(SyncError::Offline);
        }
        Ok(Arc::clone(self).run_attempt(1, None).await)
    }

    /// Makes every later attempt, scheduled retries included, a no-op.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> SyncStatus {
        let s = self.lock_state();
        SyncStatus {
            online: self.connectivity.is_online(),
            syncing: self.is_syncing(),
            pending_count: s.badge.pending,
            failed_count: s.badge.failed,
            last_sync_time: s.last_sync_time,
            last_error: s.last_error.clone(),
            attempt: s.attempt,
            next_retry_at: s.next_retry_at,
        }
    }

    /// Recounts unsynced records for the badge. Never drains.
    pub fn refresh_pending(&self) -> RecordCounts {
        match self.store.counts() {
            Ok(counts) => {
                self.lock_state().badge = counts;
                counts
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to count pending records");
                self.lock_state().badge
            }
        }
    }

    /// Drains on every offline→online edge.
    pub fn spawn_auto_sync(self: &Arc<Self>, mut online: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            while online.changed().await.is_ok() {
                let is_online = *online.borrow_and_update();
                if !is_online {
                    continue;
                }
                tracing::info!("device is online, starting sync");
                engine.refresh_pending();
                let outcome = engine.drain().await;
                tracing::debug!(?outcome, "automatic drain finished");
            }
        })
    }

    pub fn spawn_pending_refresh(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                engine.refresh_pending();
            }
        })
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A scheduled retry that gives up still owns `next_retry_at` unless a
    /// newer drain has taken over.
    fn abandon_scheduled(&self, scheduled_generation: Option<u64>) {
        if let Some(g) = scheduled_generation {
            if self.generation.load(Ordering::SeqCst) == g {
                self.lock_state().next_retry_at = None;
            }
        }
    }

    fn run_attempt(
        self: Arc<Self>,
        attempt: u32,
        scheduled_generation: Option<u64>,
    ) -> DrainFuture {
        Box::pin(async move {
            if self.closed.load(Ordering::SeqCst) {
                self.abandon_scheduled(scheduled_generation);
                return DrainOutcome::Superseded;
            }
            if !self.connectivity.is_online() {
                self.abandon_scheduled(scheduled_generation);
                return DrainOutcome::Offline;
            }
            if self
                .in_flight
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                tracing::debug!("sync already in progress");
                return DrainOutcome::AlreadyRunning;
            }
            let _in_flight = InFlight(&self.in_flight);

            let generation = match scheduled_generation {
                Some(g) if self.generation.load(Ordering::SeqCst) != g => {
                    return DrainOutcome::Superseded;
                }
                Some(g) => g,
                None => self.generation.fetch_add(1, Ordering::SeqCst) + 1,
            };
            {
                let mut s = self.lock_state();
                s.attempt = attempt;
                s.next_retry_at = None;
            }

            let records = match self.store.list_pending() {
                Ok(records) => records,
                Err(e) => {
                    tracing::error!(error = %e, "cannot read pending records");
                    let error = e.to_string();
                    self.lock_state().last_error = Some(error.clone());
                    return DrainOutcome::Failed {
                        count: 0,
                        error,
                        attempt,
                        retry_in_ms: None,
                    };
                }
            };
            if records.is_empty() {
                tracing::debug!("no pending records to sync");
                self.refresh_pending();
                return DrainOutcome::Empty;
            }

            let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
            let count = ids.len();
            tracing::info!(count, attempt, "syncing pending attendance");

            let submitted = match self.identity.resolve() {
                Ok(device_id) => {
                    let batch = SyncBatch {
                        device_id,
                        sync_data: records.into_iter().map(|r| r.data).collect(),
                    };
                    self.api
                        .sync_offline_attendance(&batch)
                        .await
                        .map_err(|e| e.to_string())
                }
                Err(e) => Err(format!("device id unavailable: {e:#}")),
            };

            let outcome = match submitted {
                Ok(accepted) => self.finish_success(&ids, accepted.len()),
                Err(error) => self.finish_failure(&ids, error, attempt, generation),
            };
            self.refresh_pending();
            outcome
        })
    }

    fn finish_success(self: &Arc<Self>, ids: &[i64], accepted: usize) -> DrainOutcome {
        let count = ids.len();
        // Every mark must land before anything is reaped.
        if let Err(e) = self.store.mark_batch(ids, RecordStatus::Synced, None) {
            tracing::error!(error = %e, "server accepted batch but local status update failed");
            let error = e.to_string();
            self.lock_state().last_error = Some(error.clone());
            return DrainOutcome::Failed {
                count,
                error,
                attempt: self.lock_state().attempt,
                retry_in_ms: None,
            };
        }
        let reaped = match self.store.reap_synced() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "failed to reap synced records");
                0
            }
        };
        {
            let mut s = self.lock_state();
            s.last_sync_time = Some(Utc::now());
            s.last_error = None;
            s.attempt = 0;
        }
        tracing::info!(count, accepted, reaped, "sync completed");
        self.notices.push(
            NoticeKind::SyncCompleted,
            format!("{count} attendance record(s) synchronized"),
        );
        DrainOutcome::Synced { count, reaped }
    }

    fn finish_failure(
        self: &Arc<Self>,
        ids: &[i64],
        error: String,
        attempt: u32,
        generation: u64,
    ) -> DrainOutcome {
        let count = ids.len();
        tracing::warn!(count, attempt, error = %error, "sync failed");
        if let Err(e) = self.store.mark_batch(ids, RecordStatus::Failed, Some(&error)) {
            tracing::error!(error = %e, "failed to record sync failure");
        }

        let next = attempt + 1;
        let retry_in = self.policy.delay_before(next);
        {
            let mut s = self.lock_state();
            s.last_error = Some(error.clone());
            s.next_retry_at = retry_in
                .and_then(|d| chrono::Duration::from_std(d).ok())
                .map(|d| Utc::now() + d);
        }
        if let Some(delay) = retry_in {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let outcome = engine.run_attempt(next, Some(generation)).await;
                tracing::debug!(attempt = next, ?outcome, "scheduled retry finished");
            });
        }

        let message = match retry_in {
            Some(d) => format!("Sync failed: {error}. Retrying in {}s", d.as_secs()),
            None => format!("Sync failed: {error}"),
        };
        self.notices.push(NoticeKind::SyncFailed, message);
        DrainOutcome::Failed {
            count,
            error,
            attempt,
            retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
        }
    }
}
