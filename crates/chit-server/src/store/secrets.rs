use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::crypto;
use super::model::{RedeemError, SecretRecord, Verification};

/// Default age after which an unredeemed secret is purged.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(900);
/// Default delay before the first sweep.
pub const DEFAULT_SWEEP_DELAY: Duration = Duration::from_secs(10);
/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Thread-safe handle to the outstanding secrets.
///
/// Records are kept in insertion order. Every structural change (append,
/// remove-on-redeem, sweep) happens under the same mutex; bcrypt work is
/// always done outside it.
#[derive(Clone)]
pub struct Store {
    records: Arc<Mutex<VecDeque<SecretRecord>>>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
}

impl Store {
    /// Create an empty store on the wall clock.
    pub fn new(retention: Duration) -> Self {
        Self::with_clock(retention, Arc::new(SystemClock))
    }

    pub fn with_clock(retention: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::new())),
            clock,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn records(&self) -> MutexGuard<'_, VecDeque<SecretRecord>> {
        // Every critical section leaves the deque consistent, so a poisoned
        // lock is still safe to use.
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Generate a secret for `request_id`, remember its hash, and return the plaintext.
    ///
    /// Ids are not required to be unique; see [`Store::redeem`] for how
    /// duplicates are resolved.
    pub fn issue(&self, request_id: i32) -> Result<String> {
        let plaintext = crypto::generate_secret();
        let hash = crypto::hash_secret(&plaintext)?;
        self.insert(SecretRecord::new(
            request_id,
            plaintext.clone(),
            hash,
            self.clock.now(),
        ));
        debug!(request_id, "issued secret");
        Ok(plaintext)
    }

    pub(crate) fn insert(&self, record: SecretRecord) {
        self.records().push_back(record);
    }

    /// Consume the earliest outstanding secret for `request_id` and check
    /// `candidate` against it.
    ///
    /// The record is removed as soon as it is found, so a request id can be
    /// redeemed at most once whatever the verification outcome.
    pub fn redeem(&self, request_id: i32, candidate: &str) -> Result<Verification, RedeemError> {
        let record = {
            let mut records = self.records();
            if records.is_empty() {
                return Err(RedeemError::EmptyStore);
            }
            let pos = records.iter().position(|r| r.request_id() == request_id);
            pos.and_then(|pos| records.remove(pos))
                .ok_or(RedeemError::NotFound)?
        };

        let verified = crypto::verify_secret(record.plaintext(), candidate)?;
        Ok(if verified {
            Verification::Verified
        } else {
            Verification::Mismatch
        })
    }

    /// Remove every record older than the retention window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let removed = {
            let mut records = self.records();
            let before = records.len();
            records.retain(|r| !r.is_expired(now, self.retention));
            before - records.len()
        };
        if removed > 0 {
            info!(removed, "purged expired secrets");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Start the background expiry sweep: first after `initial_delay`, then every `period`.
    ///
    /// Must be called from within a tokio runtime. The task runs until
    /// [`SweepHandle::shutdown`] is called.
    pub fn spawn_sweep(self, initial_delay: Duration, period: Duration) -> SweepHandle {
        // tokio intervals reject a zero period.
        let period = period.max(Duration::from_millis(1));
        let stop = Arc::new(Notify::new());
        let stopped = stop.clone();

        let task = tokio::spawn(async move {
            let start = Instant::now()
                .checked_add(initial_delay)
                .unwrap_or_else(far_future);
            let mut ticker = time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.sweep_once(),
                    _ = stopped.notified() => {
                        debug!("expiry sweep stopped");
                        break;
                    }
                }
            }
        });

        SweepHandle { stop, task }
    }

    fn sweep_once(&self) {
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| self.purge_expired())) {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".into());
            warn!(error = %reason, "background sweep error");
        }
    }
}

/// Stand-in start for a delay too large to add to the current instant.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

/// Owner of a running expiry sweep.
pub struct SweepHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop the sweep and wait for the task to finish.
    pub async fn shutdown(self) {
        self.stop.notify_one();
        if let Err(e) = self.task.await {
            warn!(error = %e, "expiry sweep task failed");
        }
    }
}
