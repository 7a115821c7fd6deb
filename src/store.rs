//! Remote ledger store and the transaction runner built on it.
//!
//! A [`LedgerStore`] only has to offer a versioned read and a conditional
//! write. [`run_transaction`] turns those into a read-modify-write that
//! behaves as if no other writer interleaved with it: when the conditional
//! write loses a race, the whole closure is re-run against a fresh read.
//!
//! [`MemoryLedgerStore`] keeps ledgers as JSON documents in process. It backs
//! the tests and the demo, and has hooks for simulating outages, concurrent
//! writers and network latency.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};

use crate::error::{LedgerError, StoreError};
use crate::ledger::LedgerState;

/// A value together with the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// The remote document store holding one ledger per user.
pub trait LedgerStore: Send + Sync {
    /// Read a user's ledger, or `None` if the document does not exist.
    fn read(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<LedgerState>>, StoreError>> + Send;

    /// Write `next` only if the stored version still equals `expected_version`
    /// (`None` means the document must not exist yet). Returns the new version,
    /// or [`StoreError::Conflict`] if another writer got there first.
    fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        next: &LedgerState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

impl<S: LedgerStore> LedgerStore for Arc<S> {
    fn read(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<Versioned<LedgerState>>, StoreError>> + Send {
        (**self).read(user_id)
    }

    fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        next: &LedgerState,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send {
        (**self).compare_and_swap(user_id, expected_version, next)
    }
}

// ============================================================================
// Transactions
// ============================================================================

/// What a transaction closure wants done with the state it was shown.
#[derive(Debug)]
pub enum TxDecision<T> {
    /// Write the new state and return the value.
    Commit(LedgerState, T),
    /// Leave the document untouched and return the value.
    Abort(T),
}

/// Retry policy for [`run_transaction`].
#[derive(Debug, Clone, Copy)]
pub struct TxOptions {
    /// Retries after the first attempt
    pub retry_limit: u32,
    /// Delay before the first retry, doubled for each further retry
    pub backoff: Duration,
}

impl Default for TxOptions {
    fn default() -> Self {
        Self {
            retry_limit: crate::TRANSACTION_RETRY_LIMIT,
            backoff: Duration::from_millis(crate::RETRY_BACKOFF_MS),
        }
    }
}

/// Run `f` as an atomic read-modify-write on a user's ledger.
///
/// An absent document is presented to `f` as a zero-valued ledger and created
/// by the write. On a version conflict the read and `f` are repeated, up to
/// `options.retry_limit` times. Store outages are returned immediately; the
/// caller decides when to try again.
pub async fn run_transaction<S, T, F>(
    store: &S,
    user_id: &str,
    options: &TxOptions,
    mut f: F,
) -> Result<T, LedgerError>
where
    S: LedgerStore,
    T: Send,
    F: FnMut(&LedgerState) -> TxDecision<T> + Send,
{
    let attempts = options.retry_limit + 1;

    for attempt in 0..attempts {
        let current = store.read(user_id).await?;
        let (expected_version, state) = match current {
            Some(doc) => (Some(doc.version), doc.value),
            None => (None, LedgerState::default()),
        };

        let (next, value) = match f(&state) {
            TxDecision::Abort(value) => return Ok(value),
            TxDecision::Commit(next, value) => (next, value),
        };

        match store.compare_and_swap(user_id, expected_version, &next).await {
            Ok(version) => {
                debug!("[LedgerStore] {} committed at version {}", user_id, version);
                return Ok(value);
            }
            Err(StoreError::Conflict) => {
                warn!(
                    "[LedgerStore] Conflict on {} (attempt {}/{})",
                    user_id,
                    attempt + 1,
                    attempts
                );
                if attempt + 1 < attempts {
                    let delay = options.backoff.saturating_mul(1 << attempt.min(10));
                    tokio::time::sleep(delay).await;
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(LedgerError::ConcurrentUpdateFailure { attempts })
}

// ============================================================================
// In-memory document store
// ============================================================================

#[derive(Debug, Clone)]
struct StoredDocument {
    version: u64,
    bytes: Vec<u8>,
}

/// In-process [`LedgerStore`] keeping each ledger as a JSON document.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    documents: Mutex<HashMap<String, StoredDocument>>,
    latency: Duration,
    failing_reads: AtomicU32,
    failing_writes: AtomicU32,
    phantom_writers: AtomicU32,
    reads: AtomicU32,
    writes: AtomicU32,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every read and write by `latency`, so concurrent callers interleave.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Seed or overwrite a ledger outside of any transaction.
    pub fn insert(&self, user_id: &str, state: &LedgerState) -> Result<u64, StoreError> {
        let bytes = serde_json::to_vec(state)?;
        let mut docs = self.lock()?;
        let version = docs.get(user_id).map_or(1, |d| d.version + 1);
        docs.insert(user_id.to_string(), StoredDocument { version, bytes });
        Ok(version)
    }

    /// Raw document bytes as stored.
    pub fn document_bytes(&self, user_id: &str) -> Option<Vec<u8>> {
        self.lock().ok()?.get(user_id).map(|d| d.bytes.clone())
    }

    /// Every stored ledger, in no particular order.
    pub fn all_ledgers(&self) -> Result<Vec<(String, LedgerState)>, StoreError> {
        let docs = self.lock()?;
        docs.iter()
            .map(|(id, doc)| -> Result<(String, LedgerState), StoreError> {
                Ok((id.clone(), serde_json::from_slice(&doc.bytes)?))
            })
            .collect()
    }

    /// Make the next `n` reads fail with [`StoreError::Unavailable`].
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` conditional writes fail with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Simulate another device writing just before each of the next `n`
    /// conditional writes, forcing them to conflict.
    pub fn inject_concurrent_writes(&self, n: u32) {
        self.phantom_writers.store(n, Ordering::SeqCst);
    }

    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Successful conditional writes.
    pub fn write_count(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StoredDocument>>, StoreError> {
        self.documents
            .lock()
            .map_err(|_| StoreError::Unavailable("document map poisoned".to_string()))
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

/// Decrement `counter` if positive, returning whether it was.
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl LedgerStore for MemoryLedgerStore {
    async fn read(&self, user_id: &str) -> Result<Option<Versioned<LedgerState>>, StoreError> {
        self.simulate_latency().await;
        if take_one(&self.failing_reads) {
            return Err(StoreError::Unavailable("simulated read outage".to_string()));
        }

        self.reads.fetch_add(1, Ordering::SeqCst);
        let docs = self.lock()?;
        match docs.get(user_id) {
            Some(doc) => Ok(Some(Versioned {
                version: doc.version,
                value: serde_json::from_slice(&doc.bytes)?,
            })),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        user_id: &str,
        expected_version: Option<u64>,
        next: &LedgerState,
    ) -> Result<u64, StoreError> {
        self.simulate_latency().await;
        if take_one(&self.failing_writes) {
            return Err(StoreError::Unavailable("simulated write outage".to_string()));
        }

        let bytes = serde_json::to_vec(next)?;
        let mut docs = self.lock()?;

        if take_one(&self.phantom_writers) {
            // Another writer touched the document; contents are irrelevant
            match docs.get_mut(user_id) {
                Some(doc) => doc.version += 1,
                None => {
                    let zero = serde_json::to_vec(&LedgerState::default())?;
                    docs.insert(user_id.to_string(), StoredDocument { version: 1, bytes: zero });
                }
            }
        }

        let current_version = docs.get(user_id).map(|d| d.version);
        if current_version != expected_version {
            return Err(StoreError::Conflict);
        }

        let version = current_version.map_or(1, |v| v + 1);
        docs.insert(user_id.to_string(), StoredDocument { version, bytes });
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(version)
    }
}
