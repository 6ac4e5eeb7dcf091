//! In-memory `RemoteCollection` for store and poller tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::DashError;
use crate::sync::delta::{self, PatchEntry};
use crate::sync::store::RemoteCollection;
use crate::types::SyncRecord;

pub(crate) struct FakeRemote<R> {
    records: Mutex<HashMap<String, Vec<R>>>,
    calls: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    fail_ids: Mutex<HashSet<String>>,
    fetches: AtomicU64,
    next_id: AtomicU64,
    fetch_gate: Mutex<Option<Arc<Notify>>>,
}

impl<R: SyncRecord> FakeRemote<R> {
    pub(crate) fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_ids: Mutex::new(HashSet::new()),
            fetches: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            fetch_gate: Mutex::new(None),
        }
    }

    pub(crate) fn seed(&self, key: &str, records: Vec<R>) {
        self.records.lock().insert(key.to_string(), records);
    }

    pub(crate) fn stored(&self, key: &str) -> Vec<R> {
        self.records.lock().get(key).cloned().unwrap_or_default()
    }

    /// Write calls, in the order they reached the server. Fetches are counted separately.
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub(crate) fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Reject writes that target `id`.
    pub(crate) fn fail_id(&self, id: &str) {
        self.fail_ids.lock().insert(id.to_string());
    }

    /// Hold every fetch response until the gate is notified.
    pub(crate) fn set_fetch_gate(&self, gate: Option<Arc<Notify>>) {
        *self.fetch_gate.lock() = gate;
    }

    fn write(&self, call: String, id: Option<&str>) -> Result<(), DashError> {
        self.calls.lock().push(call);
        let rejected = id.map(|id| self.fail_ids.lock().contains(id)).unwrap_or(false);
        if rejected || self.fail_writes.load(Ordering::SeqCst) {
            return Err(DashError::Http {
                status: 500,
                body: "boom".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<R: SyncRecord> RemoteCollection<R> for FakeRemote<R> {
    async fn fetch(&self, key: &str) -> Result<Vec<R>, DashError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.stored(key);
        let gate = self.fetch_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(DashError::Network("connection refused".into()));
        }
        Ok(snapshot)
    }

    async fn create(&self, key: &str, record: &R) -> Result<String, DashError> {
        self.write(format!("POST {key}"), None)?;
        let id = format!("srv-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let mut saved = record.clone();
        saved.set_id(id.clone());
        self.records
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(saved);
        Ok(id)
    }

    async fn update(&self, key: &str, record: &R) -> Result<(), DashError> {
        self.write(format!("PUT {key}/{}", record.id()), Some(record.id()))?;
        if let Some(records) = self.records.lock().get_mut(key) {
            if let Some(slot) = records.iter_mut().find(|r| r.id() == record.id()) {
                *slot = record.clone();
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str, id: &str) -> Result<(), DashError> {
        self.write(format!("DELETE {key}/{id}"), Some(id))?;
        if let Some(records) = self.records.lock().get_mut(key) {
            records.retain(|r| r.id() != id);
        }
        Ok(())
    }

    async fn patch(&self, key: &str, changes: &[PatchEntry]) -> Result<(), DashError> {
        self.write(format!("PATCH {key} {}", changes.len()), None)?;
        if let Some(records) = self.records.lock().get_mut(key) {
            delta::apply(records, changes, |_| true);
        }
        Ok(())
    }

    async fn replace(&self, key: &str, records: &[R]) -> Result<(), DashError> {
        self.write(format!("PUT {key}"), None)?;
        self.records.lock().insert(key.to_string(), records.to_vec());
        Ok(())
    }
}
