//! Concurrency-safe ownership of all run records.
//!
//! The registry is the single owner of every [`RunRecord`]; handlers
//! and executors go through it for all reads and writes. Critical
//! sections are short: mutations clone nothing heavy, and `list`
//! snapshots under a read lock.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bus::EventBus;
use crate::error::{Result, RunError};
use crate::run::{RunRecord, RunStatus, RunSummary};

/// A run's record together with its event bus.
#[derive(Debug, Clone)]
pub struct RunHandle {
    pub record: RunRecord,
    pub bus: Arc<EventBus>,
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, RunHandle>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, ticker: &str, trade_date: &str) -> RunHandle {
        let handle = RunHandle {
            record: RunRecord::new(ticker, trade_date),
            bus: Arc::new(EventBus::new()),
        };
        self.runs
            .write()
            .await
            .insert(handle.record.id, handle.clone());
        handle
    }

    pub async fn get(&self, id: Uuid) -> Result<RunHandle> {
        self.runs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| RunError::NotFound(id.to_string()))
    }

    /// Apply a partial mutation to one record. Mutations on the same
    /// id are serialized by the registry lock, and `updated_at` is
    /// refreshed on every call.
    pub async fn update<F>(&self, id: Uuid, mutate: F) -> Result<RunRecord>
    where
        F: FnOnce(&mut RunRecord),
    {
        let mut runs = self.runs.write().await;
        let handle = runs
            .get_mut(&id)
            .ok_or_else(|| RunError::NotFound(id.to_string()))?;
        mutate(&mut handle.record);
        handle.record.updated_at = Utc::now();
        Ok(handle.record.clone())
    }

    /// Refresh `updated_at` without changing domain fields. Event
    /// appends count as record activity.
    pub async fn touch(&self, id: Uuid) -> Result<()> {
        self.update(id, |_| {}).await.map(|_| ())
    }

    /// Current status without cloning the whole handle.
    pub async fn status(&self, id: Uuid) -> Result<RunStatus> {
        self.runs
            .read()
            .await
            .get(&id)
            .map(|handle| handle.record.status())
            .ok_or_else(|| RunError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<RunHandle> {
        self.runs.read().await.values().cloned().collect()
    }

    /// Wire summary for one run, including its event log snapshot.
    pub async fn summary(&self, id: Uuid) -> Result<RunSummary> {
        let handle = self.get(id).await?;
        let events = handle.bus.snapshot().await;
        Ok(RunSummary::from_record(&handle.record, events))
    }

    /// Remove terminal runs last touched before `cutoff`. Returns how
    /// many were evicted.
    pub async fn evict_terminal_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut runs = self.runs.write().await;
        let before = runs.len();
        runs.retain(|_, handle| {
            !(handle.record.status().is_terminal() && handle.record.updated_at < cutoff)
        });
        before - runs.len()
    }
}
