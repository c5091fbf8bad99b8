//! In-memory store with transactional copy semantics, for tests.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;
use crate::loader::{CopyTarget, StoreConnector};

#[derive(Default)]
struct StoreState {
    committed: Vec<String>,
    commits: u32,
    rollbacks: u32,
    fail_at_row: Option<usize>,
    reject_finish: bool,
    /// Sessions opened before this generation are closed
    closed_before: u64,
    generation: u64,
    refuse_connects: u32,
    connects: u32,
}

fn lock(m: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared table state; survives individual sessions
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session directly, bypassing connect accounting
    pub fn session(&self) -> MemoryCopyTarget {
        let mut state = lock(&self.state);
        state.generation += 1;
        MemoryCopyTarget {
            store: self.clone(),
            generation: state.generation,
            pending: None,
        }
    }

    /// Rows visible to readers, in commit order
    pub fn committed_rows(&self) -> Vec<String> {
        lock(&self.state).committed.clone()
    }

    pub fn commits(&self) -> u32 {
        lock(&self.state).commits
    }

    pub fn rollbacks(&self) -> u32 {
        lock(&self.state).rollbacks
    }

    /// Fail `send_row` for the given zero-based row of each transaction
    pub fn fail_at_row(&self, row: Option<usize>) {
        lock(&self.state).fail_at_row = row;
    }

    /// Make the server's verdict at the end of the copy a failure
    pub fn reject_finish(&self, reject: bool) {
        lock(&self.state).reject_finish = reject;
    }

    /// Drop every open session, as a server restart would
    pub fn close_sessions(&self) {
        let mut state = lock(&self.state);
        state.closed_before = state.generation + 1;
    }

    /// Refuse the next `n` connect calls
    pub fn refuse_connects(&self, n: u32) {
        lock(&self.state).refuse_connects = n;
    }

    /// Connect calls seen, refused ones included
    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }
}

#[async_trait]
impl StoreConnector for MemoryStore {
    type Target = MemoryCopyTarget;

    async fn connect(&self) -> Result<MemoryCopyTarget, StoreError> {
        {
            let mut state = lock(&self.state);
            state.connects += 1;
            if state.refuse_connects > 0 {
                state.refuse_connects -= 1;
                return Err(StoreError::Closed);
            }
        }
        Ok(self.session())
    }

    fn target(&self) -> String {
        "memory".to_string()
    }
}

pub struct MemoryCopyTarget {
    store: MemoryStore,
    generation: u64,
    /// Rows of the open transaction; `None` outside a copy
    pending: Option<Vec<String>>,
}

impl MemoryCopyTarget {
    fn check_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn rollback(&mut self) {
        if self.pending.take().is_some() {
            lock(&self.store.state).rollbacks += 1;
        }
    }
}

#[async_trait]
impl CopyTarget for MemoryCopyTarget {
    async fn begin(&mut self) -> Result<(), StoreError> {
        self.check_open()?;
        self.pending = Some(Vec::new());
        Ok(())
    }

    async fn send_row(&mut self, row: Bytes) -> Result<(), StoreError> {
        self.check_open()?;
        let fail_at = lock(&self.store.state).fail_at_row;
        let pending = self.pending.as_mut().ok_or(StoreError::NotCopying)?;
        if fail_at == Some(pending.len()) {
            return Err(StoreError::Rejected(format!("row {} refused", pending.len())));
        }
        pending.push(String::from_utf8_lossy(&row).into_owned());
        Ok(())
    }

    async fn finish(&mut self) -> Result<u64, StoreError> {
        self.check_open()?;
        if self.pending.is_none() {
            return Err(StoreError::NotCopying);
        }
        if lock(&self.store.state).reject_finish {
            self.rollback();
            return Err(StoreError::Rejected("copy failed on server".to_string()));
        }

        let rows = self.pending.take().unwrap_or_default();
        let count = rows.len() as u64;
        let mut state = lock(&self.store.state);
        state.committed.extend(rows);
        state.commits += 1;
        Ok(count)
    }

    async fn abort(&mut self, _reason: &str) {
        self.rollback();
    }

    fn is_closed(&self) -> bool {
        self.generation < lock(&self.store.state).closed_before
    }
}
