//! Per-chit settlement gates.
//!
//! Contributions hold the read side; period advances and cancellation hold
//! the write side. An advance marks its period as closing before it starts
//! waiting, so contributions for that period are turned away instead of
//! queueing behind it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::interfaces::StorageError;
use crate::model::ChitId;

/// No period closing.
const OPEN: u32 = 0;

#[derive(Debug, Default)]
pub(crate) struct ChitGate {
    lock: Arc<RwLock<()>>,
    closing: AtomicU32,
}

impl ChitGate {
    /// Period currently being closed by an advance, if any.
    pub(crate) fn closing_period(&self) -> Option<u32> {
        match self.closing.load(Ordering::SeqCst) {
            OPEN => None,
            period => Some(period),
        }
    }

    pub(crate) async fn read(&self, wait: Duration) -> Result<OwnedRwLockReadGuard<()>, StorageError> {
        tokio::time::timeout(wait, Arc::clone(&self.lock).read_owned())
            .await
            .map_err(|_| StorageError::Timeout(wait))
    }

    pub(crate) async fn write(&self, wait: Duration) -> Result<OwnedRwLockWriteGuard<()>, StorageError> {
        tokio::time::timeout(wait, Arc::clone(&self.lock).write_owned())
            .await
            .map_err(|_| StorageError::Timeout(wait))
    }

    /// Mark `period` as closing until the returned guard drops.
    pub(crate) fn close(self: &Arc<Self>, period: u32) -> ClosingPeriod {
        self.closing.store(period, Ordering::SeqCst);
        ClosingPeriod {
            gate: Arc::clone(self),
            period,
        }
    }
}

pub(crate) struct ClosingPeriod {
    gate: Arc<ChitGate>,
    period: u32,
}

impl Drop for ClosingPeriod {
    fn drop(&mut self) {
        // Leave the marker alone if a later advance has replaced it.
        let _ = self.gate.closing.compare_exchange(
            self.period,
            OPEN,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Gate registry, one gate per live chit. Callers only register gates for
/// chits known to exist and evict them once the chit is terminal.
#[derive(Debug, Default)]
pub(crate) struct ChitGates {
    gates: Mutex<HashMap<ChitId, Arc<ChitGate>>>,
}

impl ChitGates {
    fn lock(&self) -> MutexGuard<'_, HashMap<ChitId, Arc<ChitGate>>> {
        self.gates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self, chit: ChitId) -> Option<Arc<ChitGate>> {
        self.lock().get(&chit).cloned()
    }

    pub(crate) fn gate(&self, chit: ChitId) -> Arc<ChitGate> {
        Arc::clone(self.lock().entry(chit).or_default())
    }

    /// Drop the registry's gate for `chit`. Holders of the old gate keep it
    /// until they finish.
    pub(crate) fn evict(&self, chit: ChitId) {
        self.lock().remove(&chit);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_chit_shares_gate() {
        let gates = ChitGates::default();
        assert!(Arc::ptr_eq(&gates.gate(ChitId(1)), &gates.gate(ChitId(1))));
        assert!(!Arc::ptr_eq(&gates.gate(ChitId(1)), &gates.gate(ChitId(2))));
    }

    #[tokio::test]
    async fn test_evict_forgets_gate_but_holders_keep_it() {
        let gates = ChitGates::default();
        let held = gates.gate(ChitId(1));
        let _reader = held.read(Duration::from_millis(50)).await.unwrap();

        gates.evict(ChitId(1));
        assert!(gates.get(ChitId(1)).is_none());
        assert_eq!(gates.len(), 0);

        let fresh = gates.gate(ChitId(1));
        assert!(!Arc::ptr_eq(&held, &fresh));
        assert!(held.write(Duration::from_millis(10)).await.is_err());
    }

    #[tokio::test]
    async fn test_closing_marker_clears_on_drop() {
        let gate = Arc::new(ChitGate::default());
        assert_eq!(gate.closing_period(), None);
        {
            let _closing = gate.close(3);
            assert_eq!(gate.closing_period(), Some(3));
        }
        assert_eq!(gate.closing_period(), None);
    }

    #[tokio::test]
    async fn test_write_wait_times_out_behind_reader() {
        let gate = ChitGate::default();
        let _reader = gate.read(Duration::from_millis(50)).await.unwrap();
        let err = gate.write(Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, StorageError::Timeout(_)));
    }
}
