//! Abstract interfaces for chit-ledger collaborators.
//!
//! These traits define the contracts for:
//! - Ledger storage (transactional persistence of chit records)

pub mod ledger_store;

pub use ledger_store::{LedgerStore, LedgerTxn, Result, StorageError};
