//! Chit Ledger - chit fund settlement core
//!
//! Records member installments, settles each period's auction, distributes
//! the surplus as dividends, and walks a chit fund from registration to
//! completion, keeping the ledger consistent under concurrent callers.

pub mod config;
pub mod error;
pub mod interfaces;
pub mod lifecycle;
pub mod model;
pub mod settlement;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{LedgerError, Result};
pub use lifecycle::{ChitLedger, PeriodAdvance, Registration, RosterEntry};
pub use settlement::ContributionEntry;
