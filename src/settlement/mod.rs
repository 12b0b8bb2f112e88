//! Settlement core.
//!
//! Each step runs inside a caller-owned `LedgerTxn`; none of them commits.
//! The lifecycle controller strings them together so a period advance is
//! all-or-nothing:
//!
//! ```text
//! contribution (complete?) -> auction (quote + winner) -> dividend (allocate)
//!                                                               |
//!                                                               v
//!                                                  chit.current_period += 1
//! ```

pub mod auction;
pub mod contribution;
pub mod dividend;
pub mod schedule;

pub use auction::{quote, settle_auction, AuctionBid, SettledAuction, SettlementQuote};
pub use contribution::{
    is_period_complete, missing_contributors, record_contribution, ContributionEntry,
};
pub use dividend::{allocate, distribute_dividends, eligible_members};
pub use schedule::due_date;

use crate::error::{Result, StateError, ValidationError};
use crate::interfaces::LedgerTxn;
use crate::model::{Chit, ChitId};

pub(crate) async fn load_chit(txn: &mut dyn LedgerTxn, id: ChitId) -> Result<Chit> {
    txn.get_chit(id)
        .await?
        .ok_or_else(|| ValidationError::UnknownChit(id).into())
}

pub(crate) fn ensure_active(chit: &Chit) -> Result<()> {
    if chit.status.is_terminal() {
        return Err(StateError::ChitNotActive {
            chit: chit.id,
            status: chit.status,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn ensure_period_in_range(chit: &Chit, period: u32) -> Result<()> {
    if !chit.has_period(period) {
        return Err(ValidationError::PeriodOutOfRange {
            period,
            duration: chit.duration,
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support;
