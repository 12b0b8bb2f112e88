//! Ledger record types.
//!
//! `Chit` is the root aggregate. Members, contributions, auctions, dividends
//! and retained surpluses are scoped to exactly one chit and are append-only
//! once committed; only the chit's `status` and `current_period` move.

use std::fmt;

use serde::{Deserialize, Serialize};

mod chit;
mod percent;
mod records;

pub use chit::{Chit, ChitStatus, Member, NewChit, NewMember};
pub use percent::{Percent, BPS_PER_WHOLE};
pub use records::{
    Auction, Contribution, Dividend, NewAuction, NewContribution, NewDividend,
    NewRetainedSurplus, PaymentStatus, PeriodOutcome, PeriodPayment, RetainedSurplus, Winner,
};

/// Money in the currency's minimum unit (e.g. rupees, or paise if the
/// deployment tracks them). All ledger arithmetic is integral.
pub type Amount = u64;

macro_rules! ledger_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

ledger_id!(
    /// Identifier of a chit fund, allocated by the ledger store.
    ChitId
);
ledger_id!(
    /// Identifier of a member. Allocation is monotonic, so id order is
    /// enrollment order; dividend remainders go to the lowest eligible id.
    MemberId
);
ledger_id!(ContributionId);
ledger_id!(AuctionId);
ledger_id!(DividendId);
ledger_id!(RetainedSurplusId);
