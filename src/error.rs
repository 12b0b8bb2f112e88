//! Settlement error taxonomy.
//!
//! Validation errors are raised before any write. Conflict errors come from
//! uniqueness boundaries. State errors surface the chit's lifecycle status.
//! Arithmetic errors carry the intermediate values for audit. Storage errors
//! are retried by callers at whole-operation granularity only.

use crate::interfaces::StorageError;
use crate::model::{Amount, ChitId, ChitStatus, MemberId, Percent};

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("Invalid state: {0}")]
    State(#[from] StateError),

    #[error("Arithmetic failure: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("No eligible members for surplus {surplus} on chit {chit}")]
    NoEligibleMembers { chit: ChitId, surplus: Amount },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Storage(e) if e.is_retryable())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Unknown chit {0}")]
    UnknownChit(ChitId),

    #[error("Unknown member {0}")]
    UnknownMember(MemberId),

    #[error("Member {member} does not belong to chit {chit}")]
    MemberNotInChit { chit: ChitId, member: MemberId },

    #[error("Period {period} outside 1..={duration}")]
    PeriodOutOfRange { period: u32, duration: u32 },

    #[error("Discount {0} outside [0%, 100%)")]
    DiscountOutOfRange(Percent),

    #[error("Foreman commission {0} outside [0%, 100%)")]
    CommissionOutOfRange(Percent),

    #[error("Installment {paid} does not match the required {expected}")]
    InstallmentMismatch { expected: Amount, paid: Amount },

    #[error("Duration must be at least one period")]
    ZeroDuration,

    #[error("Member roster is empty")]
    EmptyRoster,

    #[error("Roster of {members} exceeds group size {group_size}")]
    RosterTooLarge { members: usize, group_size: u32 },

    #[error("Group size {group_size} exceeds configured maximum {max}")]
    GroupSizeTooLarge { group_size: u32, max: u32 },

    #[error("Installment {installment} x {duration} periods does not reconcile with chit value {chit_value}")]
    InstallmentDoesNotReconcile {
        installment: Amount,
        duration: u32,
        chit_value: Amount,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    #[error("Member {member} already contributed for period {period}")]
    DuplicateContribution { member: MemberId, period: u32 },

    #[error("Auction for chit {chit} period {period} already settled")]
    AuctionAlreadySettled { chit: ChitId, period: u32 },

    #[error("Member {member} already won period {won_period}")]
    RepeatWinner { member: MemberId, won_period: u32 },

    #[error("Duplicate member: {0}")]
    DuplicateMember(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("Chit {chit} is {status}")]
    ChitNotActive { chit: ChitId, status: ChitStatus },

    #[error("Period {period} is closed (chit {chit} is {status}, at period {current})")]
    PeriodClosed {
        chit: ChitId,
        period: u32,
        current: u32,
        status: ChitStatus,
    },

    #[error("Period {period} is incomplete: {} member(s) have not contributed", .missing.len())]
    PeriodIncomplete {
        chit: ChitId,
        period: u32,
        missing: Vec<MemberId>,
        status: ChitStatus,
    },

    #[error("Cannot advance period {requested}; chit {chit} is at period {current}")]
    PeriodOutOfOrder {
        chit: ChitId,
        requested: u32,
        current: u32,
        status: ChitStatus,
    },
}

impl StateError {
    /// Lifecycle status of the chit when the operation was rejected.
    pub fn status(&self) -> ChitStatus {
        match self {
            StateError::ChitNotActive { status, .. }
            | StateError::PeriodClosed { status, .. }
            | StateError::PeriodIncomplete { status, .. }
            | StateError::PeriodOutOfOrder { status, .. } => *status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArithmeticError {
    #[error(
        "Negative surplus: commission {foreman_commission} exceeds discount {discount_amount} \
         (total collected {total_collected})"
    )]
    NegativeSurplus {
        total_collected: Amount,
        discount_amount: Amount,
        foreman_commission: Amount,
    },

    #[error("Overflow computing {0}")]
    Overflow(&'static str),

    #[error("Dividends total {allocated} but surplus is {surplus}")]
    Unreconciled { surplus: Amount, allocated: Amount },
}
