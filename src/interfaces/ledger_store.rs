//! LedgerStore interface.

use std::time::Duration;

use async_trait::async_trait;

use crate::model::{
    Auction, AuctionId, Chit, ChitId, Contribution, Dividend, Member, MemberId, NewAuction,
    NewChit, NewContribution, NewDividend, NewMember, NewRetainedSurplus, RetainedSurplus,
};

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors raised by ledger store backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate {entity}: {key}")]
    Duplicate { entity: &'static str, key: String },

    #[error("Dangling reference from {entity}: {reference}")]
    DanglingReference {
        entity: &'static str,
        reference: String,
    },

    #[error("Transaction timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Corrupt stored value: {0}")]
    Corrupt(String),

    #[error("Storage backend not available: {0}")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Transient failures the caller may retry at whole-operation granularity.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Timeout(_) | StorageError::Aborted(_) => true,
            #[cfg(feature = "sqlite")]
            StorageError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }
}

/// Interface for durable chit ledger storage.
///
/// Implementations:
/// - `InMemoryLedgerStore`: process-local tables, optimistic commit
/// - `SqliteLedgerStore`: SQLite via sqlx
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. Nothing written through it is visible to other
    /// transactions until `commit`.
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>>;
}

/// An open ledger transaction.
///
/// Inserts allocate monotonic identifiers and reject dangling references
/// (`StorageError::DanglingReference`) and uniqueness violations
/// (`StorageError::Duplicate`) for:
/// - contribution `(member, chit, period)`
/// - auction `(chit, period)`
/// - dividend `(auction, member)`
/// - member contact, and member `(chit, ticket_number)`
///
/// List queries return records in ascending id order.
#[async_trait]
pub trait LedgerTxn: Send {
    async fn insert_chit(&mut self, chit: NewChit) -> Result<Chit>;

    async fn get_chit(&mut self, id: ChitId) -> Result<Option<Chit>>;

    /// Persist the mutable fields of the chit aggregate (`status`,
    /// `current_period`). All other fields are immutable.
    async fn update_chit(&mut self, chit: &Chit) -> Result<()>;

    async fn insert_member(&mut self, member: NewMember) -> Result<Member>;

    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>>;

    async fn members(&mut self, chit: ChitId) -> Result<Vec<Member>>;

    async fn insert_contribution(&mut self, contribution: NewContribution)
        -> Result<Contribution>;

    /// Contributions for a chit, optionally narrowed to one period.
    async fn contributions(
        &mut self,
        chit: ChitId,
        period: Option<u32>,
    ) -> Result<Vec<Contribution>>;

    async fn insert_auction(&mut self, auction: NewAuction) -> Result<Auction>;

    async fn auctions(&mut self, chit: ChitId) -> Result<Vec<Auction>>;

    async fn auction_for_period(&mut self, chit: ChitId, period: u32) -> Result<Option<Auction>>;

    /// Insert a dividend batch. Either every row is staged or none is.
    async fn insert_dividends(&mut self, dividends: Vec<NewDividend>) -> Result<Vec<Dividend>>;

    /// Dividends for a chit, optionally narrowed to one auction.
    async fn dividends(&mut self, chit: ChitId, auction: Option<AuctionId>)
        -> Result<Vec<Dividend>>;

    async fn insert_retained_surplus(
        &mut self,
        retained: NewRetainedSurplus,
    ) -> Result<RetainedSurplus>;

    async fn retained_surpluses(&mut self, chit: ChitId) -> Result<Vec<RetainedSurplus>>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
