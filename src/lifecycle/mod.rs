//! Chit lifecycle controller.
//!
//! `ChitLedger` is the only writer of ledger state. Every operation runs in
//! one store transaction bounded by the configured transaction timeout, and
//! every period advance or cancellation holds the chit's gate exclusively,
//! so at most one settlement per chit is in flight.
//!
//! ```text
//!              advance_period (p < duration)
//!             +--------+
//!             v        |
//!  register -> Active -+--- advance_period (p == duration) ---> Completed
//!                      |
//!                      +--- cancel ---------------------------> Cancelled
//! ```

mod gate;
mod queries;
mod registration;

#[cfg(test)]
mod tests;

pub use registration::{Registration, RosterEntry};

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::config::{CommissionBasis, Config, SettlementConfig};
use crate::error::{ConflictError, LedgerError, Result, StateError};
use crate::interfaces::{LedgerStore, LedgerTxn, StorageError};
use crate::model::{
    Auction, Chit, ChitId, ChitStatus, Contribution, MemberId, NewChit, NewRetainedSurplus, Percent,
    PeriodOutcome,
};
use crate::settlement::{self, AuctionBid, ContributionEntry};
use crate::storage::init_storage;
use crate::utils::retry::{is_retryable, settlement_backoff};
use gate::{ChitGate, ChitGates};

/// Run `$body` against a fresh transaction inside the ledger's transaction
/// timeout, then hand the transaction and result to `$finish`.
macro_rules! in_txn {
    ($ledger:expr, $finish:ident, |$txn:ident| $body:expr) => {
        $ledger.bounded(async {
            let mut owned = $ledger.store.begin().await?;
            let result = {
                let $txn: &mut dyn $crate::interfaces::LedgerTxn = owned.as_mut();
                $body.await
            };
            $finish(owned, result).await
        })
    };
}
pub(crate) use in_txn;

/// Commit on success, roll back on failure.
pub(crate) async fn commit_or_rollback<T>(txn: Box<dyn LedgerTxn>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback failed after {}", e);
            }
            Err(e)
        }
    }
}

/// Read-only work: always roll back.
pub(crate) async fn release<T>(txn: Box<dyn LedgerTxn>, result: Result<T>) -> Result<T> {
    if let Err(rollback) = txn.rollback().await {
        warn!(error = %rollback, "Rollback of read transaction failed");
    }
    result
}

/// Request to settle one period: winning bid plus the settlement date used
/// for the auction and its dividends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodAdvance {
    pub chit: ChitId,
    pub period: u32,
    pub winner: MemberId,
    pub discount: Percent,
    pub date: NaiveDate,
}

impl PeriodAdvance {
    /// Whether `auction` is the settlement this request would have written.
    pub fn matches(&self, auction: &Auction) -> bool {
        auction.chit_id == self.chit
            && auction.period == self.period
            && auction.winner == self.winner
            && auction.discount == self.discount
            && auction.auction_date == self.date
    }
}

/// Chit lifecycle controller.
pub struct ChitLedger {
    store: Arc<dyn LedgerStore>,
    settlement: SettlementConfig,
    transaction_timeout: Duration,
    lock_timeout: Duration,
    gates: ChitGates,
}

impl ChitLedger {
    pub fn new(store: Arc<dyn LedgerStore>, config: &Config) -> Self {
        Self {
            store,
            settlement: config.settlement.clone(),
            transaction_timeout: config.storage.transaction_timeout(),
            lock_timeout: config.storage.lock_timeout(),
            gates: ChitGates::default(),
        }
    }

    /// Open the configured store and build a ledger over it.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = init_storage(&config.storage).await?;
        Ok(Self::new(store, config))
    }

    pub fn settlement_config(&self) -> &SettlementConfig {
        &self.settlement
    }

    /// Gate for a chit that exists. Terminal chits reject every write, so
    /// they get an unregistered gate and the registry stays bounded by the
    /// live chits.
    async fn gate(&self, chit: ChitId) -> Result<Arc<ChitGate>> {
        if let Some(gate) = self.gates.get(chit) {
            return Ok(gate);
        }
        let found = self.chit(chit).await?;
        if found.status.is_terminal() {
            return Ok(Arc::new(ChitGate::default()));
        }
        Ok(self.gates.gate(chit))
    }

    async fn bounded<T>(&self, work: impl std::future::Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.transaction_timeout, work)
            .await
            .map_err(|_| StorageError::Timeout(self.transaction_timeout))?
    }

    /// Register a chit together with its full member roster.
    #[tracing::instrument(skip(self, chit, roster), fields(name = %chit.name, members = roster.len()))]
    pub async fn register_chit(&self, chit: NewChit, roster: Vec<RosterEntry>) -> Result<Registration> {
        registration::validate(&chit, &roster, self.settlement.max_group_size).inspect_err(|e| {
            warn!(error = %e, "Chit registration rejected");
        })?;

        let registered = in_txn!(self, commit_or_rollback, |txn| registration::register(
            txn, chit, roster
        ))
        .await?;

        info!(
            chit = %registered.chit.id,
            members = registered.members.len(),
            duration = registered.chit.duration,
            "Chit registered"
        );
        Ok(registered)
    }

    /// Record one member's installment for a period.
    #[tracing::instrument(skip(self), fields(chit = %entry.chit, member = %entry.member, period = entry.period))]
    pub async fn record_contribution(&self, entry: ContributionEntry) -> Result<Contribution> {
        let gate = self.gate(entry.chit).await?;
        if gate.closing_period() == Some(entry.period) {
            let chit = self.chit(entry.chit).await?;
            warn!("Contribution rejected: period is being settled");
            return Err(StateError::PeriodClosed {
                chit: chit.id,
                period: entry.period,
                current: chit.current_period,
                status: chit.status,
            }
            .into());
        }

        let _shared = gate.read(self.lock_timeout).await?;
        let recorded = in_txn!(self, commit_or_rollback, |txn| settlement::record_contribution(
            txn, entry
        ))
        .await;

        match &recorded {
            Ok(c) => info!(contribution = %c.id, "Contribution recorded"),
            Err(e) => warn!(error = %e, "Contribution rejected"),
        }
        recorded
    }

    /// Settle the chit's current period: auction, dividends (or retained
    /// surplus) and the period counter commit together or not at all.
    #[tracing::instrument(skip(self), fields(chit = %request.chit, period = request.period))]
    pub async fn advance_period(&self, request: PeriodAdvance) -> Result<PeriodOutcome> {
        let gate = self.gate(request.chit).await?;
        let _closing = gate.close(request.period);
        let _exclusive = gate.write(self.lock_timeout).await?;

        let basis = self.settlement.commission_basis;
        let advanced = in_txn!(self, commit_or_rollback, |txn| advance_in(txn, &request, basis)).await;

        match &advanced {
            Ok(outcome) => {
                if outcome.status.is_terminal() {
                    self.gates.evict(request.chit);
                }
                info!(
                    winner = %outcome.auction.winner,
                    prize_money = outcome.auction.prize_money,
                    dividends = outcome.dividends.len(),
                    status = %outcome.status,
                    "Period advanced"
                );
            }
            Err(e) => warn!(error = %e, "Period advance rolled back"),
        }
        advanced
    }

    /// `advance_period` with whole-operation retries on transient storage
    /// failures. A retry that finds the period already settled with this
    /// request's winner, discount and date returns that committed outcome; a
    /// period settled by another caller stays `AuctionAlreadySettled`.
    pub async fn advance_period_with_retry(&self, request: PeriodAdvance) -> Result<PeriodOutcome> {
        let mut attempts = 0u32;
        let result = (|| {
            attempts += 1;
            self.advance_period(request.clone())
        })
        .retry(settlement_backoff(&self.settlement.retry))
        .when(is_retryable)
        .notify(|err: &LedgerError, dur: Duration| {
            warn!(
                chit = %request.chit,
                period = request.period,
                error = %err,
                delay = ?dur,
                "Period advance failed, retrying"
            );
        })
        .await;

        match result {
            Err(LedgerError::Conflict(ConflictError::AuctionAlreadySettled { .. })) if attempts > 1 => {
                let err = ConflictError::AuctionAlreadySettled {
                    chit: request.chit,
                    period: request.period,
                };
                match self.period_outcome(request.chit, request.period).await? {
                    Some(outcome) if request.matches(&outcome.auction) => {
                        info!(
                            chit = %request.chit,
                            period = request.period,
                            "Period already settled by an earlier attempt"
                        );
                        Ok(outcome)
                    }
                    Some(outcome) => {
                        warn!(
                            chit = %request.chit,
                            period = request.period,
                            winner = %outcome.auction.winner,
                            "Period settled by another caller"
                        );
                        Err(err.into())
                    }
                    None => Err(err.into()),
                }
            }
            other => other,
        }
    }

    /// Administratively cancel an active chit.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, chit: ChitId) -> Result<Chit> {
        let gate = self.gate(chit).await?;
        let _exclusive = gate.write(self.lock_timeout).await?;

        let cancelled = in_txn!(self, commit_or_rollback, |txn| cancel_in(txn, chit)).await;
        match &cancelled {
            Ok(_) => {
                self.gates.evict(chit);
                info!("Chit cancelled");
            }
            Err(e) => warn!(error = %e, "Cancellation rejected"),
        }
        cancelled
    }
}

async fn advance_in(
    txn: &mut dyn LedgerTxn,
    request: &PeriodAdvance,
    basis: CommissionBasis,
) -> Result<PeriodOutcome> {
    let bid = AuctionBid {
        winner: request.winner,
        discount: request.discount,
        date: request.date,
    };
    let settled = settlement::settle_auction(txn, request.chit, request.period, &bid, basis).await?;
    let auction = settled.auction;

    let (dividends, retained_surplus) = match settlement::distribute_dividends(
        txn,
        request.chit,
        &auction,
        auction.distributable_surplus,
        request.date,
    )
    .await
    {
        Ok(dividends) => (dividends, None),
        Err(LedgerError::NoEligibleMembers { chit, surplus }) => {
            warn!(%chit, period = auction.period, surplus, "No eligible members; surplus retained");
            let retained = txn
                .insert_retained_surplus(NewRetainedSurplus {
                    chit_id: chit,
                    auction_id: auction.id,
                    amount: surplus,
                    recorded_on: request.date,
                })
                .await?;
            (Vec::new(), Some(retained))
        }
        Err(e) => return Err(e),
    };

    let mut chit = settlement::load_chit(txn, request.chit).await?;
    chit.current_period = request.period + 1;
    if chit.is_final_period(request.period) {
        chit.status = ChitStatus::Completed;
    }
    txn.update_chit(&chit).await?;

    Ok(PeriodOutcome {
        chit_id: chit.id,
        period: request.period,
        auction,
        dividends,
        retained_surplus,
        status: chit.status,
    })
}

async fn cancel_in(txn: &mut dyn LedgerTxn, id: ChitId) -> Result<Chit> {
    let mut chit = settlement::load_chit(txn, id).await?;
    if !chit.status.can_become(ChitStatus::Cancelled) {
        return Err(StateError::ChitNotActive {
            chit: chit.id,
            status: chit.status,
        }
        .into());
    }
    chit.status = ChitStatus::Cancelled;
    txn.update_chit(&chit).await?;
    Ok(chit)
}
