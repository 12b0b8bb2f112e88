//! Read-only views over a chit's ledger. Everything is derived from the
//! store on each call.

use std::collections::{BTreeMap, HashSet};

use chrono::NaiveDate;

use super::{in_txn, release, ChitLedger};
use crate::error::{ArithmeticError, ConflictError, Result, ValidationError};
use crate::interfaces::{LedgerTxn, StorageError};
use crate::model::{
    Amount, Chit, ChitId, ChitStatus, Member, MemberId, PaymentStatus, PeriodOutcome,
    PeriodPayment, Winner,
};
use crate::settlement::{self, ensure_period_in_range, load_chit};

impl ChitLedger {
    pub async fn chit(&self, chit: ChitId) -> Result<Chit> {
        in_txn!(self, release, |txn| load_chit(txn, chit)).await
    }

    /// Next period awaiting settlement; `duration + 1` once completed.
    pub async fn current_period(&self, chit: ChitId) -> Result<u32> {
        Ok(self.chit(chit).await?.current_period)
    }

    pub async fn members(&self, chit: ChitId) -> Result<Vec<Member>> {
        in_txn!(self, release, |txn| members_in(txn, chit)).await
    }

    /// Sum of every installment recorded for the chit.
    pub async fn cumulative_contributions(&self, chit: ChitId) -> Result<Amount> {
        in_txn!(self, release, |txn| cumulative_in(txn, chit)).await
    }

    /// Auction winners so far, in period order.
    pub async fn past_winners(&self, chit: ChitId) -> Result<Vec<Winner>> {
        in_txn!(self, release, |txn| winners_in(txn, chit)).await
    }

    /// Members still eligible for dividends: those who have not won yet.
    pub async fn outstanding_eligible_members(&self, chit: ChitId) -> Result<Vec<Member>> {
        in_txn!(self, release, |txn| eligible_in(txn, chit)).await
    }

    pub async fn is_period_complete(&self, chit: ChitId, period: u32) -> Result<bool> {
        in_txn!(self, release, |txn| settlement::is_period_complete(txn, chit, period)).await
    }

    /// Paid/due line for each member of the chit for `period`.
    pub async fn period_status(&self, chit: ChitId, period: u32) -> Result<Vec<PeriodPayment>> {
        in_txn!(self, release, |txn| period_status_in(txn, chit, period)).await
    }

    pub async fn due_date(&self, chit: ChitId, period: u32) -> Result<NaiveDate> {
        settlement::due_date(&self.chit(chit).await?, period)
    }

    /// Rebuild what the committed advance of `period` wrote, if it happened.
    pub async fn period_outcome(&self, chit: ChitId, period: u32) -> Result<Option<PeriodOutcome>> {
        in_txn!(self, release, |txn| outcome_in(txn, chit, period)).await
    }

    /// Audit the chit's stored records against the ledger invariants,
    /// returning the first violation found.
    pub async fn verify_invariants(&self, chit: ChitId) -> Result<()> {
        in_txn!(self, release, |txn| verify_in(txn, chit)).await
    }
}

async fn members_in(txn: &mut dyn LedgerTxn, chit: ChitId) -> Result<Vec<Member>> {
    let chit = load_chit(txn, chit).await?;
    Ok(txn.members(chit.id).await?)
}

async fn cumulative_in(txn: &mut dyn LedgerTxn, chit: ChitId) -> Result<Amount> {
    let chit = load_chit(txn, chit).await?;
    txn.contributions(chit.id, None)
        .await?
        .iter()
        .try_fold(0 as Amount, |total, c| total.checked_add(c.amount_paid))
        .ok_or_else(|| ArithmeticError::Overflow("cumulative contributions").into())
}

async fn winners_in(txn: &mut dyn LedgerTxn, chit: ChitId) -> Result<Vec<Winner>> {
    let chit = load_chit(txn, chit).await?;
    let mut winners: Vec<Winner> = txn.auctions(chit.id).await?.iter().map(Winner::from).collect();
    winners.sort_by_key(|w| w.period);
    Ok(winners)
}

async fn eligible_in(txn: &mut dyn LedgerTxn, chit: ChitId) -> Result<Vec<Member>> {
    let chit = load_chit(txn, chit).await?;
    settlement::eligible_members(txn, &chit).await
}

async fn period_status_in(
    txn: &mut dyn LedgerTxn,
    chit: ChitId,
    period: u32,
) -> Result<Vec<PeriodPayment>> {
    let chit = load_chit(txn, chit).await?;
    ensure_period_in_range(&chit, period)?;

    let paid: BTreeMap<MemberId, Amount> = txn
        .contributions(chit.id, Some(period))
        .await?
        .into_iter()
        .map(|c| (c.member_id, c.amount_paid))
        .collect();

    Ok(txn
        .members(chit.id)
        .await?
        .into_iter()
        .map(|m| {
            let amount_paid = paid.get(&m.id).copied();
            PeriodPayment {
                member_id: m.id,
                name: m.name,
                ticket_number: m.ticket_number,
                amount_paid: amount_paid.unwrap_or(0),
                status: if amount_paid.is_some() {
                    PaymentStatus::Paid
                } else {
                    PaymentStatus::Due
                },
            }
        })
        .collect())
}

async fn outcome_in(
    txn: &mut dyn LedgerTxn,
    chit: ChitId,
    period: u32,
) -> Result<Option<PeriodOutcome>> {
    let chit = load_chit(txn, chit).await?;
    ensure_period_in_range(&chit, period)?;

    let Some(auction) = txn.auction_for_period(chit.id, period).await? else {
        return Ok(None);
    };
    let dividends = txn.dividends(chit.id, Some(auction.id)).await?;
    let retained_surplus = txn
        .retained_surpluses(chit.id)
        .await?
        .into_iter()
        .find(|r| r.auction_id == auction.id);

    Ok(Some(PeriodOutcome {
        chit_id: chit.id,
        period,
        status: if chit.is_final_period(period) {
            ChitStatus::Completed
        } else {
            ChitStatus::Active
        },
        auction,
        dividends,
        retained_surplus,
    }))
}

async fn verify_in(txn: &mut dyn LedgerTxn, chit: ChitId) -> Result<()> {
    let chit = load_chit(txn, chit).await?;
    let members = txn.members(chit.id).await?;
    let contributions = txn.contributions(chit.id, None).await?;
    let mut auctions = txn.auctions(chit.id).await?;
    auctions.sort_by_key(|a| a.period);
    let dividends = txn.dividends(chit.id, None).await?;
    let retained = txn.retained_surpluses(chit.id).await?;

    let mut seen = HashSet::new();
    for c in &contributions {
        if !seen.insert((c.member_id, c.period)) {
            return Err(ConflictError::DuplicateContribution {
                member: c.member_id,
                period: c.period,
            }
            .into());
        }
        if c.amount_paid != chit.installment_amount {
            return Err(ValidationError::InstallmentMismatch {
                expected: chit.installment_amount,
                paid: c.amount_paid,
            }
            .into());
        }
    }

    let pot = chit
        .installment_amount
        .checked_mul(members.len() as Amount)
        .ok_or(ArithmeticError::Overflow("total collected"))?;
    let mut winners: BTreeMap<MemberId, u32> = BTreeMap::new();
    let mut periods = HashSet::new();
    for auction in &auctions {
        if !periods.insert(auction.period) || auction.period >= chit.current_period {
            return Err(ConflictError::AuctionAlreadySettled {
                chit: chit.id,
                period: auction.period,
            }
            .into());
        }
        if let Some(&won_period) = winners.get(&auction.winner) {
            return Err(ConflictError::RepeatWinner {
                member: auction.winner,
                won_period,
            }
            .into());
        }
        winners.insert(auction.winner, auction.period);

        let accounted = auction
            .prize_money
            .checked_add(auction.foreman_commission)
            .and_then(|sum| sum.checked_add(auction.distributable_surplus))
            .ok_or(ArithmeticError::Overflow("auction split"))?;
        if accounted != pot {
            return Err(ArithmeticError::Unreconciled {
                surplus: pot,
                allocated: accounted,
            }
            .into());
        }

        let mut allocated: Amount = 0;
        for d in dividends.iter().filter(|d| d.auction_id == auction.id) {
            if let Some(&won_period) = winners.get(&d.member_id) {
                return Err(ConflictError::RepeatWinner {
                    member: d.member_id,
                    won_period,
                }
                .into());
            }
            allocated = allocated
                .checked_add(d.amount)
                .ok_or(ArithmeticError::Overflow("allocated dividends"))?;
        }
        for r in retained.iter().filter(|r| r.auction_id == auction.id) {
            allocated = allocated
                .checked_add(r.amount)
                .ok_or(ArithmeticError::Overflow("retained surplus"))?;
        }
        if allocated != auction.distributable_surplus {
            return Err(ArithmeticError::Unreconciled {
                surplus: auction.distributable_surplus,
                allocated,
            }
            .into());
        }
    }

    let settled = chit.current_period.saturating_sub(1) as usize;
    let completed = chit.status == ChitStatus::Completed;
    if auctions.len() != settled || completed != (settled == chit.duration as usize) {
        return Err(StorageError::Corrupt(format!(
            "chit {} is {} at period {} with {} settled auctions",
            chit.id,
            chit.status,
            chit.current_period,
            auctions.len()
        ))
        .into());
    }
    Ok(())
}
