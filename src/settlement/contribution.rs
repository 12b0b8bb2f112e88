//! Contribution tracker: one installment per member per period.

use chrono::NaiveDate;
use tracing::debug;

use super::{ensure_active, ensure_period_in_range, load_chit};
use crate::error::{ConflictError, Result, StateError, ValidationError};
use crate::interfaces::{LedgerTxn, StorageError};
use crate::model::{Amount, Chit, ChitId, Contribution, MemberId, NewContribution};

/// A contribution as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributionEntry {
    pub chit: ChitId,
    pub member: MemberId,
    pub period: u32,
    pub amount: Amount,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

/// Validate and stage a contribution.
///
/// Rejects inactive chits, periods outside the chit's duration or already
/// settled, members of other chits, amounts other than the installment, and
/// a second contribution for the same `(member, chit, period)`.
pub async fn record_contribution(
    txn: &mut dyn LedgerTxn,
    entry: ContributionEntry,
) -> Result<Contribution> {
    let chit = load_chit(txn, entry.chit).await?;
    ensure_active(&chit)?;
    ensure_period_in_range(&chit, entry.period)?;

    let member = txn
        .get_member(entry.member)
        .await?
        .ok_or(ValidationError::UnknownMember(entry.member))?;
    if member.chit_id != chit.id {
        return Err(ValidationError::MemberNotInChit {
            chit: chit.id,
            member: member.id,
        }
        .into());
    }

    if entry.period < chit.current_period {
        return Err(StateError::PeriodClosed {
            chit: chit.id,
            period: entry.period,
            current: chit.current_period,
            status: chit.status,
        }
        .into());
    }

    if entry.amount != chit.installment_amount {
        return Err(ValidationError::InstallmentMismatch {
            expected: chit.installment_amount,
            paid: entry.amount,
        }
        .into());
    }

    let staged = txn
        .insert_contribution(NewContribution {
            chit_id: chit.id,
            member_id: member.id,
            period: entry.period,
            amount_paid: entry.amount,
            payment_date: entry.date,
            notes: entry.notes,
        })
        .await;

    match staged {
        Ok(contribution) => {
            debug!(
                chit = %chit.id,
                member = %member.id,
                period = entry.period,
                "Contribution staged"
            );
            Ok(contribution)
        }
        Err(StorageError::Duplicate { .. }) => Err(ConflictError::DuplicateContribution {
            member: member.id,
            period: entry.period,
        }
        .into()),
        Err(e) => Err(e.into()),
    }
}

/// Members of the chit with no contribution recorded for `period`, in id order.
pub async fn missing_contributors(
    txn: &mut dyn LedgerTxn,
    chit: &Chit,
    period: u32,
) -> Result<Vec<MemberId>> {
    let paid: Vec<MemberId> = txn
        .contributions(chit.id, Some(period))
        .await?
        .into_iter()
        .map(|c| c.member_id)
        .collect();

    Ok(txn
        .members(chit.id)
        .await?
        .into_iter()
        .map(|m| m.id)
        .filter(|id| !paid.contains(id))
        .collect())
}

/// True iff every member of the chit has contributed for `period`.
pub async fn is_period_complete(txn: &mut dyn LedgerTxn, chit: ChitId, period: u32) -> Result<bool> {
    let chit = load_chit(txn, chit).await?;
    ensure_period_in_range(&chit, period)?;
    Ok(missing_contributors(txn, &chit, period).await?.is_empty())
}
