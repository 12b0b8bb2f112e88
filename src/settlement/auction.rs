//! Auction engine: prices a period's pot and records the winner.

use chrono::NaiveDate;
use tracing::{debug, info};

use super::contribution::missing_contributors;
use super::{ensure_active, ensure_period_in_range, load_chit};
use crate::config::CommissionBasis;
use crate::error::{ArithmeticError, ConflictError, Result, StateError, ValidationError};
use crate::interfaces::{LedgerTxn, StorageError};
use crate::model::{Amount, Auction, Chit, ChitId, MemberId, NewAuction, Percent};

/// Winning bid for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionBid {
    pub winner: MemberId,
    pub discount: Percent,
    pub date: NaiveDate,
}

/// Money split of one period's pot.
///
/// `prize_money + discount_amount == total_collected` and
/// `foreman_commission + distributable_surplus == discount_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementQuote {
    pub total_collected: Amount,
    pub discount_amount: Amount,
    pub foreman_commission: Amount,
    pub prize_money: Amount,
    pub distributable_surplus: Amount,
}

/// Auction row plus the split it was priced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledAuction {
    pub auction: Auction,
    pub quote: SettlementQuote,
}

/// Price a period's pot for `contributors` paid installments.
///
/// Percentages floor to the minimum unit. Commission is taken from the
/// discount pool only; a zero discount yields a zero pool, so no commission
/// and no surplus.
pub fn quote(
    chit: &Chit,
    contributors: usize,
    discount: Percent,
    basis: CommissionBasis,
) -> Result<SettlementQuote> {
    if !discount.is_below_whole() {
        return Err(ValidationError::DiscountOutOfRange(discount).into());
    }
    if !chit.foreman_commission.is_below_whole() {
        return Err(ValidationError::CommissionOutOfRange(chit.foreman_commission).into());
    }

    let total_collected = chit
        .installment_amount
        .checked_mul(contributors as Amount)
        .ok_or(ArithmeticError::Overflow("total collected"))?;
    let discount_amount = discount
        .apply(total_collected)
        .ok_or(ArithmeticError::Overflow("discount amount"))?;
    let prize_money = total_collected
        .checked_sub(discount_amount)
        .ok_or(ArithmeticError::Overflow("prize money"))?;

    let foreman_commission = if discount_amount == 0 {
        0
    } else {
        let base = match basis {
            CommissionBasis::ChitValue => chit.chit_value,
            CommissionBasis::DiscountAmount => discount_amount,
        };
        chit.foreman_commission
            .apply(base)
            .ok_or(ArithmeticError::Overflow("foreman commission"))?
    };

    let distributable_surplus = discount_amount.checked_sub(foreman_commission).ok_or(
        ArithmeticError::NegativeSurplus {
            total_collected,
            discount_amount,
            foreman_commission,
        },
    )?;

    Ok(SettlementQuote {
        total_collected,
        discount_amount,
        foreman_commission,
        prize_money,
        distributable_surplus,
    })
}

/// Validate the bid against the chit's ledger and stage the auction row.
///
/// The period must be the chit's current period with every member paid up,
/// the winner must belong to the chit and must not have won before, and no
/// auction may already exist for the period.
pub async fn settle_auction(
    txn: &mut dyn LedgerTxn,
    chit: ChitId,
    period: u32,
    bid: &AuctionBid,
    basis: CommissionBasis,
) -> Result<SettledAuction> {
    let chit = load_chit(txn, chit).await?;
    ensure_period_in_range(&chit, period)?;

    // Checked ahead of the status so a retry of a committed advance that
    // completed the chit still reports the conflict.
    if txn.auction_for_period(chit.id, period).await?.is_some() {
        return Err(ConflictError::AuctionAlreadySettled {
            chit: chit.id,
            period,
        }
        .into());
    }

    ensure_active(&chit)?;
    if period != chit.current_period {
        return Err(StateError::PeriodOutOfOrder {
            chit: chit.id,
            requested: period,
            current: chit.current_period,
            status: chit.status,
        }
        .into());
    }

    let winner = txn
        .get_member(bid.winner)
        .await?
        .ok_or(ValidationError::UnknownMember(bid.winner))?;
    if winner.chit_id != chit.id {
        return Err(ValidationError::MemberNotInChit {
            chit: chit.id,
            member: winner.id,
        }
        .into());
    }

    if let Some(previous) = txn
        .auctions(chit.id)
        .await?
        .into_iter()
        .find(|a| a.winner == winner.id)
    {
        return Err(ConflictError::RepeatWinner {
            member: winner.id,
            won_period: previous.period,
        }
        .into());
    }

    let members = txn.members(chit.id).await?;
    if members.len() > chit.group_size as usize {
        return Err(ValidationError::RosterTooLarge {
            members: members.len(),
            group_size: chit.group_size,
        }
        .into());
    }

    let missing = missing_contributors(txn, &chit, period).await?;
    if !missing.is_empty() {
        return Err(StateError::PeriodIncomplete {
            chit: chit.id,
            period,
            missing,
            status: chit.status,
        }
        .into());
    }

    let quote = quote(&chit, members.len(), bid.discount, basis)?;
    debug!(
        chit = %chit.id,
        period,
        total_collected = quote.total_collected,
        discount_amount = quote.discount_amount,
        foreman_commission = quote.foreman_commission,
        surplus = quote.distributable_surplus,
        "Auction quoted"
    );

    let staged = txn
        .insert_auction(NewAuction {
            chit_id: chit.id,
            period,
            auction_date: bid.date,
            winner: winner.id,
            discount: bid.discount,
            prize_money: quote.prize_money,
            foreman_commission: quote.foreman_commission,
            distributable_surplus: quote.distributable_surplus,
        })
        .await;

    let auction = match staged {
        Ok(auction) => auction,
        Err(StorageError::Duplicate { .. }) => {
            return Err(ConflictError::AuctionAlreadySettled {
                chit: chit.id,
                period,
            }
            .into())
        }
        Err(e) => return Err(e.into()),
    };

    info!(
        chit = %chit.id,
        period,
        winner = %winner.id,
        prize_money = auction.prize_money,
        "Auction settled"
    );
    Ok(SettledAuction { auction, quote })
}
