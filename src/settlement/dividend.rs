//! Dividend distributor.
//!
//! A period's distributable surplus is split evenly across members who have
//! not won any auction yet, the period's own winner included among the
//! winners. The floor share goes to everyone; the remainder of the integer
//! division goes to the eligible member with the lowest id, so the records
//! always add up to the surplus exactly.

use chrono::NaiveDate;
use tracing::{debug, info};

use super::{ensure_active, load_chit};
use crate::error::{ArithmeticError, LedgerError, Result, ValidationError};
use crate::interfaces::LedgerTxn;
use crate::model::{Amount, Auction, Chit, ChitId, Dividend, Member, MemberId, NewDividend};

/// Split `surplus` across `eligible`, returning one share per member in id
/// order.
///
/// A zero surplus yields no shares. A positive surplus with nobody eligible
/// is `LedgerError::NoEligibleMembers`.
pub fn allocate(
    chit: ChitId,
    surplus: Amount,
    eligible: &[MemberId],
) -> Result<Vec<(MemberId, Amount)>> {
    if surplus == 0 {
        return Ok(Vec::new());
    }
    if eligible.is_empty() {
        return Err(LedgerError::NoEligibleMembers { chit, surplus });
    }

    let mut ordered = eligible.to_vec();
    ordered.sort();
    ordered.dedup();

    let count = ordered.len() as Amount;
    let share = surplus / count;
    let remainder = surplus % count;

    let shares: Vec<(MemberId, Amount)> = ordered
        .into_iter()
        .enumerate()
        .map(|(i, member)| {
            let amount = if i == 0 { share + remainder } else { share };
            (member, amount)
        })
        .collect();

    let allocated: Amount = shares.iter().map(|(_, amount)| amount).sum();
    if allocated != surplus {
        return Err(ArithmeticError::Unreconciled { surplus, allocated }.into());
    }
    Ok(shares)
}

/// Members of the chit who have not won any auction recorded so far,
/// including auctions staged in this transaction.
pub async fn eligible_members(txn: &mut dyn LedgerTxn, chit: &Chit) -> Result<Vec<Member>> {
    let winners: Vec<MemberId> = txn
        .auctions(chit.id)
        .await?
        .into_iter()
        .map(|a| a.winner)
        .collect();

    Ok(txn
        .members(chit.id)
        .await?
        .into_iter()
        .filter(|m| !winners.contains(&m.id))
        .collect())
}

/// Stage one dividend per eligible member for `auction`.
///
/// `surplus` must match the auction's recorded distributable surplus. The
/// batch is staged all-or-none.
pub async fn distribute_dividends(
    txn: &mut dyn LedgerTxn,
    chit: ChitId,
    auction: &Auction,
    surplus: Amount,
    date: NaiveDate,
) -> Result<Vec<Dividend>> {
    let chit = load_chit(txn, chit).await?;
    ensure_active(&chit)?;
    if auction.chit_id != chit.id {
        return Err(ValidationError::UnknownChit(auction.chit_id).into());
    }
    if surplus != auction.distributable_surplus {
        return Err(ArithmeticError::Unreconciled {
            surplus: auction.distributable_surplus,
            allocated: surplus,
        }
        .into());
    }

    let eligible: Vec<MemberId> = eligible_members(txn, &chit)
        .await?
        .into_iter()
        .map(|m| m.id)
        .collect();
    let shares = allocate(chit.id, surplus, &eligible)?;
    if shares.is_empty() {
        debug!(chit = %chit.id, period = auction.period, "No surplus to distribute");
        return Ok(Vec::new());
    }

    let rows = shares
        .into_iter()
        .map(|(member_id, amount)| NewDividend {
            chit_id: chit.id,
            auction_id: auction.id,
            member_id,
            auction_date: auction.auction_date,
            amount,
            distribution_date: date,
        })
        .collect();
    let dividends = txn.insert_dividends(rows).await?;

    info!(
        chit = %chit.id,
        period = auction.period,
        recipients = dividends.len(),
        surplus,
        "Dividends distributed"
    );
    Ok(dividends)
}
