use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{
    Amount, AuctionId, ChitId, ChitStatus, ContributionId, DividendId, MemberId, Percent,
    RetainedSurplusId,
};

/// One installment paid by one member for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contribution {
    pub id: ContributionId,
    pub chit_id: ChitId,
    pub member_id: MemberId,
    pub period: u32,
    pub amount_paid: Amount,
    pub payment_date: NaiveDate,
    /// Free-form remark from whoever took the payment.
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContribution {
    pub chit_id: ChitId,
    pub member_id: MemberId,
    pub period: u32,
    pub amount_paid: Amount,
    pub payment_date: NaiveDate,
    pub notes: Option<String>,
}

/// A settled auction. Only settled auctions are persisted, so the winner is
/// always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auction {
    pub id: AuctionId,
    pub chit_id: ChitId,
    pub period: u32,
    pub auction_date: NaiveDate,
    pub winner: MemberId,
    pub discount: Percent,
    /// Payout to the winner: total collected less the discount.
    pub prize_money: Amount,
    pub foreman_commission: Amount,
    /// Discount less commission; what the dividends must add up to.
    pub distributable_surplus: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuction {
    pub chit_id: ChitId,
    pub period: u32,
    pub auction_date: NaiveDate,
    pub winner: MemberId,
    pub discount: Percent,
    pub prize_money: Amount,
    pub foreman_commission: Amount,
    pub distributable_surplus: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dividend {
    pub id: DividendId,
    pub chit_id: ChitId,
    pub auction_id: AuctionId,
    pub member_id: MemberId,
    pub auction_date: NaiveDate,
    pub amount: Amount,
    pub distribution_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDividend {
    pub chit_id: ChitId,
    pub auction_id: AuctionId,
    pub member_id: MemberId,
    pub auction_date: NaiveDate,
    pub amount: Amount,
    pub distribution_date: NaiveDate,
}

/// Surplus held back because no member was eligible for a dividend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedSurplus {
    pub id: RetainedSurplusId,
    pub chit_id: ChitId,
    pub auction_id: AuctionId,
    pub amount: Amount,
    pub recorded_on: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRetainedSurplus {
    pub chit_id: ChitId,
    pub auction_id: AuctionId,
    pub amount: Amount,
    pub recorded_on: NaiveDate,
}

/// A past auction winner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winner {
    pub period: u32,
    pub member_id: MemberId,
    pub auction_id: AuctionId,
    pub prize_money: Amount,
}

impl From<&Auction> for Winner {
    fn from(auction: &Auction) -> Self {
        Self {
            period: auction.period,
            member_id: auction.winner,
            auction_id: auction.id,
            prize_money: auction.prize_money,
        }
    }
}

/// Everything a committed period advance wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodOutcome {
    pub chit_id: ChitId,
    pub period: u32,
    pub auction: Auction,
    pub dividends: Vec<Dividend>,
    pub retained_surplus: Option<RetainedSurplus>,
    pub status: ChitStatus,
}

impl PeriodOutcome {
    pub fn dividend_total(&self) -> Amount {
        self.dividends.iter().map(|d| d.amount).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    Due,
}

/// Per-member payment line for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodPayment {
    pub member_id: MemberId,
    pub name: String,
    pub ticket_number: u32,
    pub amount_paid: Amount,
    pub status: PaymentStatus,
}
