use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{Amount, ChitId, MemberId, Percent};

/// Lifecycle status of a chit fund. Transitions only run forward:
/// `Active -> Completed` or `Active -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChitStatus {
    Active,
    Completed,
    Cancelled,
}

impl ChitStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChitStatus::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChitStatus::Active => "active",
            ChitStatus::Completed => "completed",
            ChitStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ChitStatus::Active),
            "completed" => Some(ChitStatus::Completed),
            "cancelled" => Some(ChitStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition.
    pub fn can_become(self, next: ChitStatus) -> bool {
        self == ChitStatus::Active && next.is_terminal()
    }
}

impl fmt::Display for ChitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chit fund aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chit {
    pub id: ChitId,
    pub name: String,
    pub chit_value: Amount,
    /// Number of periods; one auction per period.
    pub duration: u32,
    /// Number of subscriber slots in the group.
    pub group_size: u32,
    pub foreman_commission: Percent,
    pub start_date: NaiveDate,
    pub installment_amount: Amount,
    pub status: ChitStatus,
    /// Next period awaiting settlement (1-based). Equals `duration + 1`
    /// once the final period has settled.
    pub current_period: u32,
}

impl Chit {
    pub fn has_period(&self, period: u32) -> bool {
        (1..=self.duration).contains(&period)
    }

    pub fn is_final_period(&self, period: u32) -> bool {
        period == self.duration
    }
}

/// Chit fields supplied at registration; the store allocates the id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChit {
    pub name: String,
    pub chit_value: Amount,
    pub duration: u32,
    pub group_size: u32,
    pub foreman_commission: Percent,
    pub start_date: NaiveDate,
    pub installment_amount: Amount,
}

impl NewChit {
    /// True when `installment × duration` is within one minimum unit per
    /// period of `chit_value`, i.e. the installment is a rounded share.
    pub fn installment_reconciles(&self) -> bool {
        let scheduled = (self.installment_amount as u128) * (self.duration as u128);
        scheduled.abs_diff(self.chit_value as u128) < (self.duration.max(1) as u128)
    }
}

/// A subscriber enrolled in exactly one chit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub chit_id: ChitId,
    pub name: String,
    /// Unique across the whole ledger.
    pub contact: String,
    pub address: Option<String>,
    /// Assigned chit number, unique within the chit.
    pub ticket_number: u32,
    pub join_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMember {
    pub chit_id: ChitId,
    pub name: String,
    pub contact: String,
    pub address: Option<String>,
    pub ticket_number: u32,
    pub join_date: NaiveDate,
}
