use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{ConflictError, Result, ValidationError};
use crate::interfaces::{LedgerTxn, StorageError};
use crate::model::{Chit, Member, NewChit, NewMember};

/// One subscriber on the roster supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub name: String,
    pub contact: String,
    #[serde(default)]
    pub address: Option<String>,
    pub ticket_number: u32,
    pub join_date: NaiveDate,
}

/// A freshly registered chit and its enrolled members, in id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub chit: Chit,
    pub members: Vec<Member>,
}

pub(super) fn validate(chit: &NewChit, roster: &[RosterEntry], max_group_size: u32) -> Result<()> {
    if chit.duration == 0 {
        return Err(ValidationError::ZeroDuration.into());
    }
    if roster.is_empty() {
        return Err(ValidationError::EmptyRoster.into());
    }
    if chit.group_size > max_group_size {
        return Err(ValidationError::GroupSizeTooLarge {
            group_size: chit.group_size,
            max: max_group_size,
        }
        .into());
    }
    if roster.len() > chit.group_size as usize {
        return Err(ValidationError::RosterTooLarge {
            members: roster.len(),
            group_size: chit.group_size,
        }
        .into());
    }
    if !chit.foreman_commission.is_below_whole() {
        return Err(ValidationError::CommissionOutOfRange(chit.foreman_commission).into());
    }
    if !chit.installment_reconciles() {
        return Err(ValidationError::InstallmentDoesNotReconcile {
            installment: chit.installment_amount,
            duration: chit.duration,
            chit_value: chit.chit_value,
        }
        .into());
    }
    Ok(())
}

pub(super) async fn register(
    txn: &mut dyn LedgerTxn,
    chit: NewChit,
    roster: Vec<RosterEntry>,
) -> Result<Registration> {
    let chit = txn.insert_chit(chit).await?;

    let mut members = Vec::with_capacity(roster.len());
    for entry in roster {
        let staged = txn
            .insert_member(NewMember {
                chit_id: chit.id,
                name: entry.name,
                contact: entry.contact,
                address: entry.address,
                ticket_number: entry.ticket_number,
                join_date: entry.join_date,
            })
            .await;
        match staged {
            Ok(member) => members.push(member),
            Err(StorageError::Duplicate { key, .. }) => {
                return Err(ConflictError::DuplicateMember(key).into())
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(Registration { chit, members })
}
