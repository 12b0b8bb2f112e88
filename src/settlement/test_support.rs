use chrono::NaiveDate;

use crate::interfaces::{LedgerStore, LedgerTxn};
use crate::model::{Amount, Chit, Member, NewChit, NewContribution, NewMember, Percent};
use crate::storage::InMemoryLedgerStore;

pub(crate) struct SeededChit {
    pub chit: Chit,
    pub members: Vec<Member>,
}

pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Commit a chit with `members` members, one period per member, 5% commission.
pub(crate) async fn seed_chit(
    store: &InMemoryLedgerStore,
    members: u32,
    installment: Amount,
) -> SeededChit {
    let mut txn = store.begin().await.unwrap();
    let chit = txn
        .insert_chit(NewChit {
            name: "Seeded".to_string(),
            chit_value: installment * members as Amount,
            duration: members,
            group_size: members,
            foreman_commission: Percent::whole(5),
            start_date: date(2025, 1, 15),
            installment_amount: installment,
        })
        .await
        .unwrap();

    let mut enrolled = Vec::new();
    for ticket in 1..=members {
        let member = txn
            .insert_member(NewMember {
                chit_id: chit.id,
                name: format!("Member {ticket}"),
                contact: format!("chit-{}-member-{ticket}", chit.id),
                address: None,
                ticket_number: ticket,
                join_date: date(2025, 1, 1),
            })
            .await
            .unwrap();
        enrolled.push(member);
    }
    txn.commit().await.unwrap();

    SeededChit {
        chit,
        members: enrolled,
    }
}

/// Stage a full set of installments for `period`.
pub(crate) async fn pay_period(txn: &mut dyn LedgerTxn, seeded: &SeededChit, period: u32) {
    for member in &seeded.members {
        txn.insert_contribution(NewContribution {
            chit_id: seeded.chit.id,
            member_id: member.id,
            period,
            amount_paid: seeded.chit.installment_amount,
            payment_date: date(2025, 1, 20),
            notes: None,
        })
        .await
        .unwrap();
    }
}
