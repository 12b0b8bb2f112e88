//! Shared utilities for integration tests.
//!
//! Builds ledgers over either backend and drives chits through their
//! periods with full contribution rounds.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;

use chit_ledger::config::{CommissionBasis, Config};
use chit_ledger::model::{Amount, NewChit, Percent};
use chit_ledger::storage::InMemoryLedgerStore;
use chit_ledger::utils::bootstrap::init_test_tracing;
use chit_ledger::{ChitLedger, ContributionEntry, PeriodAdvance, Registration, RosterEntry};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Shape of a test chit.
#[derive(Debug, Clone)]
pub struct ChitSpec {
    pub members: u32,
    pub installment: Amount,
    pub duration: u32,
    pub commission: Percent,
}

impl ChitSpec {
    /// One period per member, installment 1000, 5% commission.
    pub fn small(members: u32) -> Self {
        Self {
            members,
            installment: 1_000,
            duration: members,
            commission: Percent::whole(5),
        }
    }

    /// A 100000 chit over 100 periods at 1000 per installment, with a
    /// roster of `members`.
    pub fn lakh(members: u32, commission: Percent) -> Self {
        Self {
            members,
            installment: 1_000,
            duration: 100,
            commission,
        }
    }
}

pub fn memory_config(basis: CommissionBasis) -> Config {
    init_test_tracing();
    let mut config = Config::for_test();
    config.settlement.commission_basis = basis;
    config.settlement.retry.min_delay_ms = 5;
    config.settlement.retry.max_delay_ms = 20;
    config
}

pub fn memory_ledger(basis: CommissionBasis) -> (InMemoryLedgerStore, Arc<ChitLedger>) {
    let store = InMemoryLedgerStore::new();
    let ledger = ChitLedger::new(Arc::new(store.clone()), &memory_config(basis));
    (store, Arc::new(ledger))
}

pub async fn register(ledger: &ChitLedger, name: &str, spec: &ChitSpec) -> Registration {
    let roster = (1..=spec.members)
        .map(|i| RosterEntry {
            name: format!("{name} member {i}"),
            contact: format!("{name}-{i}@example.com"),
            address: None,
            ticket_number: i,
            join_date: date(2025, 1, 1),
        })
        .collect();
    ledger
        .register_chit(
            NewChit {
                name: name.to_string(),
                chit_value: spec.installment * spec.duration as Amount,
                duration: spec.duration,
                group_size: spec.members,
                foreman_commission: spec.commission,
                start_date: date(2025, 1, 15),
                installment_amount: spec.installment,
            },
            roster,
        )
        .await
        .unwrap()
}

pub fn installment(reg: &Registration, member: usize, period: u32) -> ContributionEntry {
    ContributionEntry {
        chit: reg.chit.id,
        member: reg.members[member].id,
        period,
        amount: reg.chit.installment_amount,
        date: date(2025, 1, 10),
        notes: None,
    }
}

/// Record every member's installment for `period`.
pub async fn pay_all(ledger: &ChitLedger, reg: &Registration, period: u32) {
    for member in 0..reg.members.len() {
        ledger
            .record_contribution(installment(reg, member, period))
            .await
            .unwrap();
    }
}

pub fn bid(reg: &Registration, period: u32, winner: usize, discount: Percent) -> PeriodAdvance {
    PeriodAdvance {
        chit: reg.chit.id,
        period,
        winner: reg.members[winner].id,
        discount,
        date: date(2025, 1, 25),
    }
}
