use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::error::{ArithmeticError, ValidationError};
use crate::model::{Amount, NewDividend, PaymentStatus};
use crate::storage::InMemoryLedgerStore;
use crate::utils::bootstrap::init_test_tracing;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ledger(store: &InMemoryLedgerStore, tweak: impl FnOnce(&mut Config)) -> Arc<ChitLedger> {
    init_test_tracing();
    let mut config = Config::for_test();
    config.settlement.retry.min_delay_ms = 5;
    config.settlement.retry.max_delay_ms = 20;
    tweak(&mut config);
    Arc::new(ChitLedger::new(Arc::new(store.clone()), &config))
}

/// Three members, three periods, 1000 per installment, 5% of chit value.
async fn register(ledger: &ChitLedger) -> Registration {
    let roster = (1..=3)
        .map(|i| RosterEntry {
            name: format!("Member {i}"),
            contact: format!("member-{i}@example.com"),
            address: None,
            ticket_number: i,
            join_date: date(2025, 1, 1),
        })
        .collect();
    ledger
        .register_chit(
            NewChit {
                name: "Lifecycle".to_string(),
                chit_value: 3_000,
                duration: 3,
                group_size: 3,
                foreman_commission: Percent::whole(5),
                start_date: date(2025, 1, 15),
                installment_amount: 1_000,
            },
            roster,
        )
        .await
        .unwrap()
}

async fn pay(ledger: &ChitLedger, reg: &Registration, period: u32) {
    for member in &reg.members {
        ledger
            .record_contribution(ContributionEntry {
                chit: reg.chit.id,
                member: member.id,
                period,
                amount: reg.chit.installment_amount,
                date: date(2025, period, 10),
                notes: None,
            })
            .await
            .unwrap();
    }
}

fn advance(reg: &Registration, period: u32, winner: usize) -> PeriodAdvance {
    PeriodAdvance {
        chit: reg.chit.id,
        period,
        winner: reg.members[winner].id,
        discount: Percent::whole(10),
        date: date(2025, period, 20),
    }
}

#[tokio::test]
async fn test_advance_settles_and_moves_period() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    let outcome = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap();

    // 3000 pot, 300 discount, 150 commission on chit value, 150 over 2 members
    assert_eq!(outcome.auction.prize_money, 2_700);
    assert_eq!(outcome.auction.foreman_commission, 150);
    assert_eq!(outcome.dividend_total(), 150);
    assert_eq!(outcome.dividends.len(), 2);
    assert_eq!(outcome.status, ChitStatus::Active);
    assert_eq!(ledger.current_period(reg.chit.id).await.unwrap(), 2);
    ledger.verify_invariants(reg.chit.id).await.unwrap();
}

#[tokio::test]
async fn test_contribution_rejected_while_period_is_closing() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    store.set_commit_delay(Some(Duration::from_millis(200))).await;
    let closing = {
        let ledger = Arc::clone(&ledger);
        let request = advance(&reg, 1, 0);
        tokio::spawn(async move { ledger.advance_period(request).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let err = ledger
        .record_contribution(ContributionEntry {
            chit: reg.chit.id,
            member: reg.members[1].id,
            period: 1,
            amount: 1_000,
            date: date(2025, 1, 21),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::State(StateError::PeriodClosed { period: 1, .. })
    ));

    store.set_commit_delay(None).await;
    closing.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_failed_dividends_roll_back_auction() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    store.set_fail_on_dividends(true).await;
    let err = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap_err();
    assert!(err.is_retryable());

    assert!(ledger.period_outcome(reg.chit.id, 1).await.unwrap().is_none());
    assert!(ledger.past_winners(reg.chit.id).await.unwrap().is_empty());
    assert_eq!(ledger.current_period(reg.chit.id).await.unwrap(), 1);

    store.set_fail_on_dividends(false).await;
    ledger.advance_period(advance(&reg, 1, 0)).await.unwrap();
}

#[tokio::test]
async fn test_negative_surplus_leaves_chit_untouched() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    let mut request = advance(&reg, 1, 0);
    request.discount = Percent::whole(1);
    let err = ledger.advance_period(request).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Arithmetic(ArithmeticError::NegativeSurplus {
            total_collected: 3_000,
            discount_amount: 30,
            foreman_commission: 150,
        })
    ));
    assert_eq!(ledger.current_period(reg.chit.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_transaction_timeout_commits_nothing() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |c| c.storage.transaction_timeout_ms = 50);
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    store.set_commit_delay(Some(Duration::from_millis(200))).await;
    let err = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Timeout(_))));

    store.set_commit_delay(None).await;
    assert!(ledger.period_outcome(reg.chit.id, 1).await.unwrap().is_none());
    assert_eq!(ledger.current_period(reg.chit.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_recovers_from_transient_failure() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |c| c.settlement.retry.max_attempts = 10);
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    store.set_fail_on_commit(true).await;
    let healer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(15)).await;
            store.set_fail_on_commit(false).await;
        })
    };

    let outcome = ledger.advance_period_with_retry(advance(&reg, 1, 0)).await.unwrap();
    healer.await.unwrap();
    assert_eq!(outcome.period, 1);
    assert_eq!(ledger.current_period(reg.chit.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_retry_after_lost_ack_returns_committed_outcome() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    store.set_lose_commit_ack(true).await;
    let outcome = ledger.advance_period_with_retry(advance(&reg, 1, 0)).await.unwrap();
    store.set_lose_commit_ack(false).await;

    assert_eq!(outcome.auction.winner, reg.members[0].id);
    assert_eq!(ledger.past_winners(reg.chit.id).await.unwrap().len(), 1);
    assert_eq!(
        ledger.period_outcome(reg.chit.id, 1).await.unwrap(),
        Some(outcome)
    );
}

#[tokio::test]
async fn test_direct_resettle_is_conflict() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;
    let settled = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap();

    for _ in 0..2 {
        let err = ledger
            .advance_period_with_retry(advance(&reg, 1, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::Conflict(ConflictError::AuctionAlreadySettled { period: 1, .. })
        ));
    }
    assert_eq!(ledger.past_winners(reg.chit.id).await.unwrap().len(), 1);

    let stored = ledger.period_outcome(reg.chit.id, 1).await.unwrap().unwrap();
    assert_eq!(stored.dividends.len(), settled.dividends.len());
    assert_eq!(stored.dividends, settled.dividends);
    ledger.verify_invariants(reg.chit.id).await.unwrap();
}

#[tokio::test]
async fn test_retry_does_not_claim_another_callers_settlement() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |c| {
        c.storage.transaction_timeout_ms = 50;
        c.settlement.retry.min_delay_ms = 300;
        c.settlement.retry.max_delay_ms = 600;
    });
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    // First attempt times out inside commit and backs off.
    store.set_commit_delay(Some(Duration::from_millis(200))).await;
    let retrying = {
        let ledger = Arc::clone(&ledger);
        let request = advance(&reg, 1, 0);
        tokio::spawn(async move { ledger.advance_period_with_retry(request).await })
    };
    tokio::time::sleep(Duration::from_millis(120)).await;
    store.set_commit_delay(None).await;

    let other = ledger.advance_period(advance(&reg, 1, 1)).await.unwrap();
    assert_eq!(other.auction.winner, reg.members[1].id);

    let err = retrying.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Conflict(ConflictError::AuctionAlreadySettled { period: 1, .. })
    ));
    let winners = ledger.past_winners(reg.chit.id).await.unwrap();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].member_id, reg.members[1].id);
}

#[test]
fn test_period_advance_matches_only_its_own_auction() {
    let request = PeriodAdvance {
        chit: ChitId(1),
        period: 2,
        winner: MemberId(7),
        discount: Percent::whole(10),
        date: date(2025, 2, 20),
    };
    let auction = Auction {
        id: crate::model::AuctionId(3),
        chit_id: ChitId(1),
        period: 2,
        auction_date: date(2025, 2, 20),
        winner: MemberId(7),
        discount: Percent::whole(10),
        prize_money: 2_700,
        foreman_commission: 150,
        distributable_surplus: 150,
    };
    assert!(request.matches(&auction));

    let other_winner = Auction {
        winner: MemberId(8),
        ..auction.clone()
    };
    assert!(!request.matches(&other_winner));
    let other_discount = Auction {
        discount: Percent::whole(12),
        ..auction.clone()
    };
    assert!(!request.matches(&other_discount));
    let other_date = Auction {
        auction_date: date(2025, 2, 21),
        ..auction
    };
    assert!(!request.matches(&other_date));
}

/// Settle period 1 and hand back the store so tests can commit rows the
/// ledger itself would never write.
async fn settled_period() -> (InMemoryLedgerStore, Arc<ChitLedger>, Registration, PeriodOutcome) {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;
    let outcome = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap();
    ledger.verify_invariants(reg.chit.id).await.unwrap();
    (store, ledger, reg, outcome)
}

async fn commit_retained(store: &InMemoryLedgerStore, outcome: &PeriodOutcome, amount: Amount) {
    let mut txn = store.begin().await.unwrap();
    txn.insert_retained_surplus(NewRetainedSurplus {
        chit_id: outcome.chit_id,
        auction_id: outcome.auction.id,
        amount,
        recorded_on: outcome.auction.auction_date,
    })
    .await
    .unwrap();
    txn.commit().await.unwrap();
}

#[tokio::test]
async fn test_verify_detects_unreconciled_surplus() {
    let (store, ledger, reg, outcome) = settled_period().await;
    commit_retained(&store, &outcome, 10).await;

    let err = ledger.verify_invariants(reg.chit.id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Arithmetic(ArithmeticError::Unreconciled {
            surplus: 150,
            allocated: 160,
        })
    ));
}

#[tokio::test]
async fn test_verify_detects_overflowing_allocation() {
    let (store, ledger, reg, outcome) = settled_period().await;
    commit_retained(&store, &outcome, Amount::MAX).await;

    let err = ledger.verify_invariants(reg.chit.id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Arithmetic(ArithmeticError::Overflow(_))
    ));
}

#[tokio::test]
async fn test_verify_detects_dividend_to_past_winner() {
    let (store, ledger, reg, outcome) = settled_period().await;

    let mut txn = store.begin().await.unwrap();
    txn.insert_dividends(vec![NewDividend {
        chit_id: reg.chit.id,
        auction_id: outcome.auction.id,
        member_id: reg.members[0].id,
        auction_date: outcome.auction.auction_date,
        amount: 0,
        distribution_date: outcome.auction.auction_date,
    }])
    .await
    .unwrap();
    txn.commit().await.unwrap();

    let err = ledger.verify_invariants(reg.chit.id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Conflict(ConflictError::RepeatWinner { won_period: 1, .. })
    ));
}

#[tokio::test]
async fn test_verify_detects_period_out_of_step_with_auctions() {
    let (store, ledger, reg, _) = settled_period().await;

    let mut chit = ledger.chit(reg.chit.id).await.unwrap();
    chit.current_period = 3;
    let mut txn = store.begin().await.unwrap();
    txn.update_chit(&chit).await.unwrap();
    txn.commit().await.unwrap();

    let err = ledger.verify_invariants(reg.chit.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Corrupt(_))));
}

#[tokio::test]
async fn test_verify_detects_completed_chit_with_open_periods() {
    let (store, ledger, reg, _) = settled_period().await;

    let mut chit = ledger.chit(reg.chit.id).await.unwrap();
    chit.status = ChitStatus::Completed;
    let mut txn = store.begin().await.unwrap();
    txn.update_chit(&chit).await.unwrap();
    txn.commit().await.unwrap();

    let err = ledger.verify_invariants(reg.chit.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Storage(StorageError::Corrupt(_))));
}

#[tokio::test]
async fn test_unknown_chit_registers_no_gate() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});

    let err = ledger
        .record_contribution(ContributionEntry {
            chit: ChitId(9_999),
            member: MemberId(1),
            period: 1,
            amount: 1_000,
            date: date(2025, 1, 10),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation(ValidationError::UnknownChit(_))
    ));
    let request = PeriodAdvance {
        chit: ChitId(9_998),
        period: 1,
        winner: MemberId(1),
        discount: Percent::whole(10),
        date: date(2025, 1, 20),
    };
    assert!(ledger.advance_period(request).await.is_err());
    assert!(ledger.cancel(ChitId(9_997)).await.is_err());
    assert_eq!(ledger.gates.len(), 0);
}

#[tokio::test]
async fn test_gate_released_when_chit_ends() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;

    for period in 1..=3 {
        pay(&ledger, &reg, period).await;
        assert_eq!(ledger.gates.len(), 1);
        ledger
            .advance_period(advance(&reg, period, (period - 1) as usize))
            .await
            .unwrap();
    }
    assert_eq!(ledger.chit(reg.chit.id).await.unwrap().status, ChitStatus::Completed);
    assert_eq!(ledger.gates.len(), 0);

    // Writes against the finished chit are refused without re-registering.
    assert!(ledger.advance_period(advance(&reg, 3, 2)).await.is_err());
    assert!(ledger.cancel(reg.chit.id).await.is_err());
    assert_eq!(ledger.gates.len(), 0);
}

#[tokio::test]
async fn test_cancel_is_terminal() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;
    pay(&ledger, &reg, 1).await;

    let cancelled = ledger.cancel(reg.chit.id).await.unwrap();
    assert_eq!(cancelled.status, ChitStatus::Cancelled);
    assert_eq!(ledger.gates.len(), 0);

    let err = ledger.cancel(reg.chit.id).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::State(StateError::ChitNotActive {
            status: ChitStatus::Cancelled,
            ..
        })
    ));

    let err = ledger.advance_period(advance(&reg, 1, 0)).await.unwrap_err();
    match err {
        LedgerError::State(state) => assert_eq!(state.status(), ChitStatus::Cancelled),
        other => panic!("expected state error, got {other:?}"),
    }
    assert!(ledger.past_winners(reg.chit.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_registration_rejects_duplicate_contact() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let roster = vec![
        RosterEntry {
            name: "A".to_string(),
            contact: "same@example.com".to_string(),
            address: None,
            ticket_number: 1,
            join_date: date(2025, 1, 1),
        },
        RosterEntry {
            name: "B".to_string(),
            contact: "same@example.com".to_string(),
            address: None,
            ticket_number: 2,
            join_date: date(2025, 1, 1),
        },
    ];
    let err = ledger
        .register_chit(
            NewChit {
                name: "Dupes".to_string(),
                chit_value: 2_000,
                duration: 2,
                group_size: 2,
                foreman_commission: Percent::whole(5),
                start_date: date(2025, 1, 15),
                installment_amount: 1_000,
            },
            roster,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Conflict(ConflictError::DuplicateMember(_))
    ));
}

#[tokio::test]
async fn test_queries() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let reg = register(&ledger).await;

    ledger
        .record_contribution(ContributionEntry {
            chit: reg.chit.id,
            member: reg.members[0].id,
            period: 1,
            amount: 1_000,
            date: date(2025, 1, 10),
            notes: None,
        })
        .await
        .unwrap();

    let status = ledger.period_status(reg.chit.id, 1).await.unwrap();
    assert_eq!(status.len(), 3);
    assert_eq!(status[0].status, PaymentStatus::Paid);
    assert_eq!(status[0].amount_paid, 1_000);
    assert_eq!(status[1].status, PaymentStatus::Due);
    assert_eq!(status[1].amount_paid, 0);

    assert!(!ledger.is_period_complete(reg.chit.id, 1).await.unwrap());
    assert_eq!(ledger.cumulative_contributions(reg.chit.id).await.unwrap(), 1_000);
    assert_eq!(ledger.due_date(reg.chit.id, 3).await.unwrap(), date(2025, 3, 15));
    assert_eq!(
        ledger.outstanding_eligible_members(reg.chit.id).await.unwrap().len(),
        3
    );

    let err = ledger.chit(ChitId(9_999)).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Validation(ValidationError::UnknownChit(_))
    ));
}

#[tokio::test]
async fn test_address_and_notes_flow_through_ledger() {
    let store = InMemoryLedgerStore::new();
    let ledger = ledger(&store, |_| {});
    let registered = ledger
        .register_chit(
            NewChit {
                name: "Remarks".to_string(),
                chit_value: 1_000,
                duration: 1,
                group_size: 1,
                foreman_commission: Percent::whole(5),
                start_date: date(2025, 1, 15),
                installment_amount: 1_000,
            },
            vec![RosterEntry {
                name: "Solo".to_string(),
                contact: "solo@example.com".to_string(),
                address: Some("4 Market Road".to_string()),
                ticket_number: 1,
                join_date: date(2025, 1, 1),
            }],
        )
        .await
        .unwrap();
    let member = &registered.members[0];
    assert_eq!(member.address.as_deref(), Some("4 Market Road"));

    let recorded = ledger
        .record_contribution(ContributionEntry {
            chit: registered.chit.id,
            member: member.id,
            period: 1,
            amount: 1_000,
            date: date(2025, 1, 10),
            notes: Some("cheque 0042".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(recorded.notes.as_deref(), Some("cheque 0042"));
    assert_eq!(
        ledger.members(registered.chit.id).await.unwrap()[0].address,
        member.address
    );
}
