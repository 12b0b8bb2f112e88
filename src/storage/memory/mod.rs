//! In-memory ledger store.
//!
//! Each transaction stages its writes privately and reads through to the
//! committed tables. Commit takes the write lock, re-checks uniqueness and
//! references against whatever committed in the meantime, and applies the
//! staged rows in one step.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::interfaces::{LedgerStore, LedgerTxn, Result, StorageError};
use crate::model::{
    Auction, AuctionId, Chit, ChitId, Contribution, ContributionId, Dividend, DividendId, Member,
    MemberId, NewAuction, NewChit, NewContribution, NewDividend, NewMember, NewRetainedSurplus,
    RetainedSurplus, RetainedSurplusId,
};

#[derive(Debug, Default, Clone)]
struct Tables {
    chits: BTreeMap<ChitId, Chit>,
    members: BTreeMap<MemberId, Member>,
    contributions: BTreeMap<ContributionId, Contribution>,
    auctions: BTreeMap<AuctionId, Auction>,
    dividends: BTreeMap<DividendId, Dividend>,
    retained: BTreeMap<RetainedSurplusId, RetainedSurplus>,
}

#[derive(Debug, Default)]
struct Faults {
    fail_on_dividends: bool,
    fail_on_commit: bool,
    lose_commit_ack: bool,
    commit_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: RwLock<Tables>,
    next_id: AtomicU64,
    faults: RwLock<Faults>,
}

impl Shared {
    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Ledger store that keeps all records in process memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    shared: Arc<Shared>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `insert_dividends` fail with `StorageError::Aborted`.
    pub async fn set_fail_on_dividends(&self, fail: bool) {
        self.shared.faults.write().await.fail_on_dividends = fail;
    }

    /// Make `commit` fail with `StorageError::Aborted` without applying anything.
    pub async fn set_fail_on_commit(&self, fail: bool) {
        self.shared.faults.write().await.fail_on_commit = fail;
    }

    /// Apply every commit but report it as `StorageError::Aborted`, as if
    /// the acknowledgement was lost.
    pub async fn set_lose_commit_ack(&self, lose: bool) {
        self.shared.faults.write().await.lose_commit_ack = lose;
    }

    /// Sleep this long inside every commit before taking the write lock.
    pub async fn set_commit_delay(&self, delay: Option<Duration>) {
        self.shared.faults.write().await.commit_delay = delay;
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        Ok(Box::new(InMemoryTxn {
            shared: Arc::clone(&self.shared),
            staged: Tables::default(),
        }))
    }
}

struct InMemoryTxn {
    shared: Arc<Shared>,
    staged: Tables,
}

fn chit_exists(committed: &Tables, staged: &Tables, id: ChitId) -> bool {
    committed.chits.contains_key(&id) || staged.chits.contains_key(&id)
}

fn member_of(committed: &Tables, staged: &Tables, id: MemberId) -> Option<ChitId> {
    committed
        .members
        .get(&id)
        .or_else(|| staged.members.get(&id))
        .map(|m| m.chit_id)
}

fn auction_of(committed: &Tables, staged: &Tables, id: AuctionId) -> Option<ChitId> {
    committed
        .auctions
        .get(&id)
        .or_else(|| staged.auctions.get(&id))
        .map(|a| a.chit_id)
}

fn dangling(entity: &'static str, reference: impl Into<String>) -> StorageError {
    StorageError::DanglingReference {
        entity,
        reference: reference.into(),
    }
}

fn duplicate(entity: &'static str, key: impl Into<String>) -> StorageError {
    StorageError::Duplicate {
        entity,
        key: key.into(),
    }
}

fn check_member(committed: &Tables, staged: &Tables, member: &Member) -> Result<()> {
    if !chit_exists(committed, staged, member.chit_id) {
        return Err(dangling("member", format!("chit {}", member.chit_id)));
    }
    let clash = |m: &Member| {
        m.id != member.id
            && (m.contact == member.contact
                || (m.chit_id == member.chit_id && m.ticket_number == member.ticket_number))
    };
    if let Some(other) = committed.members.values().chain(staged.members.values()).find(|m| clash(m)) {
        let key = if other.contact == member.contact {
            format!("contact {}", member.contact)
        } else {
            format!("chit {} ticket {}", member.chit_id, member.ticket_number)
        };
        return Err(duplicate("member", key));
    }
    Ok(())
}

fn check_contribution(committed: &Tables, staged: &Tables, c: &Contribution) -> Result<()> {
    if !chit_exists(committed, staged, c.chit_id) {
        return Err(dangling("contribution", format!("chit {}", c.chit_id)));
    }
    if member_of(committed, staged, c.member_id) != Some(c.chit_id) {
        return Err(dangling("contribution", format!("member {}", c.member_id)));
    }
    let clash = committed
        .contributions
        .values()
        .chain(staged.contributions.values())
        .any(|o| {
            o.id != c.id && o.chit_id == c.chit_id && o.member_id == c.member_id && o.period == c.period
        });
    if clash {
        return Err(duplicate(
            "contribution",
            format!("member {} chit {} period {}", c.member_id, c.chit_id, c.period),
        ));
    }
    Ok(())
}

fn check_auction(committed: &Tables, staged: &Tables, a: &Auction) -> Result<()> {
    if !chit_exists(committed, staged, a.chit_id) {
        return Err(dangling("auction", format!("chit {}", a.chit_id)));
    }
    if member_of(committed, staged, a.winner) != Some(a.chit_id) {
        return Err(dangling("auction", format!("member {}", a.winner)));
    }
    let clash = committed
        .auctions
        .values()
        .chain(staged.auctions.values())
        .any(|o| o.id != a.id && o.chit_id == a.chit_id && o.period == a.period);
    if clash {
        return Err(duplicate("auction", format!("chit {} period {}", a.chit_id, a.period)));
    }
    Ok(())
}

fn check_dividend(committed: &Tables, staged: &Tables, d: &Dividend) -> Result<()> {
    if auction_of(committed, staged, d.auction_id) != Some(d.chit_id) {
        return Err(dangling("dividend", format!("auction {}", d.auction_id)));
    }
    if member_of(committed, staged, d.member_id) != Some(d.chit_id) {
        return Err(dangling("dividend", format!("member {}", d.member_id)));
    }
    let clash = committed
        .dividends
        .values()
        .chain(staged.dividends.values())
        .any(|o| o.id != d.id && o.auction_id == d.auction_id && o.member_id == d.member_id);
    if clash {
        return Err(duplicate(
            "dividend",
            format!("auction {} member {}", d.auction_id, d.member_id),
        ));
    }
    Ok(())
}

fn check_retained(committed: &Tables, staged: &Tables, r: &RetainedSurplus) -> Result<()> {
    if auction_of(committed, staged, r.auction_id) != Some(r.chit_id) {
        return Err(dangling("retained surplus", format!("auction {}", r.auction_id)));
    }
    let clash = committed
        .retained
        .values()
        .chain(staged.retained.values())
        .any(|o| o.id != r.id && o.auction_id == r.auction_id);
    if clash {
        return Err(duplicate("retained surplus", format!("auction {}", r.auction_id)));
    }
    Ok(())
}

/// Merge committed and staged rows of one table, staged rows winning.
fn merged<K: Ord + Copy, V: Clone>(
    committed: &BTreeMap<K, V>,
    staged: &BTreeMap<K, V>,
    keep: impl Fn(&V) -> bool,
) -> Vec<V> {
    let mut rows: BTreeMap<K, V> = committed
        .iter()
        .filter(|(_, v)| keep(v))
        .map(|(k, v)| (*k, v.clone()))
        .collect();
    rows.extend(staged.iter().filter(|(_, v)| keep(v)).map(|(k, v)| (*k, v.clone())));
    rows.into_values().collect()
}

#[async_trait]
impl LedgerTxn for InMemoryTxn {
    async fn insert_chit(&mut self, chit: NewChit) -> Result<Chit> {
        let chit = Chit {
            id: ChitId(self.shared.allocate()),
            name: chit.name,
            chit_value: chit.chit_value,
            duration: chit.duration,
            group_size: chit.group_size,
            foreman_commission: chit.foreman_commission,
            start_date: chit.start_date,
            installment_amount: chit.installment_amount,
            status: crate::model::ChitStatus::Active,
            current_period: 1,
        };
        self.staged.chits.insert(chit.id, chit.clone());
        Ok(chit)
    }

    async fn get_chit(&mut self, id: ChitId) -> Result<Option<Chit>> {
        if let Some(chit) = self.staged.chits.get(&id) {
            return Ok(Some(chit.clone()));
        }
        Ok(self.shared.tables.read().await.chits.get(&id).cloned())
    }

    async fn update_chit(&mut self, chit: &Chit) -> Result<()> {
        if self.get_chit(chit.id).await?.is_none() {
            return Err(StorageError::NotFound {
                entity: "chit",
                id: chit.id.to_string(),
            });
        }
        self.staged.chits.insert(chit.id, chit.clone());
        Ok(())
    }

    async fn insert_member(&mut self, member: NewMember) -> Result<Member> {
        let member = Member {
            id: MemberId(self.shared.allocate()),
            chit_id: member.chit_id,
            name: member.name,
            contact: member.contact,
            address: member.address,
            ticket_number: member.ticket_number,
            join_date: member.join_date,
        };
        check_member(&*self.shared.tables.read().await, &self.staged, &member)?;
        self.staged.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>> {
        if let Some(member) = self.staged.members.get(&id) {
            return Ok(Some(member.clone()));
        }
        Ok(self.shared.tables.read().await.members.get(&id).cloned())
    }

    async fn members(&mut self, chit: ChitId) -> Result<Vec<Member>> {
        let committed = self.shared.tables.read().await;
        Ok(merged(&committed.members, &self.staged.members, |m| m.chit_id == chit))
    }

    async fn insert_contribution(&mut self, contribution: NewContribution) -> Result<Contribution> {
        let contribution = Contribution {
            id: ContributionId(self.shared.allocate()),
            chit_id: contribution.chit_id,
            member_id: contribution.member_id,
            period: contribution.period,
            amount_paid: contribution.amount_paid,
            payment_date: contribution.payment_date,
            notes: contribution.notes,
        };
        check_contribution(&*self.shared.tables.read().await, &self.staged, &contribution)?;
        self.staged.contributions.insert(contribution.id, contribution.clone());
        Ok(contribution)
    }

    async fn contributions(&mut self, chit: ChitId, period: Option<u32>) -> Result<Vec<Contribution>> {
        let committed = self.shared.tables.read().await;
        Ok(merged(&committed.contributions, &self.staged.contributions, |c| {
            c.chit_id == chit && period.map_or(true, |p| c.period == p)
        }))
    }

    async fn insert_auction(&mut self, auction: NewAuction) -> Result<Auction> {
        let auction = Auction {
            id: AuctionId(self.shared.allocate()),
            chit_id: auction.chit_id,
            period: auction.period,
            auction_date: auction.auction_date,
            winner: auction.winner,
            discount: auction.discount,
            prize_money: auction.prize_money,
            foreman_commission: auction.foreman_commission,
            distributable_surplus: auction.distributable_surplus,
        };
        check_auction(&*self.shared.tables.read().await, &self.staged, &auction)?;
        self.staged.auctions.insert(auction.id, auction.clone());
        Ok(auction)
    }

    async fn auctions(&mut self, chit: ChitId) -> Result<Vec<Auction>> {
        let committed = self.shared.tables.read().await;
        Ok(merged(&committed.auctions, &self.staged.auctions, |a| a.chit_id == chit))
    }

    async fn auction_for_period(&mut self, chit: ChitId, period: u32) -> Result<Option<Auction>> {
        Ok(self
            .auctions(chit)
            .await?
            .into_iter()
            .find(|a| a.period == period))
    }

    async fn insert_dividends(&mut self, dividends: Vec<NewDividend>) -> Result<Vec<Dividend>> {
        if self.shared.faults.read().await.fail_on_dividends {
            return Err(StorageError::Aborted("injected dividend failure".to_string()));
        }

        let committed = self.shared.tables.read().await;
        // Stage into a scratch copy so a rejected row leaves no partial batch.
        let mut view = self.staged.clone();
        let mut inserted = Vec::with_capacity(dividends.len());
        for dividend in dividends {
            let dividend = Dividend {
                id: DividendId(self.shared.allocate()),
                chit_id: dividend.chit_id,
                auction_id: dividend.auction_id,
                member_id: dividend.member_id,
                auction_date: dividend.auction_date,
                amount: dividend.amount,
                distribution_date: dividend.distribution_date,
            };
            check_dividend(&committed, &view, &dividend)?;
            view.dividends.insert(dividend.id, dividend.clone());
            inserted.push(dividend);
        }
        drop(committed);

        self.staged = view;
        Ok(inserted)
    }

    async fn dividends(&mut self, chit: ChitId, auction: Option<AuctionId>) -> Result<Vec<Dividend>> {
        let committed = self.shared.tables.read().await;
        Ok(merged(&committed.dividends, &self.staged.dividends, |d| {
            d.chit_id == chit && auction.map_or(true, |a| d.auction_id == a)
        }))
    }

    async fn insert_retained_surplus(&mut self, retained: NewRetainedSurplus) -> Result<RetainedSurplus> {
        let retained = RetainedSurplus {
            id: RetainedSurplusId(self.shared.allocate()),
            chit_id: retained.chit_id,
            auction_id: retained.auction_id,
            amount: retained.amount,
            recorded_on: retained.recorded_on,
        };
        check_retained(&*self.shared.tables.read().await, &self.staged, &retained)?;
        self.staged.retained.insert(retained.id, retained.clone());
        Ok(retained)
    }

    async fn retained_surpluses(&mut self, chit: ChitId) -> Result<Vec<RetainedSurplus>> {
        let committed = self.shared.tables.read().await;
        Ok(merged(&committed.retained, &self.staged.retained, |r| r.chit_id == chit))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryTxn { shared, staged } = *self;

        let (fail, lose_ack, delay) = {
            let faults = shared.faults.read().await;
            (faults.fail_on_commit, faults.lose_commit_ack, faults.commit_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(StorageError::Aborted("injected commit failure".to_string()));
        }

        let mut committed = shared.tables.write().await;

        // Re-validate against rows committed since this transaction staged
        // them. Staged parents count as references; staged siblings were
        // already checked against each other on insert.
        let parents = Tables {
            chits: staged.chits.clone(),
            members: staged.members.clone(),
            auctions: staged.auctions.clone(),
            ..Tables::default()
        };
        for member in staged.members.values() {
            check_member(&committed, &staged, member)?;
        }
        for contribution in staged.contributions.values() {
            check_contribution(&committed, &parents, contribution)?;
        }
        for auction in staged.auctions.values() {
            check_auction(&committed, &parents, auction)?;
        }
        for dividend in staged.dividends.values() {
            check_dividend(&committed, &parents, dividend)?;
        }
        for retained in staged.retained.values() {
            check_retained(&committed, &parents, retained)?;
        }

        debug!(
            chits = staged.chits.len(),
            contributions = staged.contributions.len(),
            auctions = staged.auctions.len(),
            dividends = staged.dividends.len(),
            "Committing in-memory ledger transaction"
        );
        let Tables {
            chits,
            members,
            contributions,
            auctions,
            dividends,
            retained,
        } = staged;
        committed.chits.extend(chits);
        committed.members.extend(members);
        committed.contributions.extend(contributions);
        committed.auctions.extend(auctions);
        committed.dividends.extend(dividends);
        committed.retained.extend(retained);

        if lose_ack {
            return Err(StorageError::Aborted(
                "injected lost commit acknowledgement".to_string(),
            ));
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
