//! SQLite LedgerStore implementation.

use async_trait::async_trait;
use chrono::NaiveDate;
use sea_query::{Asterisk, Expr, Order, Query, SqliteQueryBuilder};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};
use tracing::{debug, warn};

use crate::interfaces::{LedgerStore, LedgerTxn, Result, StorageError};
use crate::model::{
    Auction, AuctionId, Chit, ChitId, ChitStatus, Contribution, ContributionId, Dividend,
    DividendId, Member, MemberId, NewAuction, NewChit, NewContribution, NewDividend, NewMember,
    NewRetainedSurplus, Percent, RetainedSurplus, RetainedSurplusId,
};
use crate::storage::schema::{
    Auctions, Chits, Contributions, Dividends, Members, RetainedSurpluses, CREATE_LEDGER_TABLES,
};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite implementation of LedgerStore.
///
/// Every transaction holds one pooled connection for its lifetime.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    /// Create a new SQLite ledger store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the ledger tables if they do not exist.
    pub async fn init(&self) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_LEDGER_TABLES).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        let mut conn = self.pool.acquire().await?;
        // BEGIN IMMEDIATE acquires the write lock upfront, preventing deadlocks
        // when concurrent DEFERRED transactions race to upgrade from shared to exclusive.
        sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut *conn)
            .await
            .map_err(transient)?;
        Ok(Box::new(SqliteTxn {
            conn,
            finished: false,
        }))
    }
}

struct SqliteTxn {
    conn: PoolConnection<Sqlite>,
    finished: bool,
}

impl Drop for SqliteTxn {
    fn drop(&mut self) {
        if !self.finished {
            // The connection still holds an open transaction; never hand it
            // back to the pool in that state.
            warn!("SQLite ledger transaction dropped without commit or rollback");
            self.conn.close_on_drop();
        }
    }
}

/// Busy and locked databases are transient; everything else passes through.
fn transient(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if matches!(db.code().as_deref(), Some("5" | "6" | "261" | "517")) {
            return StorageError::Aborted(db.message().to_string());
        }
    }
    StorageError::Database(err)
}

/// Map constraint violations on insert to the storage error taxonomy.
fn insert_error(entity: &'static str, key: impl FnOnce() -> String, err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return StorageError::Duplicate { entity, key: key() };
        }
        if db.is_foreign_key_violation() {
            return StorageError::DanglingReference {
                entity,
                reference: key(),
            };
        }
    }
    transient(err)
}

fn signed(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StorageError::Corrupt(format!("{what} {value} exceeds the storable range")))
}

fn unsigned<T: TryFrom<i64>>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: i64 = row.try_get(column)?;
    T::try_from(raw).map_err(|_| StorageError::Corrupt(format!("{column} = {raw}")))
}

fn date(row: &SqliteRow, column: &str) -> Result<NaiveDate> {
    let raw: String = row.try_get(column)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| StorageError::Corrupt(format!("{column} = {raw}: {e}")))
}

fn fmt_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn chit_from_row(row: &SqliteRow) -> Result<Chit> {
    let status: String = row.try_get("status")?;
    Ok(Chit {
        id: ChitId(unsigned(row, "id")?),
        name: row.try_get("name")?,
        chit_value: unsigned(row, "chit_value")?,
        duration: unsigned(row, "duration")?,
        group_size: unsigned(row, "group_size")?,
        foreman_commission: Percent::from_bps(unsigned(row, "foreman_commission_bps")?),
        start_date: date(row, "start_date")?,
        installment_amount: unsigned(row, "installment_amount")?,
        status: ChitStatus::parse(&status)
            .ok_or_else(|| StorageError::Corrupt(format!("status = {status}")))?,
        current_period: unsigned(row, "current_period")?,
    })
}

fn member_from_row(row: &SqliteRow) -> Result<Member> {
    Ok(Member {
        id: MemberId(unsigned(row, "id")?),
        chit_id: ChitId(unsigned(row, "chit_id")?),
        name: row.try_get("name")?,
        contact: row.try_get("contact")?,
        address: row.try_get("address")?,
        ticket_number: unsigned(row, "ticket_number")?,
        join_date: date(row, "join_date")?,
    })
}

fn contribution_from_row(row: &SqliteRow) -> Result<Contribution> {
    Ok(Contribution {
        id: ContributionId(unsigned(row, "id")?),
        chit_id: ChitId(unsigned(row, "chit_id")?),
        member_id: MemberId(unsigned(row, "member_id")?),
        period: unsigned(row, "period")?,
        amount_paid: unsigned(row, "amount_paid")?,
        payment_date: date(row, "payment_date")?,
        notes: row.try_get("notes")?,
    })
}

fn auction_from_row(row: &SqliteRow) -> Result<Auction> {
    Ok(Auction {
        id: AuctionId(unsigned(row, "id")?),
        chit_id: ChitId(unsigned(row, "chit_id")?),
        period: unsigned(row, "period")?,
        auction_date: date(row, "auction_date")?,
        winner: MemberId(unsigned(row, "winner_id")?),
        discount: Percent::from_bps(unsigned(row, "discount_bps")?),
        prize_money: unsigned(row, "prize_money")?,
        foreman_commission: unsigned(row, "foreman_commission")?,
        distributable_surplus: unsigned(row, "distributable_surplus")?,
    })
}

fn dividend_from_row(row: &SqliteRow) -> Result<Dividend> {
    Ok(Dividend {
        id: DividendId(unsigned(row, "id")?),
        chit_id: ChitId(unsigned(row, "chit_id")?),
        auction_id: AuctionId(unsigned(row, "auction_id")?),
        member_id: MemberId(unsigned(row, "member_id")?),
        auction_date: date(row, "auction_date")?,
        amount: unsigned(row, "amount")?,
        distribution_date: date(row, "distribution_date")?,
    })
}

fn retained_from_row(row: &SqliteRow) -> Result<RetainedSurplus> {
    Ok(RetainedSurplus {
        id: RetainedSurplusId(unsigned(row, "id")?),
        chit_id: ChitId(unsigned(row, "chit_id")?),
        auction_id: AuctionId(unsigned(row, "auction_id")?),
        amount: unsigned(row, "amount")?,
        recorded_on: date(row, "recorded_on")?,
    })
}

impl SqliteTxn {
    async fn fetch_all<T>(
        &mut self,
        query: &str,
        decode: fn(&SqliteRow) -> Result<T>,
    ) -> Result<Vec<T>> {
        let rows = sqlx::query(query).fetch_all(&mut *self.conn).await?;
        rows.iter().map(decode).collect()
    }

    async fn fetch_optional<T>(
        &mut self,
        query: &str,
        decode: fn(&SqliteRow) -> Result<T>,
    ) -> Result<Option<T>> {
        let row = sqlx::query(query).fetch_optional(&mut *self.conn).await?;
        row.as_ref().map(decode).transpose()
    }

    async fn insert_returning_id(
        &mut self,
        query: &str,
        entity: &'static str,
        key: impl FnOnce() -> String + Send,
    ) -> Result<u64> {
        let row = sqlx::query(query)
            .fetch_one(&mut *self.conn)
            .await
            .map_err(|e| insert_error(entity, key, e))?;
        unsigned(&row, "id")
    }

    async fn insert_dividend(&mut self, dividend: NewDividend) -> Result<Dividend> {
        let query = Query::insert()
            .into_table(Dividends::Table)
            .columns([
                Dividends::ChitId,
                Dividends::AuctionId,
                Dividends::MemberId,
                Dividends::AuctionDate,
                Dividends::Amount,
                Dividends::DistributionDate,
            ])
            .values_panic([
                signed(dividend.chit_id.0, "chit id")?.into(),
                signed(dividend.auction_id.0, "auction id")?.into(),
                signed(dividend.member_id.0, "member id")?.into(),
                fmt_date(dividend.auction_date).into(),
                signed(dividend.amount, "dividend amount")?.into(),
                fmt_date(dividend.distribution_date).into(),
            ])
            .returning_col(Dividends::Id)
            .to_string(SqliteQueryBuilder);

        let (auction, member) = (dividend.auction_id, dividend.member_id);
        let id = self
            .insert_returning_id(&query, "dividend", move || {
                format!("auction {auction} member {member}")
            })
            .await?;

        Ok(Dividend {
            id: DividendId(id),
            chit_id: dividend.chit_id,
            auction_id: dividend.auction_id,
            member_id: dividend.member_id,
            auction_date: dividend.auction_date,
            amount: dividend.amount,
            distribution_date: dividend.distribution_date,
        })
    }
}

#[async_trait]
impl LedgerTxn for SqliteTxn {
    async fn insert_chit(&mut self, chit: NewChit) -> Result<Chit> {
        let query = Query::insert()
            .into_table(Chits::Table)
            .columns([
                Chits::Name,
                Chits::ChitValue,
                Chits::Duration,
                Chits::GroupSize,
                Chits::ForemanCommissionBps,
                Chits::StartDate,
                Chits::InstallmentAmount,
                Chits::Status,
                Chits::CurrentPeriod,
            ])
            .values_panic([
                chit.name.clone().into(),
                signed(chit.chit_value, "chit value")?.into(),
                chit.duration.into(),
                chit.group_size.into(),
                chit.foreman_commission.bps().into(),
                fmt_date(chit.start_date).into(),
                signed(chit.installment_amount, "installment")?.into(),
                ChitStatus::Active.as_str().into(),
                1u32.into(),
            ])
            .returning_col(Chits::Id)
            .to_string(SqliteQueryBuilder);

        let name = chit.name.clone();
        let id = self
            .insert_returning_id(&query, "chit", move || name)
            .await?;

        Ok(Chit {
            id: ChitId(id),
            name: chit.name,
            chit_value: chit.chit_value,
            duration: chit.duration,
            group_size: chit.group_size,
            foreman_commission: chit.foreman_commission,
            start_date: chit.start_date,
            installment_amount: chit.installment_amount,
            status: ChitStatus::Active,
            current_period: 1,
        })
    }

    async fn get_chit(&mut self, id: ChitId) -> Result<Option<Chit>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Chits::Table)
            .and_where(Expr::col(Chits::Id).eq(signed(id.0, "chit id")?))
            .to_string(SqliteQueryBuilder);
        self.fetch_optional(&query, chit_from_row).await
    }

    async fn update_chit(&mut self, chit: &Chit) -> Result<()> {
        let query = Query::update()
            .table(Chits::Table)
            .values([
                (Chits::Status, chit.status.as_str().into()),
                (Chits::CurrentPeriod, chit.current_period.into()),
            ])
            .and_where(Expr::col(Chits::Id).eq(signed(chit.id.0, "chit id")?))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&mut *self.conn).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                entity: "chit",
                id: chit.id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_member(&mut self, member: NewMember) -> Result<Member> {
        let query = Query::insert()
            .into_table(Members::Table)
            .columns([
                Members::ChitId,
                Members::Name,
                Members::Contact,
                Members::Address,
                Members::TicketNumber,
                Members::JoinDate,
            ])
            .values_panic([
                signed(member.chit_id.0, "chit id")?.into(),
                member.name.clone().into(),
                member.contact.clone().into(),
                member.address.clone().into(),
                member.ticket_number.into(),
                fmt_date(member.join_date).into(),
            ])
            .returning_col(Members::Id)
            .to_string(SqliteQueryBuilder);

        let key = format!(
            "contact {} or chit {} ticket {}",
            member.contact, member.chit_id, member.ticket_number
        );
        let id = self
            .insert_returning_id(&query, "member", move || key)
            .await?;

        Ok(Member {
            id: MemberId(id),
            chit_id: member.chit_id,
            name: member.name,
            contact: member.contact,
            address: member.address,
            ticket_number: member.ticket_number,
            join_date: member.join_date,
        })
    }

    async fn get_member(&mut self, id: MemberId) -> Result<Option<Member>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Members::Table)
            .and_where(Expr::col(Members::Id).eq(signed(id.0, "member id")?))
            .to_string(SqliteQueryBuilder);
        self.fetch_optional(&query, member_from_row).await
    }

    async fn members(&mut self, chit: ChitId) -> Result<Vec<Member>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Members::Table)
            .and_where(Expr::col(Members::ChitId).eq(signed(chit.0, "chit id")?))
            .order_by(Members::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        self.fetch_all(&query, member_from_row).await
    }

    async fn insert_contribution(&mut self, contribution: NewContribution) -> Result<Contribution> {
        let query = Query::insert()
            .into_table(Contributions::Table)
            .columns([
                Contributions::ChitId,
                Contributions::MemberId,
                Contributions::Period,
                Contributions::AmountPaid,
                Contributions::PaymentDate,
                Contributions::Notes,
            ])
            .values_panic([
                signed(contribution.chit_id.0, "chit id")?.into(),
                signed(contribution.member_id.0, "member id")?.into(),
                contribution.period.into(),
                signed(contribution.amount_paid, "amount paid")?.into(),
                fmt_date(contribution.payment_date).into(),
                contribution.notes.clone().into(),
            ])
            .returning_col(Contributions::Id)
            .to_string(SqliteQueryBuilder);

        let key = format!(
            "member {} chit {} period {}",
            contribution.member_id, contribution.chit_id, contribution.period
        );
        let id = self
            .insert_returning_id(&query, "contribution", move || key)
            .await?;

        Ok(Contribution {
            id: ContributionId(id),
            chit_id: contribution.chit_id,
            member_id: contribution.member_id,
            period: contribution.period,
            amount_paid: contribution.amount_paid,
            payment_date: contribution.payment_date,
            notes: contribution.notes,
        })
    }

    async fn contributions(&mut self, chit: ChitId, period: Option<u32>) -> Result<Vec<Contribution>> {
        let chit = signed(chit.0, "chit id")?;
        // SelectStatement is not Send; render it before awaiting.
        let query = {
            let mut select = Query::select();
            select
                .column(Asterisk)
                .from(Contributions::Table)
                .and_where(Expr::col(Contributions::ChitId).eq(chit));
            if let Some(period) = period {
                select.and_where(Expr::col(Contributions::Period).eq(period));
            }
            select
                .order_by(Contributions::Id, Order::Asc)
                .to_string(SqliteQueryBuilder)
        };
        self.fetch_all(&query, contribution_from_row).await
    }

    async fn insert_auction(&mut self, auction: NewAuction) -> Result<Auction> {
        let query = Query::insert()
            .into_table(Auctions::Table)
            .columns([
                Auctions::ChitId,
                Auctions::Period,
                Auctions::AuctionDate,
                Auctions::WinnerId,
                Auctions::DiscountBps,
                Auctions::PrizeMoney,
                Auctions::ForemanCommission,
                Auctions::DistributableSurplus,
            ])
            .values_panic([
                signed(auction.chit_id.0, "chit id")?.into(),
                auction.period.into(),
                fmt_date(auction.auction_date).into(),
                signed(auction.winner.0, "member id")?.into(),
                auction.discount.bps().into(),
                signed(auction.prize_money, "prize money")?.into(),
                signed(auction.foreman_commission, "foreman commission")?.into(),
                signed(auction.distributable_surplus, "surplus")?.into(),
            ])
            .returning_col(Auctions::Id)
            .to_string(SqliteQueryBuilder);

        let key = format!("chit {} period {}", auction.chit_id, auction.period);
        let id = self
            .insert_returning_id(&query, "auction", move || key)
            .await?;

        Ok(Auction {
            id: AuctionId(id),
            chit_id: auction.chit_id,
            period: auction.period,
            auction_date: auction.auction_date,
            winner: auction.winner,
            discount: auction.discount,
            prize_money: auction.prize_money,
            foreman_commission: auction.foreman_commission,
            distributable_surplus: auction.distributable_surplus,
        })
    }

    async fn auctions(&mut self, chit: ChitId) -> Result<Vec<Auction>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Auctions::Table)
            .and_where(Expr::col(Auctions::ChitId).eq(signed(chit.0, "chit id")?))
            .order_by(Auctions::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        self.fetch_all(&query, auction_from_row).await
    }

    async fn auction_for_period(&mut self, chit: ChitId, period: u32) -> Result<Option<Auction>> {
        let query = Query::select()
            .column(Asterisk)
            .from(Auctions::Table)
            .and_where(Expr::col(Auctions::ChitId).eq(signed(chit.0, "chit id")?))
            .and_where(Expr::col(Auctions::Period).eq(period))
            .to_string(SqliteQueryBuilder);
        self.fetch_optional(&query, auction_from_row).await
    }

    async fn insert_dividends(&mut self, dividends: Vec<NewDividend>) -> Result<Vec<Dividend>> {
        // Savepoint so a rejected row leaves no partial batch behind while
        // the outer transaction stays usable.
        sqlx::query("SAVEPOINT dividends")
            .execute(&mut *self.conn)
            .await?;

        let mut inserted = Vec::with_capacity(dividends.len());
        for dividend in dividends {
            match self.insert_dividend(dividend).await {
                Ok(row) => inserted.push(row),
                Err(e) => {
                    sqlx::query("ROLLBACK TO dividends")
                        .execute(&mut *self.conn)
                        .await?;
                    sqlx::query("RELEASE dividends")
                        .execute(&mut *self.conn)
                        .await?;
                    return Err(e);
                }
            }
        }

        sqlx::query("RELEASE dividends")
            .execute(&mut *self.conn)
            .await?;
        Ok(inserted)
    }

    async fn dividends(&mut self, chit: ChitId, auction: Option<AuctionId>) -> Result<Vec<Dividend>> {
        let chit = signed(chit.0, "chit id")?;
        let auction = auction.map(|a| signed(a.0, "auction id")).transpose()?;
        let query = {
            let mut select = Query::select();
            select
                .column(Asterisk)
                .from(Dividends::Table)
                .and_where(Expr::col(Dividends::ChitId).eq(chit));
            if let Some(auction) = auction {
                select.and_where(Expr::col(Dividends::AuctionId).eq(auction));
            }
            select
                .order_by(Dividends::Id, Order::Asc)
                .to_string(SqliteQueryBuilder)
        };
        self.fetch_all(&query, dividend_from_row).await
    }

    async fn insert_retained_surplus(&mut self, retained: NewRetainedSurplus) -> Result<RetainedSurplus> {
        let query = Query::insert()
            .into_table(RetainedSurpluses::Table)
            .columns([
                RetainedSurpluses::ChitId,
                RetainedSurpluses::AuctionId,
                RetainedSurpluses::Amount,
                RetainedSurpluses::RecordedOn,
            ])
            .values_panic([
                signed(retained.chit_id.0, "chit id")?.into(),
                signed(retained.auction_id.0, "auction id")?.into(),
                signed(retained.amount, "retained amount")?.into(),
                fmt_date(retained.recorded_on).into(),
            ])
            .returning_col(RetainedSurpluses::Id)
            .to_string(SqliteQueryBuilder);

        let key = format!("auction {}", retained.auction_id);
        let id = self
            .insert_returning_id(&query, "retained surplus", move || key)
            .await?;

        Ok(RetainedSurplus {
            id: RetainedSurplusId(id),
            chit_id: retained.chit_id,
            auction_id: retained.auction_id,
            amount: retained.amount,
            recorded_on: retained.recorded_on,
        })
    }

    async fn retained_surpluses(&mut self, chit: ChitId) -> Result<Vec<RetainedSurplus>> {
        let query = Query::select()
            .column(Asterisk)
            .from(RetainedSurpluses::Table)
            .and_where(Expr::col(RetainedSurpluses::ChitId).eq(signed(chit.0, "chit id")?))
            .order_by(RetainedSurpluses::Id, Order::Asc)
            .to_string(SqliteQueryBuilder);
        self.fetch_all(&query, retained_from_row).await
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        sqlx::query("COMMIT")
            .execute(&mut *self.conn)
            .await
            .map_err(transient)?;
        self.finished = true;
        debug!("Committed SQLite ledger transaction");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.finished = true;
        Ok(())
    }
}
