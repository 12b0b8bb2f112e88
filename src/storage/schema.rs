//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

#[derive(Iden)]
pub enum Chits {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "name"]
    Name,
    #[iden = "chit_value"]
    ChitValue,
    #[iden = "duration"]
    Duration,
    #[iden = "group_size"]
    GroupSize,
    #[iden = "foreman_commission_bps"]
    ForemanCommissionBps,
    #[iden = "start_date"]
    StartDate,
    #[iden = "installment_amount"]
    InstallmentAmount,
    #[iden = "status"]
    Status,
    #[iden = "current_period"]
    CurrentPeriod,
}

#[derive(Iden)]
pub enum Members {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "chit_id"]
    ChitId,
    #[iden = "name"]
    Name,
    #[iden = "contact"]
    Contact,
    #[iden = "address"]
    Address,
    #[iden = "ticket_number"]
    TicketNumber,
    #[iden = "join_date"]
    JoinDate,
}

#[derive(Iden)]
pub enum Contributions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "chit_id"]
    ChitId,
    #[iden = "member_id"]
    MemberId,
    #[iden = "period"]
    Period,
    #[iden = "amount_paid"]
    AmountPaid,
    #[iden = "payment_date"]
    PaymentDate,
    #[iden = "notes"]
    Notes,
}

#[derive(Iden)]
pub enum Auctions {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "chit_id"]
    ChitId,
    #[iden = "period"]
    Period,
    #[iden = "auction_date"]
    AuctionDate,
    #[iden = "winner_id"]
    WinnerId,
    #[iden = "discount_bps"]
    DiscountBps,
    #[iden = "prize_money"]
    PrizeMoney,
    #[iden = "foreman_commission"]
    ForemanCommission,
    #[iden = "distributable_surplus"]
    DistributableSurplus,
}

#[derive(Iden)]
pub enum Dividends {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "chit_id"]
    ChitId,
    #[iden = "auction_id"]
    AuctionId,
    #[iden = "member_id"]
    MemberId,
    #[iden = "auction_date"]
    AuctionDate,
    #[iden = "amount"]
    Amount,
    #[iden = "distribution_date"]
    DistributionDate,
}

#[derive(Iden)]
pub enum RetainedSurpluses {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "chit_id"]
    ChitId,
    #[iden = "auction_id"]
    AuctionId,
    #[iden = "amount"]
    Amount,
    #[iden = "recorded_on"]
    RecordedOn,
}

/// SQL for creating the ledger tables.
///
/// Child rows reference their parent together with the chit id, so a
/// contribution, auction or dividend can never point at a member or auction
/// of a different chit.
pub const CREATE_LEDGER_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    chit_value INTEGER NOT NULL,
    duration INTEGER NOT NULL,
    group_size INTEGER NOT NULL,
    foreman_commission_bps INTEGER NOT NULL,
    start_date TEXT NOT NULL,
    installment_amount INTEGER NOT NULL,
    status TEXT NOT NULL,
    current_period INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chit_id INTEGER NOT NULL REFERENCES chits(id),
    name TEXT NOT NULL,
    contact TEXT NOT NULL UNIQUE,
    address TEXT,
    ticket_number INTEGER NOT NULL,
    join_date TEXT NOT NULL,
    UNIQUE (chit_id, ticket_number),
    UNIQUE (id, chit_id)
);

CREATE TABLE IF NOT EXISTS contributions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chit_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    period INTEGER NOT NULL,
    amount_paid INTEGER NOT NULL,
    payment_date TEXT NOT NULL,
    notes TEXT,
    UNIQUE (member_id, chit_id, period),
    FOREIGN KEY (member_id, chit_id) REFERENCES members(id, chit_id)
);

CREATE TABLE IF NOT EXISTS auctions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chit_id INTEGER NOT NULL,
    period INTEGER NOT NULL,
    auction_date TEXT NOT NULL,
    winner_id INTEGER NOT NULL,
    discount_bps INTEGER NOT NULL,
    prize_money INTEGER NOT NULL,
    foreman_commission INTEGER NOT NULL,
    distributable_surplus INTEGER NOT NULL,
    UNIQUE (chit_id, period),
    UNIQUE (id, chit_id),
    FOREIGN KEY (winner_id, chit_id) REFERENCES members(id, chit_id)
);

CREATE TABLE IF NOT EXISTS dividends (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chit_id INTEGER NOT NULL,
    auction_id INTEGER NOT NULL,
    member_id INTEGER NOT NULL,
    auction_date TEXT NOT NULL,
    amount INTEGER NOT NULL,
    distribution_date TEXT NOT NULL,
    UNIQUE (auction_id, member_id),
    FOREIGN KEY (auction_id, chit_id) REFERENCES auctions(id, chit_id),
    FOREIGN KEY (member_id, chit_id) REFERENCES members(id, chit_id)
);

CREATE TABLE IF NOT EXISTS retained_surpluses (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chit_id INTEGER NOT NULL,
    auction_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    recorded_on TEXT NOT NULL,
    UNIQUE (auction_id),
    FOREIGN KEY (auction_id, chit_id) REFERENCES auctions(id, chit_id)
);

CREATE INDEX IF NOT EXISTS idx_contributions_chit_period ON contributions(chit_id, period);
CREATE INDEX IF NOT EXISTS idx_dividends_chit ON dividends(chit_id);
"#;
