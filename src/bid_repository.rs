use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::schema::nft_bids;

pub struct BidRepository {
    db_client: Arc<PostgreSqlClient>,
}

impl BidRepository {
    pub fn new(db_client: Arc<PostgreSqlClient>) -> Self {
        BidRepository { db_client }
    }

    pub fn insert_with_conn(conn: &mut PgConnection, new_bid: NewBid) -> QueryResult<BidEntity> {
        diesel::insert_into(nft_bids::table)
            .values(new_bid)
            .get_result(conn)
    }

    pub fn list_active_for_nft(
        &self,
        nft: Uuid,
    ) -> Result<Vec<BidEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(nft_bids::table
            .filter(nft_bids::nft_id.eq(nft))
            .filter(nft_bids::status.eq(BidStatus::Active.as_str()))
            .order(nft_bids::created_at.desc())
            .load::<BidEntity>(&mut conn)?)
    }

    /// Row-locked read used inside the accept transaction.
    pub fn lock_bid(conn: &mut PgConnection, bid_id: Uuid) -> QueryResult<Option<BidEntity>> {
        nft_bids::table
            .find(bid_id)
            .for_update()
            .first::<BidEntity>(conn)
            .optional()
    }

    pub fn set_status(
        conn: &mut PgConnection,
        bid_id: Uuid,
        status: BidStatus,
    ) -> QueryResult<usize> {
        diesel::update(nft_bids::table.find(bid_id))
            .set(nft_bids::status.eq(status.as_str()))
            .execute(conn)
    }

    /// Declines every still-active bid on the NFT except `keep`. Accepting one
    /// bid implicitly declines the rest.
    pub fn decline_other_active(
        conn: &mut PgConnection,
        nft: Uuid,
        keep: Uuid,
    ) -> QueryResult<usize> {
        diesel::update(
            nft_bids::table
                .filter(nft_bids::nft_id.eq(nft))
                .filter(nft_bids::status.eq(BidStatus::Active.as_str()))
                .filter(nft_bids::id.ne(keep)),
        )
        .set(nft_bids::status.eq(BidStatus::Declined.as_str()))
        .execute(conn)
    }

    pub fn decline_all_active(conn: &mut PgConnection, nft: Uuid) -> QueryResult<usize> {
        diesel::update(
            nft_bids::table
                .filter(nft_bids::nft_id.eq(nft))
                .filter(nft_bids::status.eq(BidStatus::Active.as_str())),
        )
        .set(nft_bids::status.eq(BidStatus::Declined.as_str()))
        .execute(conn)
    }
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
pub struct BidEntity {
    pub id: Uuid,
    pub nft_id: Uuid,
    pub bidder_id: Uuid,
    pub bidder_address: String,
    pub bid_amount: Decimal,
    pub verified: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = nft_bids)]
pub struct NewBid {
    pub nft_id: Uuid,
    pub bidder_id: Uuid,
    pub bidder_address: String,
    pub bid_amount: Decimal,
    pub verified: bool,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidStatus {
    Active,
    Accepted,
    Declined,
}

impl BidStatus {
    pub fn as_str(&self) -> &str {
        match self {
            BidStatus::Active => "active",
            BidStatus::Accepted => "accepted",
            BidStatus::Declined => "declined",
        }
    }
}

impl FromStr for BidStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(BidStatus::Active),
            "accepted" => Ok(BidStatus::Accepted),
            "declined" => Ok(BidStatus::Declined),
            _ => Err(format!("Invalid bid status: {}", s)),
        }
    }
}

impl AsRef<str> for BidStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
