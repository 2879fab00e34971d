use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::schema::nfts;

pub struct NftRepository {
    db_client: Arc<PostgreSqlClient>,
}

impl NftRepository {
    pub fn new(db_client: Arc<PostgreSqlClient>) -> Self {
        NftRepository { db_client }
    }

    pub fn insert_nft(&self, new_nft: NewNft) -> Result<NftEntity, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(diesel::insert_into(nfts::table)
            .values(new_nft)
            .get_result(&mut conn)?)
    }

    pub fn get_nft(&self, nft_id: Uuid) -> Result<Option<NftEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(nfts::table
            .find(nft_id)
            .first::<NftEntity>(&mut conn)
            .optional()?)
    }

    pub fn list_for_sale(&self) -> Result<Vec<NftEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(nfts::table
            .filter(nfts::for_sale.eq(true))
            .order(nfts::created_at.desc())
            .load::<NftEntity>(&mut conn)?)
    }

    pub fn list_owned_by(
        &self,
        owner: Uuid,
    ) -> Result<Vec<NftEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(nfts::table
            .filter(nfts::owner_id.eq(owner))
            .order(nfts::created_at.desc())
            .load::<NftEntity>(&mut conn)?)
    }

    /// Row-locked read used inside purchase/accept transactions.
    pub fn lock_nft(conn: &mut PgConnection, nft_id: Uuid) -> QueryResult<Option<NftEntity>> {
        nfts::table
            .find(nft_id)
            .for_update()
            .first::<NftEntity>(conn)
            .optional()
    }

    pub fn mark_sold(conn: &mut PgConnection, nft_id: Uuid, new_owner: Uuid) -> QueryResult<usize> {
        diesel::update(nfts::table.find(nft_id))
            .set((
                nfts::owner_id.eq(new_owner),
                nfts::for_sale.eq(false),
                nfts::marketplace_status.eq(MarketplaceStatus::Sold.as_str()),
            ))
            .execute(conn)
    }

    pub fn set_marketplace_status(
        conn: &mut PgConnection,
        nft_id: Uuid,
        status: MarketplaceStatus,
    ) -> QueryResult<usize> {
        diesel::update(nfts::table.find(nft_id))
            .set(nfts::marketplace_status.eq(status.as_str()))
            .execute(conn)
    }
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
pub struct NftEntity {
    pub id: Uuid,
    pub name: String,
    pub image: String,
    pub price: Decimal,
    pub creator: String,
    pub description: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub owner_id: Option<Uuid>,
    pub for_sale: bool,
    pub marketplace: Option<String>,
    pub marketplace_status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = nfts)]
pub struct NewNft {
    pub name: String,
    pub image: String,
    pub price: Decimal,
    pub creator: String,
    pub description: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub owner_id: Option<Uuid>,
    pub for_sale: bool,
    pub marketplace: Option<String>,
    pub marketplace_status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketplaceStatus {
    WaitingForBids,
    AvailableBids,
    Sold,
    Unlisted,
}

impl MarketplaceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            MarketplaceStatus::WaitingForBids => "waiting_for_bids",
            MarketplaceStatus::AvailableBids => "available_bids",
            MarketplaceStatus::Sold => "sold",
            MarketplaceStatus::Unlisted => "unlisted",
        }
    }
}

impl FromStr for MarketplaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting_for_bids" => Ok(MarketplaceStatus::WaitingForBids),
            "available_bids" => Ok(MarketplaceStatus::AvailableBids),
            "sold" => Ok(MarketplaceStatus::Sold),
            "unlisted" => Ok(MarketplaceStatus::Unlisted),
            _ => Err(format!("Invalid marketplace status: {}", s)),
        }
    }
}

impl AsRef<str> for MarketplaceStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
