use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::bid_repository::{BidRepository, BidStatus, NewBid};
use crate::db::PostgreSqlClient;
use crate::error::ApiError;
use crate::ledger_service::release_due_freezes;
use crate::nft_repository::{MarketplaceStatus, NftEntity, NftRepository};
use crate::transaction_repository::{
    NewTransaction, TransactionRepository, TransactionStatus, TransactionType,
};
use crate::user_repository::{Currency, UserRepository};

pub const PLATFORM_FEE_RATE: Decimal = dec!(0.025);
pub const FREEZE_HOLD_DAYS: i64 = 15;

/// Sale proceeds settlement: platform fee off the top, the rest held frozen
/// for the standard 15-day period.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FeeBreakdown {
    pub amount: Decimal,
    pub platform_fee: Decimal,
    pub net_proceeds: Decimal,
    pub frozen_until: DateTime<Utc>,
}

pub fn fee_breakdown(amount: Decimal, now: DateTime<Utc>) -> FeeBreakdown {
    let platform_fee = (amount * PLATFORM_FEE_RATE).normalize();
    FeeBreakdown {
        amount,
        platform_fee,
        net_proceeds: (amount - platform_fee).normalize(),
        frozen_until: now + Duration::days(FREEZE_HOLD_DAYS),
    }
}

#[derive(Debug, Serialize)]
pub struct PurchaseReceipt {
    pub nft: NftEntity,
    pub breakdown: FeeBreakdown,
}

pub struct MarketService {
    db_client: Arc<PostgreSqlClient>,
}

impl MarketService {
    pub fn new(db_client: Arc<PostgreSqlClient>) -> Self {
        MarketService { db_client }
    }

    /// Buys a listed NFT outright. One transaction covers the balance moves,
    /// both ledger rows, the ownership change, and declining open bids.
    pub fn purchase_nft(&self, buyer: Uuid, nft_id: Uuid) -> Result<PurchaseReceipt, ApiError> {
        let mut conn = self.db_client.get_db_connection()?;
        let now = Utc::now();
        let receipt = conn.transaction::<_, ApiError, _>(|conn| {
            let nft = NftRepository::lock_nft(conn, nft_id)?
                .ok_or_else(|| ApiError::not_found("NFT not found"))?;
            if !nft.for_sale {
                return Err(ApiError::Conflict("NFT is not for sale".to_string()));
            }
            if nft.owner_id == Some(buyer) {
                return Err(ApiError::Conflict(
                    "Cannot purchase your own NFT".to_string(),
                ));
            }

            release_due_freezes(conn, buyer, now)?;
            let profile = UserRepository::lock_profile(conn, buyer)?;
            if profile.available(Currency::Eth) < nft.price {
                return Err(ApiError::validation("Insufficient balance"));
            }

            let breakdown = fee_breakdown(nft.price, now);
            UserRepository::debit_balance(conn, buyer, Currency::Eth, nft.price)?;
            TransactionRepository::insert_with_conn(
                conn,
                NewTransaction::completed(
                    buyer,
                    TransactionType::Purchase,
                    nft.price,
                    Currency::Eth.as_str(),
                ),
            )?;
            if let Some(seller) = nft.owner_id {
                Self::settle_sale_proceeds(conn, seller, &breakdown)?;
            }

            NftRepository::mark_sold(conn, nft_id, buyer)?;
            BidRepository::decline_all_active(conn, nft_id)?;

            Ok(PurchaseReceipt {
                nft: NftEntity {
                    owner_id: Some(buyer),
                    for_sale: false,
                    marketplace_status: MarketplaceStatus::Sold.as_str().to_string(),
                    ..nft
                },
                breakdown,
            })
        })?;
        info!("NFT {} purchased by {}", nft_id, buyer);
        Ok(receipt)
    }

    pub fn place_bid(
        &self,
        bidder: Uuid,
        nft_id: Uuid,
        bid_amount: Decimal,
        bidder_address: String,
    ) -> Result<crate::bid_repository::BidEntity, ApiError> {
        if bid_amount <= Decimal::ZERO {
            return Err(ApiError::validation("Bid must be greater than zero"));
        }
        let mut conn = self.db_client.get_db_connection()?;
        let bid = conn.transaction::<_, ApiError, _>(|conn| {
            let nft = NftRepository::lock_nft(conn, nft_id)?
                .ok_or_else(|| ApiError::not_found("NFT not found"))?;
            if !nft.for_sale {
                return Err(ApiError::Conflict("NFT is not for sale".to_string()));
            }
            if nft.owner_id == Some(bidder) {
                return Err(ApiError::Conflict("Cannot bid on your own NFT".to_string()));
            }
            let bid = BidRepository::insert_with_conn(
                conn,
                NewBid {
                    nft_id,
                    bidder_id: bidder,
                    bidder_address,
                    bid_amount,
                    verified: false,
                    status: BidStatus::Active.as_str().to_string(),
                },
            )?;
            NftRepository::set_marketplace_status(conn, nft_id, MarketplaceStatus::AvailableBids)?;
            Ok(bid)
        })?;
        info!("Bid placed on NFT {} by {}", nft_id, bidder);
        Ok(bid)
    }

    /// Accepts one bid and declines the rest, transfers ownership, debits the
    /// bidder, and freezes the seller's net proceeds. At most one bid per NFT
    /// can ever be accepted.
    pub fn accept_bid(&self, seller: Uuid, bid_id: Uuid) -> Result<FeeBreakdown, ApiError> {
        let mut conn = self.db_client.get_db_connection()?;
        let now = Utc::now();
        let breakdown = conn.transaction::<_, ApiError, _>(|conn| {
            let bid = BidRepository::lock_bid(conn, bid_id)?
                .ok_or_else(|| ApiError::not_found("Bid not found"))?;
            if BidStatus::from_str(&bid.status) != Ok(BidStatus::Active) {
                return Err(ApiError::Conflict("Bid is not active".to_string()));
            }
            let nft = NftRepository::lock_nft(conn, bid.nft_id)?
                .ok_or_else(|| ApiError::not_found("NFT not found"))?;
            if nft.owner_id != Some(seller) {
                return Err(ApiError::Unauthorized(
                    "Only the owner can accept bids".to_string(),
                ));
            }

            release_due_freezes(conn, bid.bidder_id, now)?;
            let bidder_profile = UserRepository::lock_profile(conn, bid.bidder_id)?;
            if bidder_profile.available(Currency::Eth) < bid.bid_amount {
                return Err(ApiError::Conflict(
                    "Bidder has insufficient balance".to_string(),
                ));
            }

            let breakdown = fee_breakdown(bid.bid_amount, now);
            UserRepository::debit_balance(conn, bid.bidder_id, Currency::Eth, bid.bid_amount)?;
            TransactionRepository::insert_with_conn(
                conn,
                NewTransaction::completed(
                    bid.bidder_id,
                    TransactionType::Purchase,
                    bid.bid_amount,
                    Currency::Eth.as_str(),
                ),
            )?;
            Self::settle_sale_proceeds(conn, seller, &breakdown)?;

            BidRepository::set_status(conn, bid_id, BidStatus::Accepted)?;
            BidRepository::decline_other_active(conn, bid.nft_id, bid_id)?;
            NftRepository::mark_sold(conn, bid.nft_id, bid.bidder_id)?;

            Ok(breakdown)
        })?;
        info!("Bid {} accepted by seller {}", bid_id, seller);
        Ok(breakdown)
    }

    /// Credits the seller's frozen pool and appends the matching frozen sale
    /// row. Funds thaw after the 15-day hold via the release pass.
    fn settle_sale_proceeds(
        conn: &mut PgConnection,
        seller: Uuid,
        breakdown: &FeeBreakdown,
    ) -> Result<(), ApiError> {
        UserRepository::credit_frozen_balance(
            conn,
            seller,
            Currency::Eth,
            breakdown.net_proceeds,
        )?;
        TransactionRepository::insert_with_conn(
            conn,
            NewTransaction {
                user_id: seller,
                tx_type: TransactionType::Sale.as_str().to_string(),
                amount: breakdown.net_proceeds,
                status: TransactionStatus::Completed.as_str().to_string(),
                currency_type: Some(Currency::Eth.as_str().to_string()),
                is_frozen: true,
                is_frozen_exchange: false,
                frozen_until: Some(breakdown.frozen_until),
                expires_at: None,
            },
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_take_platform_fee_off_the_top() {
        let now: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        let breakdown = fee_breakdown(dec!(2), now);
        assert_eq!(breakdown.platform_fee, dec!(0.05));
        assert_eq!(breakdown.net_proceeds, dec!(1.95));
        assert_eq!(breakdown.amount, dec!(2));
    }

    #[test]
    fn should_hold_proceeds_for_fifteen_days() {
        let now: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        let breakdown = fee_breakdown(dec!(1), now);
        let expected: DateTime<Utc> = "2024-03-30T10:00:00Z".parse().unwrap();
        assert_eq!(breakdown.frozen_until, expected);
    }

    #[test]
    fn should_conserve_value_across_fee_split() {
        let now = Utc::now();
        for amount in [dec!(0.001), dec!(1), dec!(123.456), dec!(99999)] {
            let breakdown = fee_breakdown(amount, now);
            assert_eq!(breakdown.platform_fee + breakdown.net_proceeds, amount);
        }
    }
}
