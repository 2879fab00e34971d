use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::error::ApiError;
use crate::ledger_service::release_due_freezes;
use crate::rate_cache::RateCache;
use crate::transaction_repository::{NewTransaction, TransactionRepository, TransactionType};
use crate::user_repository::{Currency, UserRepository};

/// Reverse-rate fallback used when the spot rate is unusable.
const FALLBACK_REVERSE_RATE: Decimal = dec!(0.000482);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeDirection {
    EthToUsdt,
    UsdtToEth,
}

impl ExchangeDirection {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeDirection::EthToUsdt => "eth_to_usdt",
            ExchangeDirection::UsdtToEth => "usdt_to_eth",
        }
    }

    pub fn source_currency(&self) -> Currency {
        match self {
            ExchangeDirection::EthToUsdt => Currency::Eth,
            ExchangeDirection::UsdtToEth => Currency::Usdt,
        }
    }

    pub fn target_currency(&self) -> Currency {
        match self {
            ExchangeDirection::EthToUsdt => Currency::Usdt,
            ExchangeDirection::UsdtToEth => Currency::Eth,
        }
    }
}

impl FromStr for ExchangeDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth_to_usdt" => Ok(ExchangeDirection::EthToUsdt),
            "usdt_to_eth" => Ok(ExchangeDirection::UsdtToEth),
            _ => Err(format!("Invalid exchange direction: {}", s)),
        }
    }
}

pub fn calculate_reverse_rate(rate: Decimal) -> Decimal {
    if rate > Decimal::ZERO {
        Decimal::ONE / rate
    } else {
        FALLBACK_REVERSE_RATE
    }
}

pub fn convert(
    amount: Decimal,
    rate: Decimal,
    reverse_rate: Decimal,
    direction: ExchangeDirection,
) -> Decimal {
    match direction {
        ExchangeDirection::EthToUsdt => amount * rate,
        ExchangeDirection::UsdtToEth => amount * reverse_rate,
    }
}

/// Estimated conversion output for a user-typed amount. `None` for empty or
/// non-numeric input.
pub fn calculate_estimated_result(
    amount: &str,
    rate: Decimal,
    reverse_rate: Decimal,
    direction: ExchangeDirection,
) -> Option<Decimal> {
    let amount = Decimal::from_str(amount.trim()).ok()?;
    Some(convert(amount, rate, reverse_rate, direction))
}

#[derive(Debug, Serialize)]
pub struct RateView {
    pub eth_usd: Decimal,
    pub usdt_eth: Decimal,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ExchangeReceipt {
    pub transaction_id: Uuid,
    pub direction: String,
    pub amount: Decimal,
    pub rate: Decimal,
    pub result: Decimal,
}

pub struct ExchangeService {
    db_client: Arc<PostgreSqlClient>,
    rate_cache: Arc<RateCache>,
}

impl ExchangeService {
    pub fn new(db_client: Arc<PostgreSqlClient>, rate_cache: Arc<RateCache>) -> Self {
        ExchangeService {
            db_client,
            rate_cache,
        }
    }

    pub async fn current_rates(&self) -> RateView {
        let eth_usd = self.rate_cache.get_eth_usd().await;
        RateView {
            eth_usd,
            usdt_eth: calculate_reverse_rate(eth_usd),
            fetched_at: Utc::now(),
        }
    }

    /// Converts between the two balance pools at the current spot rate, in a
    /// single transaction: debit source, credit target, append the ledger row.
    pub async fn exchange(
        &self,
        user: Uuid,
        amount: Decimal,
        direction: ExchangeDirection,
    ) -> Result<ExchangeReceipt, ApiError> {
        if amount <= Decimal::ZERO {
            return Err(ApiError::validation("Amount must be greater than zero"));
        }
        let eth_usd = self.rate_cache.get_eth_usd().await;
        let reverse = calculate_reverse_rate(eth_usd);
        let rate = match direction {
            ExchangeDirection::EthToUsdt => eth_usd,
            ExchangeDirection::UsdtToEth => reverse,
        };
        let result = convert(amount, eth_usd, reverse, direction);

        let source = direction.source_currency();
        let target = direction.target_currency();
        let mut conn = self.db_client.get_db_connection()?;
        let receipt = conn.transaction::<_, ApiError, _>(|conn| {
            release_due_freezes(conn, user, Utc::now())?;
            let profile = UserRepository::lock_profile(conn, user)?;
            if profile.available(source) < amount {
                return Err(ApiError::validation("Insufficient balance"));
            }
            UserRepository::debit_balance(conn, user, source, amount)?;
            UserRepository::credit_balance(conn, user, target, result)?;
            let entity = TransactionRepository::insert_with_conn(
                conn,
                NewTransaction::completed(user, TransactionType::Exchange, amount, source.as_str()),
            )?;
            Ok(ExchangeReceipt {
                transaction_id: entity.id,
                direction: direction.as_str().to_string(),
                amount,
                rate,
                result,
            })
        })?;
        info!(
            "Exchanged {} {} for user {}",
            amount,
            source.as_str(),
            user
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_invert_positive_rates() {
        assert_eq!(calculate_reverse_rate(dec!(2)), dec!(0.5));
        assert_eq!(calculate_reverse_rate(dec!(4)), dec!(0.25));
    }

    #[test]
    fn should_fall_back_on_zero_rate() {
        assert_eq!(calculate_reverse_rate(Decimal::ZERO), dec!(0.000482));
    }

    #[test]
    fn should_estimate_eth_to_usdt_with_spot_rate() {
        let result =
            calculate_estimated_result("2", dec!(2074), dec!(0.000482), ExchangeDirection::EthToUsdt);
        assert_eq!(result, Some(dec!(4148)));
    }

    #[test]
    fn should_estimate_usdt_to_eth_with_reverse_rate() {
        let result =
            calculate_estimated_result("1000", dec!(2074), dec!(0.0005), ExchangeDirection::UsdtToEth);
        assert_eq!(result, Some(dec!(0.5)));
    }

    #[test]
    fn should_reject_non_numeric_amounts() {
        for junk in ["", "  ", "abc", "1.2.3"] {
            let result = calculate_estimated_result(
                junk,
                dec!(2074),
                dec!(0.000482),
                ExchangeDirection::EthToUsdt,
            );
            assert_eq!(result, None);
        }
    }

    #[test]
    fn should_parse_directions() {
        assert_eq!(
            ExchangeDirection::from_str("eth_to_usdt"),
            Ok(ExchangeDirection::EthToUsdt)
        );
        assert_eq!(
            ExchangeDirection::from_str("usdt_to_eth"),
            Ok(ExchangeDirection::UsdtToEth)
        );
        assert!(ExchangeDirection::from_str("eth_to_btc").is_err());
    }
}
