use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use diesel::prelude::*;
use log::info;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::error::ApiError;
use crate::transaction_repository::{
    NewTransaction, TransactionEntity, TransactionRepository, TransactionStatus, TransactionType,
};
use crate::user_repository::{Currency, UserRepository};

pub const DEPOSIT_WINDOW_MINUTES: i64 = 30;
pub const MIN_HASH_LEN: usize = 10;
pub const PAGE_LIMIT: i64 = 20;

pub struct LedgerService {
    db_client: Arc<PostgreSqlClient>,
    transaction_repository: Arc<TransactionRepository>,
}

impl LedgerService {
    pub fn new(
        db_client: Arc<PostgreSqlClient>,
        transaction_repository: Arc<TransactionRepository>,
    ) -> Self {
        LedgerService {
            db_client,
            transaction_repository,
        }
    }

    /// Opens a deposit with a confirmation window keyed to the transaction id.
    pub fn create_deposit(
        &self,
        user: Uuid,
        amount: Decimal,
        currency: Currency,
    ) -> Result<DepositView, ApiError> {
        if amount <= Decimal::ZERO {
            return Err(ApiError::validation("Amount must be greater than zero"));
        }
        let expires_at = Utc::now() + Duration::minutes(DEPOSIT_WINDOW_MINUTES);
        let entity = self.transaction_repository.insert(NewTransaction {
            user_id: user,
            tx_type: TransactionType::Deposit.as_str().to_string(),
            amount,
            status: TransactionStatus::Pending.as_str().to_string(),
            currency_type: Some(currency.as_str().to_string()),
            is_frozen: false,
            is_frozen_exchange: false,
            frozen_until: None,
            expires_at: Some(expires_at),
        })?;
        info!("Opened deposit {} for user {}", entity.id, user);
        Ok(DepositView::from_entity(entity, Utc::now()))
    }

    /// Records the submitted transaction hash. The deposit stays pending for
    /// operator review; nothing here pretends to verify the hash on-chain.
    pub fn confirm_deposit(
        &self,
        user: Uuid,
        deposit_id: Uuid,
        tx_hash: &str,
    ) -> Result<DepositView, ApiError> {
        let hash = tx_hash.trim();
        if hash.chars().count() < MIN_HASH_LEN {
            return Err(ApiError::validation("Invalid hash"));
        }
        let now = Utc::now();
        let mut conn = self.db_client.get_db_connection()?;
        // Autocommit, so the failed mark survives the rejection below.
        TransactionRepository::expire_stale_deposits(&mut conn, user, now)?;
        let entity = conn.transaction::<_, ApiError, _>(|conn| {
            let entity = TransactionRepository::lock_transaction(conn, deposit_id, user)?
                .ok_or_else(|| ApiError::not_found("Deposit not found"))?;
            check_confirmable(&entity, now)?;
            TransactionRepository::record_hash(conn, entity.id, hash)?;
            Ok(TransactionEntity {
                tx_hash: Some(hash.to_string()),
                ..entity
            })
        })?;
        info!("Recorded hash for deposit {}", entity.id);
        Ok(DepositView::from_entity(entity, now))
    }

    pub fn get_deposit(&self, user: Uuid, deposit_id: Uuid) -> Result<DepositView, ApiError> {
        let now = Utc::now();
        let mut conn = self.db_client.get_db_connection()?;
        TransactionRepository::expire_stale_deposits(&mut conn, user, now)?;
        drop(conn);

        let entity = self
            .transaction_repository
            .get_for_user(deposit_id, user)?
            .ok_or_else(|| ApiError::not_found("Deposit not found"))?;
        if TransactionType::from_str(&entity.tx_type) != Ok(TransactionType::Deposit) {
            return Err(ApiError::not_found("Deposit not found"));
        }
        Ok(DepositView::from_entity(entity, now))
    }

    pub fn withdraw(
        &self,
        user: Uuid,
        amount: Decimal,
        currency: Currency,
    ) -> Result<TransactionEntity, ApiError> {
        if amount <= Decimal::ZERO {
            return Err(ApiError::validation("Amount must be greater than zero"));
        }
        let mut conn = self.db_client.get_db_connection()?;
        conn.transaction::<_, ApiError, _>(|conn| {
            release_due_freezes(conn, user, Utc::now())?;
            let profile = UserRepository::lock_profile(conn, user)?;
            if profile.available(currency) < amount {
                return Err(ApiError::validation("Insufficient balance"));
            }
            UserRepository::debit_balance(conn, user, currency, amount)?;
            let entity = TransactionRepository::insert_with_conn(
                conn,
                NewTransaction::completed(
                    user,
                    TransactionType::Withdraw,
                    amount,
                    currency.as_str(),
                ),
            )?;
            Ok(entity)
        })
    }

    /// Cursor-paginated ledger page, newest first. Sweeps expired deposit
    /// windows before reading so stale pending rows never surface.
    pub fn list(
        &self,
        user: Uuid,
        before: Option<DateTime<Utc>>,
        limit: Option<i64>,
        type_filter: Option<TransactionType>,
    ) -> Result<LedgerPage, ApiError> {
        let limit = limit.unwrap_or(PAGE_LIMIT).clamp(1, PAGE_LIMIT);
        let mut conn = self.db_client.get_db_connection()?;
        TransactionRepository::expire_stale_deposits(&mut conn, user, Utc::now())?;
        drop(conn);

        let rows = self
            .transaction_repository
            .list_page(user, before, limit, type_filter)?;
        let has_more = rows.len() as i64 == limit;
        let now = Utc::now();
        Ok(LedgerPage {
            next_cursor: rows.last().map(|row| row.created_at),
            rows: rows
                .into_iter()
                .map(|row| LedgerRow::from_entity(row, now))
                .collect(),
            has_more,
        })
    }
}

/// Gate for recording a confirmation hash. Expiry outranks the status check
/// so a swept window reads as expired rather than merely not pending.
fn check_confirmable(entity: &TransactionEntity, now: DateTime<Utc>) -> Result<(), ApiError> {
    if TransactionType::from_str(&entity.tx_type) != Ok(TransactionType::Deposit) {
        return Err(ApiError::not_found("Deposit not found"));
    }
    if entity.expires_at.map_or(false, |expiry| expiry < now) {
        return Err(ApiError::validation("Deposit window expired"));
    }
    if TransactionStatus::from_str(&entity.status) != Ok(TransactionStatus::Pending) {
        return Err(ApiError::Conflict("Deposit is not pending".to_string()));
    }
    Ok(())
}

/// Exclusive ledger filter: `all` (or nothing) clears it, and only the
/// deposit and exchange tabs re-fetch by type.
pub fn parse_type_filter(raw: Option<&str>) -> Result<Option<TransactionType>, ApiError> {
    match raw {
        None | Some("all") => Ok(None),
        Some("deposit") => Ok(Some(TransactionType::Deposit)),
        Some("exchange") => Ok(Some(TransactionType::Exchange)),
        Some(other) => Err(ApiError::validation(format!(
            "Invalid transaction filter: {}",
            other
        ))),
    }
}

/// Moves every elapsed frozen hold back into the spendable pool. Called at the
/// top of profile reads and balance-spending transactions.
pub fn release_due_freezes(
    conn: &mut PgConnection,
    user: Uuid,
    now: DateTime<Utc>,
) -> Result<usize, ApiError> {
    let due = TransactionRepository::list_releasable(conn, user, now)?;
    let count = due.len();
    for row in due {
        let currency = row
            .currency_type
            .as_deref()
            .and_then(|c| Currency::from_str(c).ok())
            .unwrap_or(Currency::Eth);
        UserRepository::thaw_balance(conn, user, currency, row.amount)?;
        TransactionRepository::clear_frozen(conn, row.id)?;
    }
    if count > 0 {
        info!("Released {} frozen holds for user {}", count, user);
    }
    Ok(count)
}

#[derive(Debug, Serialize)]
pub struct LedgerPage {
    pub rows: Vec<LedgerRow>,
    pub next_cursor: Option<DateTime<Utc>>,
    pub has_more: bool,
}

#[derive(Debug, Serialize)]
pub struct LedgerRow {
    pub id: Uuid,
    pub tx_type: String,
    pub date: String,
    pub amount: Decimal,
    pub amount_display: String,
    pub status: String,
    pub status_label: String,
    pub currency_type: Option<String>,
    pub is_frozen: bool,
    pub frozen_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl LedgerRow {
    pub fn from_entity(entity: TransactionEntity, now: DateTime<Utc>) -> Self {
        let frozen_badge = entity.is_frozen
            && entity.frozen_until.map_or(false, |until| until > now);
        LedgerRow {
            id: entity.id,
            date: format_day_month(entity.created_at),
            amount_display: signed_amount(&entity.tx_type, entity.amount),
            status_label: status_label(&entity.status).to_string(),
            tx_type: entity.tx_type,
            amount: entity.amount,
            status: entity.status,
            currency_type: entity.currency_type,
            is_frozen: frozen_badge,
            frozen_until: entity.frozen_until,
            created_at: entity.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DepositView {
    pub id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub currency_type: Option<String>,
    pub tx_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub seconds_remaining: i64,
    pub created_at: DateTime<Utc>,
}

impl DepositView {
    pub fn from_entity(entity: TransactionEntity, now: DateTime<Utc>) -> Self {
        let seconds_remaining = entity
            .expires_at
            .map_or(0, |expiry| (expiry - now).num_seconds().max(0));
        DepositView {
            id: entity.id,
            amount: entity.amount,
            status: entity.status,
            currency_type: entity.currency_type,
            tx_hash: entity.tx_hash,
            expires_at: entity.expires_at,
            seconds_remaining,
            created_at: entity.created_at,
        }
    }
}

pub fn format_day_month(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%d/%m").to_string()
}

pub fn signed_amount(tx_type: &str, amount: Decimal) -> String {
    let amount = amount.normalize();
    match TransactionType::from_str(tx_type) {
        Ok(TransactionType::Deposit) | Ok(TransactionType::Sale) => format!("+{}", amount),
        Ok(TransactionType::Withdraw) | Ok(TransactionType::Purchase) => format!("-{}", amount),
        _ => amount.to_string(),
    }
}

fn status_label(status: &str) -> &'static str {
    match TransactionStatus::from_str(status) {
        Ok(TransactionStatus::Pending) => "Pending",
        Ok(TransactionStatus::Completed) => "Done",
        Ok(TransactionStatus::Failed) => "Failed",
        Err(_) => "Unknown",
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    fn entity(tx_type: &str, amount: Decimal) -> TransactionEntity {
        TransactionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tx_type: tx_type.to_string(),
            amount,
            status: "completed".to_string(),
            currency_type: Some("eth".to_string()),
            is_frozen: false,
            is_frozen_exchange: false,
            frozen_until: None,
            tx_hash: None,
            expires_at: None,
            created_at: "2024-03-15T10:00:00Z".parse().unwrap(),
        }
    }

    #[test]
    fn should_format_date_as_day_slash_month() {
        let timestamp: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        assert_eq!(format_day_month(timestamp), "15/03");
    }

    #[test]
    fn should_sign_amounts_by_transaction_type() {
        assert_eq!(signed_amount("deposit", dec!(0.50)), "+0.5");
        assert_eq!(signed_amount("sale", dec!(1.25)), "+1.25");
        assert_eq!(signed_amount("withdraw", dec!(2)), "-2");
        assert_eq!(signed_amount("purchase", dec!(0.1)), "-0.1");
        assert_eq!(signed_amount("exchange", dec!(3.0)), "3");
    }

    #[test]
    fn should_build_ledger_row_view() {
        let now: DateTime<Utc> = "2024-03-16T00:00:00Z".parse().unwrap();
        let row = LedgerRow::from_entity(entity("deposit", dec!(1.5)), now);
        assert_eq!(row.date, "15/03");
        assert_eq!(row.amount_display, "+1.5");
        assert_eq!(row.status_label, "Done");
        assert!(!row.is_frozen);
    }

    #[test]
    fn should_only_badge_frozen_rows_with_future_release() {
        let now: DateTime<Utc> = "2024-03-16T00:00:00Z".parse().unwrap();
        let mut frozen = entity("sale", dec!(1));
        frozen.is_frozen = true;
        frozen.frozen_until = Some("2024-03-30T00:00:00Z".parse().unwrap());
        assert!(LedgerRow::from_entity(frozen, now).is_frozen);

        let mut elapsed = entity("sale", dec!(1));
        elapsed.is_frozen = true;
        elapsed.frozen_until = Some("2024-03-10T00:00:00Z".parse().unwrap());
        assert!(!LedgerRow::from_entity(elapsed, now).is_frozen);
    }

    #[test]
    fn should_reject_hash_confirmation_after_window_expiry() {
        let now: DateTime<Utc> = "2024-03-15T11:00:00Z".parse().unwrap();
        let mut deposit = entity("deposit", dec!(1));
        deposit.status = "pending".to_string();
        deposit.expires_at = Some("2024-03-15T10:30:00Z".parse().unwrap());
        let err = check_confirmable(&deposit, now).unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg == "Deposit window expired"));

        // Still reported as expired after the sweep has already failed it.
        let mut swept = entity("deposit", dec!(1));
        swept.status = "failed".to_string();
        swept.expires_at = Some("2024-03-15T10:30:00Z".parse().unwrap());
        let err = check_confirmable(&swept, now).unwrap_err();
        assert!(matches!(err, ApiError::Validation(msg) if msg == "Deposit window expired"));
    }

    #[test]
    fn should_only_confirm_pending_deposits_inside_the_window() {
        let now: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        let mut open = entity("deposit", dec!(1));
        open.status = "pending".to_string();
        open.expires_at = Some("2024-03-15T10:30:00Z".parse().unwrap());
        assert!(check_confirmable(&open, now).is_ok());

        let mut done = entity("deposit", dec!(1));
        done.expires_at = Some("2024-03-15T10:30:00Z".parse().unwrap());
        let err = check_confirmable(&done, now).unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err = check_confirmable(&entity("withdraw", dec!(1)), now).unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[test]
    fn should_parse_the_exclusive_ledger_filter() {
        assert_eq!(parse_type_filter(None).unwrap(), None);
        assert_eq!(parse_type_filter(Some("all")).unwrap(), None);
        assert_eq!(
            parse_type_filter(Some("deposit")).unwrap(),
            Some(TransactionType::Deposit)
        );
        assert_eq!(
            parse_type_filter(Some("exchange")).unwrap(),
            Some(TransactionType::Exchange)
        );
        assert!(parse_type_filter(Some("withdraw")).is_err());
        assert!(parse_type_filter(Some("sale")).is_err());
    }

    #[test]
    fn should_report_remaining_deposit_window() {
        let now: DateTime<Utc> = "2024-03-15T10:00:00Z".parse().unwrap();
        let mut deposit = entity("deposit", dec!(1));
        deposit.expires_at = Some("2024-03-15T10:30:00Z".parse().unwrap());
        assert_eq!(DepositView::from_entity(deposit, now).seconds_remaining, 1800);

        let mut expired = entity("deposit", dec!(1));
        expired.expires_at = Some("2024-03-15T09:00:00Z".parse().unwrap());
        assert_eq!(DepositView::from_entity(expired, now).seconds_remaining, 0);
    }
}
