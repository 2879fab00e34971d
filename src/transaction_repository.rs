use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::schema::transactions;

pub struct TransactionRepository {
    db_client: Arc<PostgreSqlClient>,
}

impl TransactionRepository {
    pub fn new(db_client: Arc<PostgreSqlClient>) -> Self {
        TransactionRepository { db_client }
    }

    pub fn insert(
        &self,
        new_tx: NewTransaction,
    ) -> Result<TransactionEntity, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(Self::insert_with_conn(&mut conn, new_tx)?)
    }

    pub fn insert_with_conn(
        conn: &mut PgConnection,
        new_tx: NewTransaction,
    ) -> QueryResult<TransactionEntity> {
        diesel::insert_into(transactions::table)
            .values(new_tx)
            .get_result(conn)
    }

    /// Cursor page: rows strictly older than `before`, newest first.
    pub fn list_page(
        &self,
        user: Uuid,
        before: Option<DateTime<Utc>>,
        limit: i64,
        type_filter: Option<TransactionType>,
    ) -> Result<Vec<TransactionEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        let mut query = transactions::table
            .filter(transactions::user_id.eq(user))
            .order(transactions::created_at.desc())
            .limit(limit)
            .into_boxed();
        if let Some(cursor) = before {
            query = query.filter(transactions::created_at.lt(cursor));
        }
        if let Some(tx_type) = type_filter {
            query = query.filter(transactions::tx_type.eq(tx_type.as_str().to_string()));
        }
        Ok(query.load::<TransactionEntity>(&mut conn)?)
    }

    /// In-memory mirror of the `list_page` cursor predicate: a row belongs to
    /// the page only when it is strictly older than the cursor.
    pub fn older_than_cursor(row: &TransactionEntity, cursor: Option<DateTime<Utc>>) -> bool {
        cursor.map_or(true, |cursor| row.created_at < cursor)
    }

    pub fn get_for_user(
        &self,
        id: Uuid,
        user: Uuid,
    ) -> Result<Option<TransactionEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(transactions::table
            .find(id)
            .filter(transactions::user_id.eq(user))
            .first::<TransactionEntity>(&mut conn)
            .optional()?)
    }

    pub fn lock_transaction(
        conn: &mut PgConnection,
        id: Uuid,
        user: Uuid,
    ) -> QueryResult<Option<TransactionEntity>> {
        transactions::table
            .find(id)
            .filter(transactions::user_id.eq(user))
            .for_update()
            .first::<TransactionEntity>(conn)
            .optional()
    }

    pub fn set_status(
        conn: &mut PgConnection,
        id: Uuid,
        status: TransactionStatus,
    ) -> QueryResult<usize> {
        diesel::update(transactions::table.find(id))
            .set(transactions::status.eq(status.as_str()))
            .execute(conn)
    }

    pub fn record_hash(conn: &mut PgConnection, id: Uuid, hash: &str) -> QueryResult<usize> {
        diesel::update(transactions::table.find(id))
            .set(transactions::tx_hash.eq(hash))
            .execute(conn)
    }

    /// Pending deposits whose confirmation window has passed are failed in
    /// place. Returns the number of rows swept.
    pub fn expire_stale_deposits(
        conn: &mut PgConnection,
        user: Uuid,
        now: DateTime<Utc>,
    ) -> QueryResult<usize> {
        diesel::update(
            transactions::table
                .filter(transactions::user_id.eq(user))
                .filter(transactions::tx_type.eq(TransactionType::Deposit.as_str().to_string()))
                .filter(transactions::status.eq(TransactionStatus::Pending.as_str().to_string()))
                .filter(transactions::expires_at.lt(now)),
        )
        .set(transactions::status.eq(TransactionStatus::Failed.as_str()))
        .execute(conn)
    }

    /// Frozen rows whose hold has elapsed, oldest first.
    pub fn list_releasable(
        conn: &mut PgConnection,
        user: Uuid,
        now: DateTime<Utc>,
    ) -> QueryResult<Vec<TransactionEntity>> {
        transactions::table
            .filter(transactions::user_id.eq(user))
            .filter(transactions::is_frozen.eq(true))
            .filter(transactions::frozen_until.le(now))
            .order(transactions::created_at.asc())
            .load::<TransactionEntity>(conn)
    }

    pub fn clear_frozen(conn: &mut PgConnection, id: Uuid) -> QueryResult<usize> {
        diesel::update(transactions::table.find(id))
            .set(transactions::is_frozen.eq(false))
            .execute(conn)
    }
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
pub struct TransactionEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tx_type: String,
    pub amount: Decimal,
    pub status: String,
    pub currency_type: Option<String>,
    pub is_frozen: bool,
    pub is_frozen_exchange: bool,
    pub frozen_until: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = transactions)]
pub struct NewTransaction {
    pub user_id: Uuid,
    pub tx_type: String,
    pub amount: Decimal,
    pub status: String,
    pub currency_type: Option<String>,
    pub is_frozen: bool,
    pub is_frozen_exchange: bool,
    pub frozen_until: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewTransaction {
    pub fn completed(
        user_id: Uuid,
        tx_type: TransactionType,
        amount: Decimal,
        currency: &str,
    ) -> Self {
        NewTransaction {
            user_id,
            tx_type: tx_type.as_str().to_string(),
            amount,
            status: TransactionStatus::Completed.as_str().to_string(),
            currency_type: Some(currency.to_string()),
            is_frozen: false,
            is_frozen_exchange: false,
            frozen_until: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Purchase,
    Sale,
    Exchange,
}

impl TransactionType {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Purchase => "purchase",
            TransactionType::Sale => "sale",
            TransactionType::Exchange => "exchange",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionType::Deposit),
            "withdraw" => Ok(TransactionType::Withdraw),
            "purchase" => Ok(TransactionType::Purchase),
            "sale" => Ok(TransactionType::Sale),
            "exchange" => Ok(TransactionType::Exchange),
            _ => Err(format!("Invalid transaction type: {}", s)),
        }
    }
}

impl AsRef<str> for TransactionType {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            _ => Err(format!("Invalid transaction status: {}", s)),
        }
    }
}

impl AsRef<str> for TransactionStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rust_decimal_macros::dec;

    fn row(created_at: &str) -> TransactionEntity {
        TransactionEntity {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            tx_type: "deposit".to_string(),
            amount: dec!(1),
            status: "completed".to_string(),
            currency_type: Some("eth".to_string()),
            is_frozen: false,
            is_frozen_exchange: false,
            frozen_until: None,
            tx_hash: None,
            expires_at: None,
            created_at: created_at.parse().unwrap(),
        }
    }

    #[test]
    fn should_page_only_rows_strictly_older_than_the_cursor() {
        let rows = vec![
            row("2024-03-15T10:00:00Z"),
            row("2024-03-14T10:00:00Z"),
            row("2024-03-13T10:00:00Z"),
        ];
        let cursor: DateTime<Utc> = "2024-03-14T10:00:00Z".parse().unwrap();
        let page: Vec<_> = rows
            .iter()
            .filter(|row| TransactionRepository::older_than_cursor(row, Some(cursor)))
            .collect();
        assert_eq!(page.len(), 1);
        assert_eq!(
            page[0].created_at,
            "2024-03-13T10:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn should_exclude_the_row_the_cursor_points_at() {
        let pinned = row("2024-03-14T10:00:00Z");
        assert!(!TransactionRepository::older_than_cursor(
            &pinned,
            Some(pinned.created_at)
        ));
    }

    #[test]
    fn should_admit_every_row_without_a_cursor() {
        assert!(TransactionRepository::older_than_cursor(
            &row("2024-03-15T10:00:00Z"),
            None
        ));
    }
}
