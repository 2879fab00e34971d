use chrono::{DateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::PostgreSqlClient;
use crate::schema::{profiles, users};

pub struct UserRepository {
    db_client: Arc<PostgreSqlClient>,
}

impl UserRepository {
    pub fn new(db_client: Arc<PostgreSqlClient>) -> Self {
        UserRepository { db_client }
    }

    pub fn email_exists(&self, email: &str) -> Result<bool, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        let count: i64 = users::table
            .filter(users::email.eq(email))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(users::table
            .filter(users::email.eq(email))
            .first::<UserEntity>(&mut conn)
            .optional()?)
    }

    pub fn find_by_id(&self, id: Uuid) -> Result<Option<UserEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(users::table
            .find(id)
            .first::<UserEntity>(&mut conn)
            .optional()?)
    }

    pub fn insert_user(conn: &mut PgConnection, new_user: NewUser) -> QueryResult<UserEntity> {
        diesel::insert_into(users::table)
            .values(new_user)
            .get_result(conn)
    }

    pub fn insert_profile(
        conn: &mut PgConnection,
        new_profile: NewProfile,
    ) -> QueryResult<ProfileEntity> {
        diesel::insert_into(profiles::table)
            .values(new_profile)
            .get_result(conn)
    }

    pub fn get_profile(
        &self,
        user: Uuid,
    ) -> Result<Option<ProfileEntity>, Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        Ok(profiles::table
            .filter(profiles::user_id.eq(user))
            .first::<ProfileEntity>(&mut conn)
            .optional()?)
    }

    /// Row-locked read used inside balance-moving transactions.
    pub fn lock_profile(conn: &mut PgConnection, user: Uuid) -> QueryResult<ProfileEntity> {
        profiles::table
            .filter(profiles::user_id.eq(user))
            .for_update()
            .first::<ProfileEntity>(conn)
    }

    pub fn credit_balance(
        conn: &mut PgConnection,
        user: Uuid,
        currency: Currency,
        amount: Decimal,
    ) -> QueryResult<usize> {
        let target = profiles::table.filter(profiles::user_id.eq(user));
        match currency {
            Currency::Eth => diesel::update(target)
                .set(profiles::balance.eq(profiles::balance + amount))
                .execute(conn),
            Currency::Usdt => diesel::update(target)
                .set(profiles::usdt_balance.eq(profiles::usdt_balance + amount))
                .execute(conn),
        }
    }

    pub fn debit_balance(
        conn: &mut PgConnection,
        user: Uuid,
        currency: Currency,
        amount: Decimal,
    ) -> QueryResult<usize> {
        Self::credit_balance(conn, user, currency, -amount)
    }

    pub fn credit_frozen_balance(
        conn: &mut PgConnection,
        user: Uuid,
        currency: Currency,
        amount: Decimal,
    ) -> QueryResult<usize> {
        let target = profiles::table.filter(profiles::user_id.eq(user));
        match currency {
            Currency::Eth => diesel::update(target)
                .set(profiles::frozen_balance.eq(profiles::frozen_balance + amount))
                .execute(conn),
            Currency::Usdt => diesel::update(target)
                .set(profiles::frozen_usdt_balance.eq(profiles::frozen_usdt_balance + amount))
                .execute(conn),
        }
    }

    /// Moves `amount` from the frozen pool back into the spendable pool.
    pub fn thaw_balance(
        conn: &mut PgConnection,
        user: Uuid,
        currency: Currency,
        amount: Decimal,
    ) -> QueryResult<usize> {
        Self::credit_frozen_balance(conn, user, currency, -amount)?;
        Self::credit_balance(conn, user, currency, amount)
    }

    pub fn set_kyc_status(
        &self,
        user: Uuid,
        status: KycStatus,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        diesel::update(profiles::table.filter(profiles::user_id.eq(user)))
            .set(profiles::kyc_status.eq(status.as_str()))
            .execute(&mut conn)?;
        Ok(())
    }

    pub fn set_wallet_address(
        &self,
        user: Uuid,
        address: &str,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut conn = self.db_client.get_db_connection()?;
        diesel::update(profiles::table.filter(profiles::user_id.eq(user)))
            .set(profiles::wallet_address.eq(address))
            .execute(&mut conn)?;
        Ok(())
    }
}

/// Mock wallet address in the familiar 0x-prefixed 20-byte shape. Nothing
/// on-chain backs it.
pub fn generate_wallet_address() -> String {
    let head = Uuid::new_v4();
    let tail = Uuid::new_v4();
    let hex: String = head
        .as_bytes()
        .iter()
        .chain(tail.as_bytes().iter().take(4))
        .map(|byte| format!("{:02x}", byte))
        .collect();
    format!("0x{}", hex)
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
pub struct UserEntity {
    pub id: Uuid,
    pub login: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub nickname: String,
    pub birth_date: String,
    pub country: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub password_hash: String,
    pub nickname: String,
    pub birth_date: String,
    pub country: String,
}

#[derive(Queryable, Serialize, Deserialize, Debug, Clone)]
pub struct ProfileEntity {
    pub id: Uuid,
    pub user_id: Uuid,
    pub balance: Decimal,
    pub usdt_balance: Decimal,
    pub frozen_balance: Decimal,
    pub frozen_usdt_balance: Decimal,
    pub wallet_address: Option<String>,
    pub kyc_status: String,
    pub verified: bool,
}

impl ProfileEntity {
    pub fn available(&self, currency: Currency) -> Decimal {
        match currency {
            Currency::Eth => self.balance,
            Currency::Usdt => self.usdt_balance,
        }
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = profiles)]
pub struct NewProfile {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub usdt_balance: Decimal,
    pub frozen_balance: Decimal,
    pub frozen_usdt_balance: Decimal,
    pub kyc_status: String,
    pub verified: bool,
}

impl NewProfile {
    pub fn empty(user_id: Uuid) -> Self {
        NewProfile {
            user_id,
            balance: Decimal::ZERO,
            usdt_balance: Decimal::ZERO,
            frozen_balance: Decimal::ZERO,
            frozen_usdt_balance: Decimal::ZERO,
            kyc_status: KycStatus::NotStarted.as_str().to_string(),
            verified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Currency {
    Eth,
    Usdt,
}

impl Currency {
    pub fn as_str(&self) -> &str {
        match self {
            Currency::Eth => "eth",
            Currency::Usdt => "usdt",
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth" => Ok(Currency::Eth),
            "usdt" => Ok(Currency::Usdt),
            _ => Err(format!("Invalid currency: {}", s)),
        }
    }
}

impl AsRef<str> for Currency {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KycStatus {
    NotStarted,
    IdentitySubmitted,
    AddressSubmitted,
    UnderReview,
    Verified,
    Rejected,
}

impl KycStatus {
    pub fn as_str(&self) -> &str {
        match self {
            KycStatus::NotStarted => "not_started",
            KycStatus::IdentitySubmitted => "identity_submitted",
            KycStatus::AddressSubmitted => "address_submitted",
            KycStatus::UnderReview => "under_review",
            KycStatus::Verified => "verified",
            KycStatus::Rejected => "rejected",
        }
    }
}

impl FromStr for KycStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(KycStatus::NotStarted),
            "identity_submitted" => Ok(KycStatus::IdentitySubmitted),
            "address_submitted" => Ok(KycStatus::AddressSubmitted),
            "under_review" => Ok(KycStatus::UnderReview),
            "verified" => Ok(KycStatus::Verified),
            "rejected" => Ok(KycStatus::Rejected),
            _ => Err(format!("Invalid kyc status: {}", s)),
        }
    }
}

impl AsRef<str> for KycStatus {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_generate_eth_shaped_wallet_addresses() {
        let address = generate_wallet_address();
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
        assert!(address[2..].chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(generate_wallet_address(), address);
    }

    #[test]
    fn should_round_trip_kyc_statuses() {
        for status in [
            KycStatus::NotStarted,
            KycStatus::IdentitySubmitted,
            KycStatus::AddressSubmitted,
            KycStatus::UnderReview,
            KycStatus::Verified,
            KycStatus::Rejected,
        ] {
            assert_eq!(KycStatus::from_str(status.as_str()), Ok(status));
        }
        assert!(KycStatus::from_str("started").is_err());
    }
}
