use std::sync::Arc;

use axum::http::HeaderMap;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::db::PostgreSqlClient;
use crate::error::ApiError;
use crate::ledger_service::release_due_freezes;
use crate::user_repository::{NewProfile, NewUser, ProfileEntity, UserEntity, UserRepository};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn issue_token(secret: &str, ttl_hours: i64, user_id: Uuid) -> Result<String, ApiError> {
    let expiration = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: user_id.to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_ref()),
    )
    .map_err(|err| ApiError::Internal(err.to_string()))
}

pub fn decode_token(secret: &str, token: &str) -> Result<Uuid, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthorized("Invalid token".to_string()))?;
    Uuid::parse_str(&data.claims.sub)
        .map_err(|_| ApiError::Unauthorized("Invalid token".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default, rename = "birthDate")]
    pub birth_date: String,
    #[serde(default)]
    pub country: String,
}

impl RegisterRequest {
    fn has_missing_fields(&self) -> bool {
        [
            &self.email,
            &self.password,
            &self.login,
            &self.nickname,
            &self.birth_date,
            &self.country,
        ]
        .iter()
        .any(|field| field.trim().is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserEntity,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub user: UserEntity,
    pub profile: ProfileEntity,
}

/// Both `email` and `login` carry unique indexes; the violated constraint
/// names the field the client has to change.
fn unique_violation_message(constraint: Option<&str>) -> &'static str {
    match constraint {
        Some(name) if name.contains("login") => "Login already exists",
        _ => "Email already exists",
    }
}

pub struct AuthService {
    db_client: Arc<PostgreSqlClient>,
    user_repository: Arc<UserRepository>,
    jwt_secret: String,
    token_ttl_hours: i64,
}

impl AuthService {
    pub fn new(
        db_client: Arc<PostgreSqlClient>,
        user_repository: Arc<UserRepository>,
        config: &AuthConfig,
    ) -> Self {
        AuthService {
            db_client,
            user_repository,
            jwt_secret: config.jwt_secret.clone(),
            token_ttl_hours: config.token_ttl_hours,
        }
    }

    /// Creates the user and their zero-balance profile in one transaction.
    pub fn register(&self, request: RegisterRequest) -> Result<AuthResponse, ApiError> {
        if request.has_missing_fields() {
            return Err(ApiError::validation("All fields are required"));
        }
        if self.user_repository.email_exists(&request.email)? {
            return Err(ApiError::validation("Email already exists"));
        }
        let password_hash = hash(&request.password, DEFAULT_COST)
            .map_err(|err| ApiError::Internal(err.to_string()))?;

        let mut conn = self.db_client.get_db_connection()?;
        let user = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                let user = UserRepository::insert_user(
                    conn,
                    NewUser {
                        login: request.login.clone(),
                        email: request.email.clone(),
                        password_hash: password_hash.clone(),
                        nickname: request.nickname.clone(),
                        birth_date: request.birth_date.clone(),
                        country: request.country.clone(),
                    },
                )?;
                UserRepository::insert_profile(conn, NewProfile::empty(user.id))?;
                Ok(user)
            })
            .map_err(|err| match err {
                diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                    ApiError::validation(unique_violation_message(info.constraint_name()))
                }
                other => ApiError::from(other),
            })?;

        info!("Registered user {} ({})", user.login, user.id);
        let token = issue_token(&self.jwt_secret, self.token_ttl_hours, user.id)?;
        Ok(AuthResponse { token, user })
    }

    pub fn login(&self, request: LoginRequest) -> Result<AuthResponse, ApiError> {
        let user = self
            .user_repository
            .find_by_email(&request.email)?
            .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;
        let valid = verify(&request.password, &user.password_hash)
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        if !valid {
            return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
        }
        let token = issue_token(&self.jwt_secret, self.token_ttl_hours, user.id)?;
        Ok(AuthResponse { token, user })
    }

    /// Releases any elapsed holds, then returns the profile with its balances.
    pub fn profile(&self, user_id: Uuid) -> Result<ProfileResponse, ApiError> {
        let mut conn = self.db_client.get_db_connection()?;
        conn.transaction::<_, ApiError, _>(|conn| release_due_freezes(conn, user_id, Utc::now()))?;
        drop(conn);

        let user = self
            .user_repository
            .find_by_id(user_id)?
            .ok_or_else(|| ApiError::not_found("User not found"))?;
        let profile = self
            .user_repository
            .get_profile(user_id)?
            .ok_or_else(|| ApiError::not_found("Profile not found"))?;
        Ok(ProfileResponse { user, profile })
    }

    /// Resolves the bearer token on a request to a user id.
    pub fn user_from_headers(&self, headers: &HeaderMap) -> Result<Uuid, ApiError> {
        let header = headers
            .get("Authorization")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Missing Authorization header".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("Invalid Authorization header".to_string()))?;
        decode_token(&self.jwt_secret, token)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn request(email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: password.to_string(),
            login: "collector".to_string(),
            nickname: "Collector".to_string(),
            birth_date: "1990-01-01".to_string(),
            country: "PL".to_string(),
        }
    }

    #[test]
    fn should_require_every_register_field() {
        assert!(!request("a@b.c", "hunter22").has_missing_fields());
        assert!(request("a@b.c", "").has_missing_fields());
        assert!(request("", "hunter22").has_missing_fields());
        assert!(request("a@b.c", "   ").has_missing_fields());
    }

    #[test]
    fn should_round_trip_bearer_tokens() {
        let user_id = Uuid::new_v4();
        let token = issue_token("test-secret", 24, user_id).unwrap();
        assert_eq!(decode_token("test-secret", &token).unwrap(), user_id);
        assert!(decode_token("test-secret", "not-a-token").is_err());
        assert!(decode_token("other-secret", &token).is_err());
    }

    #[test]
    fn should_name_the_conflicting_unique_field() {
        assert_eq!(
            unique_violation_message(Some("users_login_key")),
            "Login already exists"
        );
        assert_eq!(
            unique_violation_message(Some("users_email_key")),
            "Email already exists"
        );
        assert_eq!(unique_violation_message(None), "Email already exists");
    }

    #[test]
    fn should_hash_and_verify_passwords() {
        let hashed = hash("hunter22", 4).unwrap();
        assert!(verify("hunter22", &hashed).unwrap());
        assert!(!verify("hunter23", &hashed).unwrap());
    }
}
