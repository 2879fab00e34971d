use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::auth_service::{AuthService, LoginRequest, RegisterRequest};
use crate::bid_repository::BidRepository;
use crate::error::ApiError;
use crate::exchange_service::{ExchangeDirection, ExchangeService};
use crate::kyc_service::{DocumentKind, KycService};
use crate::ledger_service::{parse_type_filter, LedgerService};
use crate::market_service::MarketService;
use crate::nft_repository::{MarketplaceStatus, NewNft, NftRepository};
use crate::user_repository::{Currency, UserRepository};

#[derive(Clone)]
pub struct AppState {
    pub auth_service: Arc<AuthService>,
    pub user_repository: Arc<UserRepository>,
    pub nft_repository: Arc<NftRepository>,
    pub bid_repository: Arc<BidRepository>,
    pub ledger_service: Arc<LedgerService>,
    pub market_service: Arc<MarketService>,
    pub exchange_service: Arc<ExchangeService>,
    pub kyc_service: Arc<KycService>,
}

pub fn get_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/profile", get(profile))
        .route("/api/auth/profile/wallet", post(generate_wallet))
        .route("/api/nfts", get(list_nfts).post(create_nft))
        .route("/api/nfts/owned", get(list_owned_nfts))
        .route("/api/nfts/:id", get(get_nft))
        .route("/api/nfts/:id/purchase", post(purchase_nft))
        .route("/api/nfts/:id/bids", get(list_bids).post(create_bid))
        .route("/api/bids/:id/accept", post(accept_bid))
        .route("/api/transactions", get(list_transactions))
        .route("/api/transactions/deposit", post(create_deposit))
        .route("/api/transactions/deposit/:id", get(get_deposit))
        .route("/api/transactions/deposit/:id/confirm", post(confirm_deposit))
        .route("/api/transactions/withdraw", post(withdraw))
        .route("/api/transactions/exchange", post(exchange))
        .route("/api/rates", get(get_rates))
        .route("/api/kyc/documents", post(upload_kyc_document))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn root() -> &'static str {
    "marketplace-backend"
}

fn parse_amount(raw: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw.trim()).map_err(|_| ApiError::validation("Invalid amount"))
}

fn parse_currency(raw: Option<&str>) -> Result<Currency, ApiError> {
    match raw {
        None => Ok(Currency::Eth),
        Some(raw) => {
            Currency::from_str(raw).map_err(|_| ApiError::validation("Invalid currency"))
        }
    }
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.auth_service.register(request)?;
    Ok((StatusCode::CREATED, Json(response)))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.auth_service.login(request)?))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    Ok(Json(state.auth_service.profile(user)?))
}

async fn list_nfts(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let nfts = state.nft_repository.list_for_sale()?;
    Ok(Json(json!({ "nfts": nfts })))
}

async fn list_owned_nfts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let nfts = state.nft_repository.list_owned_by(user)?;
    Ok(Json(json!({ "nfts": nfts })))
}

async fn generate_wallet(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let address = crate::user_repository::generate_wallet_address();
    state.user_repository.set_wallet_address(user, &address)?;
    Ok((StatusCode::CREATED, Json(json!({ "wallet_address": address }))))
}

async fn get_nft(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let nft = state
        .nft_repository
        .get_nft(id)?
        .ok_or_else(|| ApiError::not_found("NFT not found"))?;
    Ok(Json(nft))
}

#[derive(Debug, Deserialize)]
struct CreateNftRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    image: String,
    #[serde(default)]
    price: String,
    description: Option<String>,
    properties: Option<serde_json::Value>,
    marketplace: Option<String>,
}

async fn create_nft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateNftRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    if request.name.trim().is_empty() || request.image.trim().is_empty() {
        return Err(ApiError::validation("Name, image and price are required"));
    }
    let price = parse_amount(&request.price)?;
    if price <= Decimal::ZERO {
        return Err(ApiError::validation("Price must be greater than zero"));
    }
    let creator = state
        .user_repository
        .find_by_id(user)?
        .map(|u| u.login)
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    let nft = state.nft_repository.insert_nft(NewNft {
        name: request.name,
        image: request.image,
        price,
        creator,
        description: request.description,
        properties: request.properties,
        owner_id: Some(user),
        for_sale: true,
        marketplace: request.marketplace,
        marketplace_status: MarketplaceStatus::WaitingForBids.as_str().to_string(),
    })?;
    Ok((StatusCode::CREATED, Json(nft)))
}

async fn purchase_nft(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    Ok(Json(state.market_service.purchase_nft(user, id)?))
}

#[derive(Debug, Deserialize)]
struct CreateBidRequest {
    #[serde(default)]
    bid_amount: String,
    #[serde(default)]
    bidder_address: String,
}

async fn create_bid(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<CreateBidRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let amount = parse_amount(&request.bid_amount)?;
    let bid = state
        .market_service
        .place_bid(user, id, amount, request.bidder_address)?;
    Ok((StatusCode::CREATED, Json(bid)))
}

async fn list_bids(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let bids = state.bid_repository.list_active_for_nft(id)?;
    Ok(Json(json!({ "bids": bids })))
}

async fn accept_bid(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    Ok(Json(state.market_service.accept_bid(user, id)?))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<i64>,
    before: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    tx_type: Option<String>,
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<LedgerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let type_filter = parse_type_filter(query.tx_type.as_deref())?;
    let page = state
        .ledger_service
        .list(user, query.before, query.limit, type_filter)?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct AmountRequest {
    #[serde(default)]
    amount: String,
    currency_type: Option<String>,
}

async fn create_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let amount = parse_amount(&request.amount)?;
    let currency = parse_currency(request.currency_type.as_deref())?;
    let deposit = state.ledger_service.create_deposit(user, amount, currency)?;
    Ok((StatusCode::CREATED, Json(deposit)))
}

async fn get_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    Ok(Json(state.ledger_service.get_deposit(user, id)?))
}

#[derive(Debug, Deserialize)]
struct ConfirmDepositRequest {
    #[serde(default)]
    tx_hash: String,
}

async fn confirm_deposit(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(request): Json<ConfirmDepositRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    Ok(Json(state.ledger_service.confirm_deposit(
        user,
        id,
        &request.tx_hash,
    )?))
}

async fn withdraw(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<AmountRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let amount = parse_amount(&request.amount)?;
    let currency = parse_currency(request.currency_type.as_deref())?;
    Ok(Json(state.ledger_service.withdraw(user, amount, currency)?))
}

#[derive(Debug, Deserialize)]
struct ExchangeRequest {
    #[serde(default)]
    amount: String,
    #[serde(default)]
    direction: String,
}

async fn exchange(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<ExchangeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let amount = parse_amount(&request.amount)?;
    let direction = ExchangeDirection::from_str(&request.direction)
        .map_err(|_| ApiError::validation("Invalid exchange direction"))?;
    Ok(Json(
        state.exchange_service.exchange(user, amount, direction).await?,
    ))
}

async fn get_rates(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.exchange_service.current_rates().await))
}

#[derive(Debug, Deserialize)]
struct KycUploadRequest {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    data: String,
}

async fn upload_kyc_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<KycUploadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.auth_service.user_from_headers(&headers)?;
    let kind = DocumentKind::from_str(&request.kind)
        .map_err(|_| ApiError::validation("Invalid document kind"))?;
    let result = state.kyc_service.upload_document(user, kind, &request.data)?;
    Ok((StatusCode::CREATED, Json(result)))
}
