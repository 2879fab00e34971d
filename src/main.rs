use std::sync::Arc;

use anyhow::anyhow;
use log::info;

use crate::auth_service::AuthService;
use crate::bid_repository::BidRepository;
use crate::config::Config;
use crate::db::PostgreSqlClient;
use crate::exchange_service::ExchangeService;
use crate::kyc_service::KycService;
use crate::ledger_service::LedgerService;
use crate::market_service::MarketService;
use crate::nft_repository::NftRepository;
use crate::rate_cache::RateCache;
use crate::routes::{get_router, AppState};
use crate::transaction_repository::TransactionRepository;
use crate::user_repository::UserRepository;

pub mod auth_service;
pub mod bid_repository;
pub mod config;
pub mod db;
pub mod error;
pub mod exchange_service;
pub mod kyc_service;
pub mod ledger_service;
pub mod market_service;
pub mod nft_repository;
pub mod rate_cache;
pub mod routes;
pub mod schema;
pub mod transaction_repository;
pub mod user_repository;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = Config::load()?;
    let db_client = Arc::new(
        PostgreSqlClient::init(&config.postgres).map_err(|err| anyhow!("{}", err))?,
    );

    let user_repository = Arc::new(UserRepository::new(Arc::clone(&db_client)));
    let nft_repository = Arc::new(NftRepository::new(Arc::clone(&db_client)));
    let bid_repository = Arc::new(BidRepository::new(Arc::clone(&db_client)));
    let transaction_repository = Arc::new(TransactionRepository::new(Arc::clone(&db_client)));
    let rate_cache = Arc::new(RateCache::init(&config.rates));

    let auth_service = Arc::new(AuthService::new(
        Arc::clone(&db_client),
        Arc::clone(&user_repository),
        &config.auth,
    ));
    let ledger_service = Arc::new(LedgerService::new(
        Arc::clone(&db_client),
        Arc::clone(&transaction_repository),
    ));
    let market_service = Arc::new(MarketService::new(Arc::clone(&db_client)));
    let exchange_service = Arc::new(ExchangeService::new(
        Arc::clone(&db_client),
        Arc::clone(&rate_cache),
    ));
    let kyc_service = Arc::new(KycService::new(
        Arc::clone(&user_repository),
        &config.kyc.documents_dir,
    ));

    let app_state = Arc::new(AppState {
        auth_service,
        user_repository,
        nft_repository,
        bid_repository,
        ledger_service,
        market_service,
        exchange_service,
        kyc_service,
    });

    let router = get_router(app_state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}
