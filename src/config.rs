use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub auth: AuthConfig,
    pub rates: RatesConfig,
    pub kyc: KycConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
}

#[derive(Debug, Deserialize)]
pub struct RatesConfig {
    pub price_api_url: String,
    pub refresh_secs: u64,
    pub fallback_eth_usd: String,
}

#[derive(Debug, Deserialize)]
pub struct KycConfig {
    pub documents_dir: String,
}

impl Config {
    /// Reads `config.yaml`, with `APP_`-prefixed environment variables
    /// overriding individual keys (e.g. `APP_POSTGRES__PASSWORD`).
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Yaml::file("config.yaml"))
            .merge(Env::prefixed("APP_").split("__"))
            .extract()
    }
}
