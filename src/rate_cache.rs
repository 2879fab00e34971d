use std::{sync::Mutex, time::Duration};

use log::warn;
use lru_time_cache::LruCache;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::config::RatesConfig;

const ETH_USD_KEY: &str = "eth_usd";

/// ETH/USD spot price with a short-lived cache in front of the public price
/// API. Falls back to a configured constant when the API is unreachable.
pub struct RateCache {
    cache: Mutex<LruCache<String, Decimal>>,
    price_api_url: String,
    fallback: Decimal,
}

impl RateCache {
    pub fn init(config: &RatesConfig) -> Self {
        let fallback = config
            .fallback_eth_usd
            .parse::<Decimal>()
            .unwrap_or(Decimal::from(2074));
        RateCache {
            cache: Mutex::new(LruCache::<String, Decimal>::with_expiry_duration(
                Duration::from_secs(config.refresh_secs),
            )),
            price_api_url: config.price_api_url.clone(),
            fallback,
        }
    }

    pub async fn get_eth_usd(&self) -> Decimal {
        if let Some(rate) = self.cache.lock().unwrap().get(ETH_USD_KEY).cloned() {
            return rate;
        }
        match fetch_spot_price(&self.price_api_url).await {
            Some(rate) => {
                self.cache
                    .lock()
                    .unwrap()
                    .insert(ETH_USD_KEY.to_string(), rate);
                rate
            }
            None => {
                warn!("Spot price fetch failed, using fallback rate");
                self.fallback
            }
        }
    }
}

async fn fetch_spot_price(url: &str) -> Option<Decimal> {
    let response = reqwest::get(url).await.ok()?;
    let body = response.text().await.ok()?;
    let json = serde_json::from_str::<Value>(&body).ok()?;
    let price = json["ethereum"]["usd"].as_f64()?;
    Decimal::from_f64(price)
}
