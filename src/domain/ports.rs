use crate::domain::model::PriceRequest;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Remote price calculation. Assumed idempotent for the same request.
#[async_trait]
pub trait PriceLookup: Send + Sync {
    async fn calculate_price(&self, request: &PriceRequest) -> Result<f64>;
}

pub trait ConfigProvider: Send + Sync {
    fn api_base_url(&self) -> &str;
    fn api_token(&self) -> Option<&str>;
    fn request_timeout(&self) -> Duration;
    fn cache_ttl(&self) -> Duration;
    fn throttle_delay(&self) -> Duration;
    fn settle_delay(&self) -> Duration;
}
