use crate::adapters::executor::ApiExecutor;
use crate::core::boolean::deserialize_bool_like;
use crate::domain::model::{price_from_value, PriceRequest};
use crate::domain::ports::{ConfigProvider, PriceLookup};
use crate::utils::error::{PricingError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const CALCULATE_PRICE_PATH: &str = "tarifs/calculate-price";

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default = "default_success", deserialize_with = "deserialize_bool_like")]
    success: bool,
    #[serde(default)]
    prix: Option<Value>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    message: Option<String>,
}

fn default_success() -> bool {
    true
}

impl PriceResponse {
    fn into_price(self) -> Result<f64> {
        if !self.success {
            return Err(PricingError::ApiError {
                status: StatusCode::OK.as_u16(),
                message: self
                    .message
                    .unwrap_or_else(|| "price calculation refused".to_string()),
            });
        }

        let raw = match (self.prix, self.data) {
            (Some(prix), _) => prix,
            (None, Some(Value::Object(mut data))) => data.remove("prix").unwrap_or(Value::Null),
            (None, Some(other)) => other,
            (None, None) => {
                return Err(PricingError::DecodeError {
                    message: "no price in response".to_string(),
                })
            }
        };

        price_from_value(&raw).map_err(|message| PricingError::DecodeError { message })
    }
}

/// [`PriceLookup`] backed by the billing backend's price calculation endpoint.
pub struct HttpPriceLookup {
    client: Client,
    endpoint: String,
    token: Option<String>,
    executor: Arc<ApiExecutor>,
}

impl HttpPriceLookup {
    pub fn new(base_url: &str, token: Option<String>, executor: Arc<ApiExecutor>) -> Self {
        Self::with_client(Client::new(), base_url, token, executor)
    }

    pub fn from_config(config: &impl ConfigProvider, executor: Arc<ApiExecutor>) -> Result<Self> {
        let client = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self::with_client(
            client,
            config.api_base_url(),
            config.api_token().map(str::to_string),
            executor,
        ))
    }

    fn with_client(client: Client, base_url: &str, token: Option<String>, executor: Arc<ApiExecutor>) -> Self {
        Self {
            client,
            endpoint: format!("{}/{}", base_url.trim_end_matches('/'), CALCULATE_PRICE_PATH),
            token,
            executor,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post_calculate(&self, request: &PriceRequest) -> Result<f64> {
        tracing::debug!("POST {} {:?}", self.endpoint, request);

        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;
        let status = response.status();
        tracing::debug!("Price response status: {}", status);

        if status == StatusCode::UNAUTHORIZED {
            return Err(PricingError::SessionExpired);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PricingError::ApiError {
                status: status.as_u16(),
                message: backend_message(&body).unwrap_or(body),
            });
        }

        let payload: PriceResponse = response.json().await?;
        payload.into_price()
    }
}

/// Pulls `message` (or `error`) out of a JSON error body.
fn backend_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("message")
        .or_else(|| value.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl PriceLookup for HttpPriceLookup {
    async fn calculate_price(&self, request: &PriceRequest) -> Result<f64> {
        self.executor.execute(self.post_calculate(request)).await
    }
}
