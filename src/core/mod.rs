pub mod boolean;
pub mod cache;
pub mod price_cache;
pub mod recalc;

pub use crate::domain::model::{FactureLine, PriceKey, PriceRequest, RecalcMode};
pub use crate::domain::ports::{ConfigProvider, PriceLookup};
pub use crate::utils::error::Result;
