pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::TomlConfig;

pub use adapters::{ApiExecutor, HttpPriceLookup, SessionEvent};
pub use core::{
    boolean::{normalize_boolean_fields, normalize_boolean_fields_array, to_boolean},
    cache::CoalescingCache,
    price_cache::{PriceCache, PriceOutcome},
    recalc::{FacturePricer, ManualOverrides, RecalcReport},
};
pub use domain::model::{FactureLine, PriceKey, PriceRequest, RecalcMode};
pub use utils::error::{PricingError, Result};
