// Adapters layer: concrete implementations for external systems (billing backend over HTTP).

pub mod executor;
pub mod http;

pub use executor::{ApiExecutor, SessionEvent};
pub use http::HttpPriceLookup;
