use crate::core::cache::CoalescingCache;
use crate::domain::model::{ClientId, PriceKey, PriceRequest, ServiceId, UniteId};
use crate::domain::ports::PriceLookup;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_PRICE_TTL: Duration = Duration::from_secs(10);

/// Result of one price lookup. `failed` marks a price of 0 that stands in
/// for a lookup error rather than a tariff set to 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceOutcome {
    pub price: f64,
    pub failed: bool,
}

impl PriceOutcome {
    fn priced(price: f64) -> Self {
        Self { price, failed: false }
    }

    fn failed() -> Self {
        Self {
            price: 0.0,
            failed: true,
        }
    }
}

/// Price lookups for invoice lines, cached per (client, service, unit).
///
/// Lookup failures never reach the caller as errors: they are logged and the
/// line is priced at 0. They are still counted, see [`PriceCache::failed_lookups`].
pub struct PriceCache<L: PriceLookup> {
    lookup: L,
    cache: CoalescingCache<PriceKey, PriceOutcome>,
    date: RwLock<Option<NaiveDate>>,
    failures: AtomicUsize,
}

impl<L: PriceLookup> PriceCache<L> {
    pub fn new(lookup: L) -> Self {
        Self::with_ttl(lookup, DEFAULT_PRICE_TTL)
    }

    pub fn with_ttl(lookup: L, ttl: Duration) -> Self {
        Self {
            lookup,
            cache: CoalescingCache::new(Some(ttl)),
            date: RwLock::new(None),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    /// Date sent with lookups; today when unset.
    pub fn set_date(&self, date: Option<NaiveDate>) {
        *self.date.write().unwrap_or_else(PoisonError::into_inner) = date;
    }

    pub fn date(&self) -> NaiveDate {
        let date = *self.date.read().unwrap_or_else(PoisonError::into_inner);
        date.unwrap_or_else(|| chrono::Local::now().date_naive())
    }

    pub async fn get_price(
        &self,
        client_id: Option<ClientId>,
        service_id: Option<ServiceId>,
        unite_id: Option<UniteId>,
        force_recalculate: bool,
    ) -> f64 {
        self.price_outcome(client_id, service_id, unite_id, force_recalculate)
            .await
            .price
    }

    /// Same as [`PriceCache::get_price`], keeping track of whether the price
    /// came from a failed lookup.
    pub async fn price_outcome(
        &self,
        client_id: Option<ClientId>,
        service_id: Option<ServiceId>,
        unite_id: Option<UniteId>,
        force_recalculate: bool,
    ) -> PriceOutcome {
        let Some(key) = PriceKey::from_parts(client_id, service_id, unite_id) else {
            tracing::warn!(
                "⚠️ Missing parameters for price lookup (client: {:?}, service: {:?}, unite: {:?})",
                client_id,
                service_id,
                unite_id
            );
            return PriceOutcome::priced(0.0);
        };

        let request = PriceRequest::new(key, self.date());
        let lookup = &self.lookup;
        let failures = &self.failures;

        self.cache
            .get_or_fetch(key, force_recalculate, || async move {
                tracing::debug!("Fetching price for {:?}", key);
                match lookup.calculate_price(&request).await {
                    Ok(price) => PriceOutcome::priced(price),
                    Err(e) => {
                        failures.fetch_add(1, Ordering::SeqCst);
                        if e.is_session_expired() {
                            // already reported on the session channel
                            tracing::debug!("Price lookup for {:?} stopped: session expired", key);
                        } else {
                            tracing::error!("❌ Price lookup failed for {:?}: {}", key, e);
                        }
                        PriceOutcome::failed()
                    }
                }
            })
            .await
    }

    pub fn cached_price(&self, key: &PriceKey) -> Option<f64> {
        self.cache.get(key).map(|outcome| outcome.price)
    }

    /// Remote lookups that failed since this cache was created. Not reset by
    /// [`PriceCache::clear_cache`].
    pub fn failed_lookups(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn clear_cache(&self) {
        tracing::debug!("Clearing price cache ({} entries)", self.cache.len());
        self.cache.clear();
    }

    pub fn pending_lookups(&self) -> usize {
        self.cache.pending_len()
    }
}
