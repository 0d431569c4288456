use crate::config::RatesConfig;
use crate::domain::currency::Currency;
use crate::error::{BillingError, Result};
use crate::rates::{ExchangeRateSet, RateProvenance, RateSource};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct RateCacheConfig {
    /// Maximum age of cached rates before a refetch is attempted
    pub ttl: Duration,
    /// Upper bound on a single fetch, on top of any transport timeout
    pub request_timeout: Duration,
}

impl Default for RateCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&RatesConfig> for RateCacheConfig {
    fn from(config: &RatesConfig) -> Self {
        Self {
            ttl: config.ttl(),
            request_timeout: config.request_timeout(),
        }
    }
}

/// Rates handed to a billing run together with their origin
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    pub rates: Arc<ExchangeRateSet>,
    pub provenance: RateProvenance,
}

#[derive(Debug, Clone)]
struct CachedRates {
    rates: Arc<ExchangeRateSet>,
    fetched_at: Instant,
}

impl CachedRates {
    fn new(rates: ExchangeRateSet) -> Self {
        Self {
            rates: Arc::new(rates),
            fetched_at: Instant::now(),
        }
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Process-wide exchange rate cache with TTL and graceful degradation.
///
/// A refresh swaps the whole `Arc<ExchangeRateSet>`, so concurrent readers
/// observe either the previous complete set or the new one.
pub struct RateCache {
    source: Arc<dyn RateSource>,
    config: RateCacheConfig,
    fallback: Arc<ExchangeRateSet>,
    cached: RwLock<Option<CachedRates>>,
}

impl RateCache {
    pub fn new(
        source: Arc<dyn RateSource>,
        config: RateCacheConfig,
        fallback: ExchangeRateSet,
    ) -> Self {
        Self {
            source,
            config,
            fallback: Arc::new(fallback),
            cached: RwLock::new(None),
        }
    }

    /// Returns current rates. Never fails: on fetch failure the last cached
    /// set is served regardless of age, then the fallback set.
    pub async fn get_rates(&self, force_refresh: bool) -> RateSnapshot {
        if !force_refresh {
            let cache = self.cached.read().await;
            if let Some(cached) = cache.as_ref() {
                if !cached.is_stale(self.config.ttl) {
                    debug!(
                        "Serving cached exchange rates (age: {}s)",
                        cached.fetched_at.elapsed().as_secs()
                    );
                    return RateSnapshot {
                        rates: cached.rates.clone(),
                        provenance: RateProvenance::Cached,
                    };
                }
            }
        }

        match self.fetch().await {
            Ok(rates) => {
                let cached = CachedRates::new(rates);
                let snapshot = RateSnapshot {
                    rates: cached.rates.clone(),
                    provenance: RateProvenance::Fresh,
                };
                *self.cached.write().await = Some(cached);

                info!("Updated exchange rates: {}", describe(&snapshot.rates));
                snapshot
            }
            Err(e) => {
                warn!("Failed to fetch exchange rates: {}", e);

                let cache = self.cached.read().await;
                if let Some(cached) = cache.as_ref() {
                    let age_seconds = cached.fetched_at.elapsed().as_secs();
                    warn!(
                        "Using stale cached exchange rates (age: {}s): {}",
                        age_seconds,
                        describe(&cached.rates)
                    );
                    return RateSnapshot {
                        rates: cached.rates.clone(),
                        provenance: RateProvenance::Stale { age_seconds },
                    };
                }

                warn!(
                    "No cached exchange rates, using fallback rates: {}",
                    describe(&self.fallback)
                );
                RateSnapshot {
                    rates: self.fallback.clone(),
                    provenance: RateProvenance::Fallback,
                }
            }
        }
    }

    /// Cached rates and their age, for monitoring
    pub async fn cache_status(&self) -> Option<(Arc<ExchangeRateSet>, Duration)> {
        let cache = self.cached.read().await;
        cache
            .as_ref()
            .map(|c| (c.rates.clone(), c.fetched_at.elapsed()))
    }

    async fn fetch(&self) -> Result<ExchangeRateSet> {
        let currencies: Vec<Currency> = Currency::foreign().collect();

        let fetched = tokio::time::timeout(
            self.config.request_timeout,
            self.source.fetch(&currencies),
        )
        .await
        .map_err(|_| BillingError::RateSource {
            message: format!(
                "rate fetch timed out after {}ms",
                self.config.request_timeout.as_millis()
            ),
        })??;

        ExchangeRateSet::new(fetched)
    }
}

fn describe(rates: &ExchangeRateSet) -> String {
    rates
        .iter()
        .filter(|(currency, _)| !currency.is_base())
        .map(|(currency, rate)| format!("{}={}", currency, rate))
        .collect::<Vec<_>>()
        .join(", ")
}
