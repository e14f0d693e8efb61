use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::ResolutionCache;
use crate::geocoder::{FailureKind, GeocodeProvider, ResolutionResult};

/// Cache-first address resolution shared by interactive lookups and the
/// batch queue.
#[derive(Clone)]
pub struct AddressResolver {
    cache: ResolutionCache,
    provider: Arc<dyn GeocodeProvider>,
    provider_calls: Arc<AtomicU64>,
}

impl AddressResolver {
    pub fn new(cache: ResolutionCache, provider: Arc<dyn GeocodeProvider>) -> Self {
        Self {
            cache,
            provider,
            provider_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    pub async fn resolve_address(&self, address: &str) -> ResolutionResult {
        if address.trim().is_empty() {
            return ResolutionResult::failure(FailureKind::InvalidRequest, "empty address");
        }

        match self.cache.lookup(address) {
            Ok(Some(hit)) => return hit,
            Ok(None) => {}
            Err(err) => warn!(?err, "cache lookup failed; falling through to provider"),
        }

        self.provider_calls.fetch_add(1, Ordering::Relaxed);
        let result = match self.provider.resolve(address).await {
            ResolutionResult::Success { lat, lng, .. } if !valid_coordinates(lat, lng) => {
                ResolutionResult::failure(
                    FailureKind::Provider,
                    format!("coordinates out of range: {lat}, {lng}"),
                )
            }
            result => result,
        };
        if let Err(err) = self.cache.store(address, &result) {
            warn!(?err, "failed to store resolution in cache");
        }
        debug!(success = result.is_success(), "address resolved via provider");
        result
    }

    pub fn provider_calls(&self) -> u64 {
        self.provider_calls.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }
}

fn valid_coordinates(lat: f64, lng: f64) -> bool {
    (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lng)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Provider double that replays scripted results and records each call.
    #[derive(Default)]
    pub struct ScriptedProvider {
        script: Mutex<VecDeque<ResolutionResult>>,
        fallback: Mutex<Option<ResolutionResult>>,
        pub calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        pub fn always(result: ResolutionResult) -> Self {
            let provider = Self::default();
            *provider.fallback.lock() = Some(result);
            provider
        }

        pub fn push(&self, result: ResolutionResult) {
            self.script.lock().push_back(result);
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    #[async_trait]
    impl GeocodeProvider for ScriptedProvider {
        async fn resolve(&self, address: &str) -> ResolutionResult {
            self.calls.lock().push(address.to_string());
            if let Some(next) = self.script.lock().pop_front() {
                return next;
            }
            self.fallback
                .lock()
                .clone()
                .unwrap_or_else(|| ResolutionResult::failure(FailureKind::NoResults, "ZERO_RESULTS"))
        }
    }
}
