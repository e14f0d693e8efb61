use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::errors::{AppError, AppResult};
use crate::geocoder::ResolutionResult;
use crate::resolver::AddressResolver;
use crate::studios::StudioStore;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedCoordinates {
    pub studio_id: i64,
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: Option<String>,
}

/// Per-item step driven by the batch queue.
#[async_trait]
pub trait StudioGeocoder: Send + Sync {
    async fn apply_coordinates(&self, studio_id: i64) -> AppResult<AppliedCoordinates>;
}

#[derive(Clone)]
pub struct CoordinateWriter {
    store: StudioStore,
    resolver: AddressResolver,
}

impl CoordinateWriter {
    pub fn new(store: StudioStore, resolver: AddressResolver) -> Self {
        Self { store, resolver }
    }
}

#[async_trait]
impl StudioGeocoder for CoordinateWriter {
    async fn apply_coordinates(&self, studio_id: i64) -> AppResult<AppliedCoordinates> {
        let studio = self
            .store
            .load(studio_id)?
            .ok_or(AppError::NotFound(studio_id))?;
        let address = studio.address.joined();
        if address.is_empty() {
            return Err(AppError::NoAddress(studio_id));
        }

        let (lat, lng, formatted_address) = match self.resolver.resolve_address(&address).await {
            ResolutionResult::Success {
                lat,
                lng,
                formatted_address,
            } => (lat, lng, formatted_address),
            failure => {
                let err = failure
                    .into_error()
                    .unwrap_or_else(|| AppError::Provider("unclassified failure".into()));
                warn!(studio_id, %address, error = %err, "studio left unresolved");
                return Err(err);
            }
        };

        self.store.write_coordinates(studio_id, lat, lng)?;
        info!(studio_id, lat, lng, "studio geocoded");
        Ok(AppliedCoordinates {
            studio_id,
            address,
            lat,
            lng,
            formatted_address,
        })
    }
}
