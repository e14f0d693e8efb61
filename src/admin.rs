use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::cache::{CacheStats, ResolutionCache, SweepReport};
use crate::config::{AppConfig, PublicAppConfig};
use crate::db::{bootstrap, DatabaseContext, SharedConnection};
use crate::errors::AppResult;
use crate::geocoder::{GeocodeProvider, HttpGeocoder, ResolutionResult};
use crate::queue::{GeocodeQueue, QueueStatus};
use crate::resolver::AddressResolver;
use crate::scanner::{BulkScanner, ScanReport};
use crate::studios::StudioStore;
use crate::writer::{AppliedCoordinates, CoordinateWriter, StudioGeocoder};

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub database_path: Option<String>,
    pub config: PublicAppConfig,
    pub queue: QueueStatus,
    pub cache: CacheStats,
    pub provider_calls: u64,
}

/// Composition root: owns every geocoding component and hands out the
/// administrative operations collaborators call.
#[derive(Clone)]
pub struct GeocodeService {
    config: AppConfig,
    database_path: Option<String>,
    store: StudioStore,
    resolver: AddressResolver,
    writer: Arc<CoordinateWriter>,
    queue: GeocodeQueue,
    scanner: BulkScanner,
}

impl GeocodeService {
    /// Opens the configured database and the HTTP provider. Fails with a
    /// configuration error when no API key is set.
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let provider = Arc::new(HttpGeocoder::new(&config)?);
        let context = bootstrap(&config.database_path)?;
        Ok(Self::assemble(config, context, provider))
    }

    pub fn with_provider(
        config: AppConfig,
        context: DatabaseContext,
        provider: Arc<dyn GeocodeProvider>,
    ) -> Self {
        Self::assemble(config, context, provider)
    }

    fn assemble(
        config: AppConfig,
        context: DatabaseContext,
        provider: Arc<dyn GeocodeProvider>,
    ) -> Self {
        let database_path = context
            .path
            .as_ref()
            .map(|path| path.to_string_lossy().to_string());
        let db: SharedConnection = context.into_shared();
        let store = StudioStore::new(db.clone());
        let cache = ResolutionCache::new(db, config.cache_settings());
        let resolver = AddressResolver::new(cache, provider);
        let writer = Arc::new(CoordinateWriter::new(store.clone(), resolver.clone()));
        let queue = GeocodeQueue::new(writer.clone(), config.queue_settings());
        let scanner = BulkScanner::new(store.clone(), queue.clone(), config.placeholder());
        info!(
            database = database_path.as_deref().unwrap_or(":memory:"),
            "geocode service assembled"
        );

        Self {
            config,
            database_path,
            store,
            resolver,
            writer,
            queue,
            scanner,
        }
    }

    /// Interactive single-studio resolution; never retried.
    pub async fn resolve_studio(&self, studio_id: i64) -> AppResult<AppliedCoordinates> {
        self.writer.apply_coordinates(studio_id).await
    }

    pub async fn resolve_text(&self, address: &str) -> ResolutionResult {
        self.resolver.resolve_address(address).await
    }

    pub fn enqueue(&self, studio_id: i64) -> AppResult<()> {
        self.queue.enqueue(studio_id)
    }

    pub fn pending_studios(&self) -> AppResult<Vec<i64>> {
        self.scanner.find_pending()
    }

    pub fn scan(&self) -> AppResult<ScanReport> {
        self.scanner.scan_and_enqueue()
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    pub fn clear_queue(&self) -> usize {
        self.queue.clear()
    }

    pub fn sweep_cache(&self) -> AppResult<SweepReport> {
        self.resolver.cache().sweep()
    }

    pub async fn wait_idle(&self) {
        self.queue.wait_idle().await
    }

    pub fn studios(&self) -> &StudioStore {
        &self.store
    }

    pub fn health(&self) -> ServiceHealth {
        ServiceHealth {
            database_path: self.database_path.clone(),
            config: self.config.public_profile(),
            queue: self.queue.status(),
            cache: self.resolver.cache().stats(),
            provider_calls: self.resolver.provider_calls(),
        }
    }
}
