mod admin;
mod cache;
mod config;
mod db;
mod errors;
mod geocoder;
mod queue;
mod resolver;
mod scanner;
mod studios;
mod writer;

use once_cell::sync::OnceCell;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use admin::{GeocodeService, ServiceHealth};
pub use cache::{address_hash, normalize_address, CacheStats, ResolutionCache, SweepReport};
pub use config::{AppConfig, CacheSettings, PublicAppConfig, QueueSettings};
pub use db::{bootstrap, bootstrap_in_memory, DatabaseContext, SharedConnection};
pub use errors::{AppError, AppResult};
pub use geocoder::{FailureKind, GeocodeProvider, HttpGeocoder, ResolutionResult};
pub use queue::{backoff_delay, BatchSummary, GeocodeQueue, ItemFailure, QueueState, QueueStatus};
pub use resolver::AddressResolver;
pub use scanner::{BulkScanner, ScanReport};
pub use studios::{NewStudio, Studio, StudioAddress, StudioStore};
pub use writer::{AppliedCoordinates, CoordinateWriter, StudioGeocoder};

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,studio_geocoder=debug"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init();
    });
}
