//! # Cache Module
//!
//! Bounded, time-limited cache for track metadata.
//!
//! The resolver stores every metadata record it normalizes here, keyed by the
//! platform track ID, so resolving the same track twice within the TTL never
//! reaches the remote API again.
//!
//! ## Features
//!
//! - **LRU Eviction**: removes the least recently used entry when full
//! - **TTL**: entries expire a fixed time after insertion
//! - **Thread Safety**: backed by `DashMap`, shared by cloning
//! - **Metrics**: hit/miss/eviction counters
//!
//! ## Configuration
//!
//! ```env
//! METADATA_CACHE_SIZE=100     # Maximum number of metadata entries
//! METADATA_CACHE_TTL=900      # Time-to-live in seconds (15 minutes)
//! ```

pub mod lru_cache;

use lru_cache::LRUCache;
use tracing::info;

use crate::sources::TrackMetadata;

/// Metadata records keyed by platform track ID.
pub type MetadataCache = LRUCache<String, TrackMetadata>;

impl MetadataCache {
    /// Removes expired entries; called from the maintenance loop.
    pub fn cleanup_old_entries(&self) {
        let removed = self.cleanup_expired();
        let metrics = self.metrics();
        if removed > 0 {
            info!("🧹 Limpieza de cache: {} entradas expiradas", removed);
        }
        info!(
            "📊 Cache de metadatos: {} entradas, {:.0}% aciertos",
            self.len(),
            metrics.hit_rate() * 100.0
        );
    }
}
