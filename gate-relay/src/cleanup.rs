//! Background cleanup task for expired pre-authorization grants.
//!
//! Lookups already treat expired grants as absent; the sweep only keeps the
//! map from growing without bound.

use crate::config::CleanupConfig;
use crate::preauth::PreAuthorizationCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

/// Spawn a background cleanup task.
///
/// Returns a handle that can be used to abort the task.
pub fn spawn_cleanup_task(
    grants: Arc<PreAuthorizationCache>,
    config: CleanupConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if !config.enabled {
            tracing::info!("Cleanup task disabled");
            return;
        }

        let interval_secs = config.interval_secs.max(1);
        tracing::info!("Cleanup task started (interval: {}s)", interval_secs);

        let mut timer = interval(Duration::from_secs(interval_secs));

        loop {
            timer.tick().await;

            let removed = grants.sweep_expired();
            if removed > 0 {
                tracing::info!("Cleanup: removed {} expired grants", removed);
            } else {
                tracing::debug!("Cleanup: no expired grants");
            }
        }
    })
}
