//! Screenshot cache eviction job.

use std::sync::Arc;
use tracing::debug;

use super::scheduler::{Job, JobFrequency};
use crate::services::screenshot::ScreenshotService;

/// Evicts expired screenshot cache entries every 30 seconds.
pub struct ScreenshotCacheSweepJob {
    service: Arc<ScreenshotService>,
}

impl ScreenshotCacheSweepJob {
    pub fn new(service: Arc<ScreenshotService>) -> Self {
        Self { service }
    }
}

#[async_trait::async_trait]
impl Job for ScreenshotCacheSweepJob {
    fn name(&self) -> &'static str {
        "screenshot_cache_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Seconds(30)
    }

    async fn execute(&self) -> Result<(), String> {
        let evicted = self.service.sweep_expired().await;
        if evicted > 0 {
            debug!(evicted, "screenshot cache entries evicted");
        }
        Ok(())
    }
}
