//! Idle stream and stale task sweep job.

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::scheduler::{Job, JobFrequency};
use crate::services::batch::TaskRegistry;
use crate::services::scrcpy::ConnectionRegistry;

/// Proxy sessions idle for longer than this are closed.
const MAX_IDLE: Duration = Duration::from_secs(30 * 60);

/// Closes idle proxy sessions and drops finished batch tasks past their
/// retention bound.
pub struct StreamIdleSweepJob {
    connections: Arc<ConnectionRegistry>,
    tasks: Arc<TaskRegistry>,
}

impl StreamIdleSweepJob {
    pub fn new(connections: Arc<ConnectionRegistry>, tasks: Arc<TaskRegistry>) -> Self {
        Self { connections, tasks }
    }
}

#[async_trait::async_trait]
impl Job for StreamIdleSweepJob {
    fn name(&self) -> &'static str {
        "stream_idle_sweep"
    }

    fn frequency(&self) -> JobFrequency {
        JobFrequency::Minutes(1)
    }

    async fn execute(&self) -> Result<(), String> {
        let closed = self.connections.close_idle(MAX_IDLE).await;
        let evicted = self.tasks.evict_finished().await;
        if closed > 0 || evicted > 0 {
            info!(closed, evicted, "idle sweep finished");
        }
        Ok(())
    }
}
