//! Declarative-config capture: a fire-and-forget sink for the objects one reconciliation mutated.
//!
//! Callers never await or inspect the outcome. `spawn_capture` detaches the delivery onto the
//! runtime and only logs failures.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, warn};

/// Objects touched by one reconciliation, serialized.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBatch {
    pub cluster: String,
    pub namespace: String,
    pub app: String,
    pub objects: Vec<serde_json::Value>,
}

#[async_trait]
pub trait ConfigCapture: Send + Sync + 'static {
    async fn capture(&self, batch: CaptureBatch) -> anyhow::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCapture;

#[async_trait]
impl ConfigCapture for NoopCapture {
    async fn capture(&self, _batch: CaptureBatch) -> anyhow::Result<()> { Ok(()) }
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct RecordingCapture {
    batches: Mutex<Vec<CaptureBatch>>,
}

impl RecordingCapture {
    pub fn batches(&self) -> Vec<CaptureBatch> { self.batches.lock().map(|b| b.clone()).unwrap_or_default() }
}

#[async_trait]
impl ConfigCapture for RecordingCapture {
    async fn capture(&self, batch: CaptureBatch) -> anyhow::Result<()> {
        self.batches.lock().map_err(|_| anyhow::anyhow!("capture log poisoned"))?.push(batch);
        Ok(())
    }
}

/// Detach delivery of `batch`. Nothing is returned to the caller.
pub fn spawn_capture(sink: Arc<dyn ConfigCapture>, batch: CaptureBatch) {
    tokio::spawn(async move {
        let app = batch.app.clone();
        let count = batch.objects.len();
        match sink.capture(batch).await {
            Ok(()) => debug!(app=%app, objects=count, "capture.delivered"),
            Err(e) => warn!(app=%app, objects=count, error=%e, "capture.failed"),
        }
    });
}
