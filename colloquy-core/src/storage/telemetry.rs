use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::Storage;
use crate::error::ColloquyResult;
use crate::models::{ConversationMetrics, ConversationTrace};

pub const METRICS_FILE: &str = "metrics.json";
pub const TRACES_FILE: &str = "traces.json";

/// Telemetry state captured for one write.
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub metrics: Vec<ConversationMetrics>,
    pub traces: Vec<ConversationTrace>,
}

/// Persists metrics and ended traces as two JSON documents.
///
/// Clones share one write lock, so snapshots are written one at a time.
#[derive(Clone)]
pub struct TelemetryStore {
    storage: Arc<dyn Storage>,
    write_lock: Arc<Mutex<()>>,
}

impl TelemetryStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn location(&self) -> String {
        self.storage.location()
    }

    pub async fn write(&self, snapshot: &TelemetrySnapshot) -> ColloquyResult<()> {
        let _guard = self.write_lock.lock().await;
        self.write_json(METRICS_FILE, &snapshot.metrics).await?;
        self.write_json(TRACES_FILE, &snapshot.traces).await?;
        debug!(
            metrics = snapshot.metrics.len(),
            traces = snapshot.traces.len(),
            "Telemetry persisted"
        );
        Ok(())
    }

    pub async fn load_metrics(&self) -> ColloquyResult<Vec<ConversationMetrics>> {
        self.read_json(METRICS_FILE).await
    }

    pub async fn load_traces(&self) -> ColloquyResult<Vec<ConversationTrace>> {
        self.read_json(TRACES_FILE).await
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> ColloquyResult<()> {
        let data = serde_json::to_vec_pretty(value)?;
        self.storage.write(key, &data).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> ColloquyResult<Vec<T>> {
        let Some(data) = self.storage.read(key).await? else {
            return Ok(Vec::new());
        };

        match serde_json::from_slice(&data) {
            Ok(values) => Ok(values),
            Err(e) => {
                warn!(file = %key, error = %e, "Ignoring unreadable telemetry file");
                Ok(Vec::new())
            }
        }
    }
}
