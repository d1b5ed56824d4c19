use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use colloquy_core::{
    ColloquyConfig, ConversationMetrics, ConversationTrace, CoordinatorOptions, FileStorage,
    HistoryIndex, HttpGateway, RateTable, SessionCoordinator, Storage, TelemetryStore,
};

/// Everything a command needs, built from the loaded settings.
pub struct CliContext {
    pub config: ColloquyConfig,
    workspace: Option<PathBuf>,
}

impl CliContext {
    pub fn new(config: ColloquyConfig, workspace: Option<PathBuf>) -> Self {
        Self { config, workspace }
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    pub fn storage_root(&self) -> Result<PathBuf> {
        Ok(self.config.storage_root(self.workspace())?)
    }

    fn storage(&self) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(FileStorage::new(self.storage_root()?)))
    }

    pub fn history(&self) -> Result<HistoryIndex> {
        Ok(HistoryIndex::new(self.storage()?))
    }

    pub fn telemetry(&self) -> Result<TelemetryStore> {
        Ok(TelemetryStore::new(self.storage()?))
    }

    /// Coordinator with persisted telemetry already restored, so this run's
    /// writes extend what earlier runs recorded.
    pub async fn coordinator(&self) -> Result<SessionCoordinator> {
        let storage = self.storage()?;
        let options = CoordinatorOptions::from_config(&self.config, self.workspace());

        let mut coordinator =
            SessionCoordinator::new(Arc::new(HttpGateway::new()), HistoryIndex::new(storage.clone()))
                .with_rates(Arc::new(RateTable::default()))
                .with_max_trace_entries(self.config.telemetry.max_trace_entries)
                .with_options(options);

        if self.config.telemetry.persist {
            coordinator = coordinator.with_telemetry(TelemetryStore::new(storage));
            coordinator
                .restore_telemetry()
                .await
                .context("Failed to load persisted telemetry")?;
        }

        Ok(coordinator)
    }

    pub async fn load_metrics(&self) -> Result<Vec<ConversationMetrics>> {
        Ok(self.telemetry()?.load_metrics().await?)
    }

    pub async fn load_traces(&self) -> Result<Vec<ConversationTrace>> {
        Ok(self.telemetry()?.load_traces().await?)
    }
}
