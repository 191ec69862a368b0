//! Pipeline orchestrator - runs extract, load and reconcile in sequence.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{validation, Config};
use crate::core::{ObjectStore, SourceStore, StagedArtifact, TargetStore};
use crate::drivers::{PostgresSource, PostgresTarget};
use crate::error::Result;
use crate::extract::Extractor;
use crate::load::{JsonlRejectLog, LoadResult, Loader, MemoryRejectLog, RejectSink};
use crate::reconcile::{reconcile, MigrationReport};
use crate::storage::{FsObjectStore, Locator};

/// Result of probing one external service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub ok: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProbeResult {
    async fn measure<F>(probe: F) -> Self
    where
        F: Future<Output = Result<()>>,
    {
        let started = Instant::now();
        let outcome = probe.await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => Self {
                ok: true,
                latency_ms,
                error: None,
            },
            Err(e) => Self {
                ok: false,
                latency_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Connectivity of source, target and staging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source: ProbeResult,
    pub target: ProbeResult,
    pub staging: ProbeResult,
    pub healthy: bool,
}

impl HealthCheckResult {
    fn new(source: ProbeResult, target: ProbeResult, staging: ProbeResult) -> Self {
        let healthy = source.ok && target.ok && staging.ok;
        Self {
            source,
            target,
            staging,
            healthy,
        }
    }
}

/// Migration pipeline over explicit store handles.
pub struct Pipeline {
    config: Config,
    source: Arc<dyn SourceStore>,
    target: Arc<dyn TargetStore>,
    store: Arc<dyn ObjectStore>,
}

impl Pipeline {
    /// Create a pipeline from already-built stores.
    pub fn new(
        config: Config,
        source: Arc<dyn SourceStore>,
        target: Arc<dyn TargetStore>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            source,
            target,
            store,
        }
    }

    /// Connect the configured PostgreSQL stores and filesystem bucket.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = connect_source(&config).await?;
        let target = connect_target(&config).await?;
        let store = open_staging(&config);
        Ok(Self::new(config, source, target, store))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run the extraction stage alone.
    pub async fn extract(&self, cancel: &CancellationToken) -> Result<StagedArtifact> {
        validation::require_extract(&self.config)?;
        Extractor::new(self.source.as_ref(), self.store.as_ref())
            .extract(&self.config.extract_request(), cancel)
            .await
    }

    /// Run the load stage alone for the given locator.
    pub async fn load(&self, locator: Locator, cancel: &CancellationToken) -> Result<LoadResult> {
        validation::require_load(&self.config)?;
        let mut sink = open_reject_sink(&self.config)?;
        Loader::new(self.store.as_ref(), self.target.as_ref())
            .load(&self.config.load_request(locator), sink.as_mut(), cancel)
            .await
    }

    /// Extract, load and reconcile.
    ///
    /// Only the shards written by this run's extraction are loaded, so
    /// artifacts left under the same destination by earlier runs are never
    /// picked up.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<MigrationReport> {
        validation::require_extract(&self.config)?;
        validation::require_load(&self.config)?;

        let run_id = Uuid::new_v4();
        info!("Starting migration run: {}", run_id);

        info!("Phase 1: Extracting from source");
        let artifact = self.extract(cancel).await?;

        info!("Phase 2: Loading {} shard(s)", artifact.shards.len());
        let table = &self.config.target.table;
        let pre_count = self.target.row_count(table).await?;
        let load = self
            .load(Locator::Shards(artifact.shard_names()), cancel)
            .await?;

        let expected = if self.config.target.truncate_before_load {
            load.committed_count
        } else {
            pre_count + load.committed_count
        };
        let post_count = self.target.row_count(table).await?;
        if post_count != expected {
            warn!(
                "{}: target holds {} rows, expected {} after load",
                table, post_count, expected
            );
        }

        info!("Phase 3: Reconciling");
        let report = reconcile(artifact.source_count, &load, artifact.elapsed);
        info!(
            "Migration {} {}: {} of {} records committed, {} rejected",
            run_id, report.status, report.target_count, report.source_count, report.rejected_count
        );
        Ok(report)
    }

    /// Probe source, target and staging.
    pub async fn health_check(&self) -> HealthCheckResult {
        let source = ProbeResult::measure(self.source.ping()).await;
        let target = ProbeResult::measure(self.target.ping()).await;
        let staging = ProbeResult::measure(probe_staging(self.store.as_ref(), &self.config)).await;
        HealthCheckResult::new(source, target, staging)
    }
}

/// The configured reject log, or an in-memory one when none is set.
pub fn open_reject_sink(config: &Config) -> Result<Box<dyn RejectSink>> {
    Ok(match &config.migration.reject_log {
        Some(path) => {
            info!("Writing rejected records to {}", path.display());
            Box::new(JsonlRejectLog::create(path)?)
        }
        None => Box::new(MemoryRejectLog::new()),
    })
}

/// Connect to the configured source.
pub async fn connect_source(config: &Config) -> Result<Arc<dyn SourceStore>> {
    let source =
        PostgresSource::connect(&config.source.url, config.migration.max_connections).await?;
    Ok(Arc::new(source))
}

/// Connect to the configured target.
pub async fn connect_target(config: &Config) -> Result<Arc<dyn TargetStore>> {
    let target =
        PostgresTarget::connect(&config.target.url, config.migration.max_connections).await?;
    Ok(Arc::new(target))
}

/// Open the configured bucket directory.
pub fn open_staging(config: &Config) -> Arc<dyn ObjectStore> {
    Arc::new(FsObjectStore::new(
        config.staging.bucket.clone(),
        config.staging.grant_or_ephemeral(),
    ))
}

async fn probe_staging(store: &dyn ObjectStore, config: &Config) -> Result<()> {
    store.list(&config.staging.destination).await.map(|_| ())
}

/// Probe each configured service, reporting connection failures instead of
/// returning them.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let source = ProbeResult::measure(async {
        connect_source(config).await?.ping().await
    })
    .await;
    let target = ProbeResult::measure(async {
        connect_target(config).await?.ping().await
    })
    .await;
    let store = open_staging(config);
    let staging = ProbeResult::measure(probe_staging(store.as_ref(), config)).await;
    HealthCheckResult::new(source, target, staging)
}
