//! Concurrent portfolio generation.
//!
//! Each sortition is independent: generations run on tokio's blocking pool,
//! bounded by a semaphore, and share one [`PortfolioStore`]. The store's
//! write-once sampling keeps concurrent draws for the same sortition safe.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

use sortition_core::{
    sample_stored, verify_stored, ConfigError, FairSortitionService, GenerationGuard,
    InMemoryPortfolioStore, PanelPortfolio, PortfolioStore, ServiceError, Solver, SortitionId,
    SortitionOutcome, SortitionSource, VolunteerId,
};

use crate::config::RuntimeConfig;

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Portfolio generation timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("Generation task failed: {0}")]
    Join(String),

    #[error("Runtime is shutting down")]
    Closed,

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runs sortitions against a shared portfolio store.
pub struct SortitionRuntime {
    config: RuntimeConfig,
    store: Arc<dyn PortfolioStore>,
    permits: Arc<Semaphore>,
    solver: Option<Arc<dyn Solver>>,
}

impl SortitionRuntime {
    /// Runtime with an in-memory store.
    pub fn new(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        SortitionRuntimeBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn PortfolioStore> {
        Arc::clone(&self.store)
    }

    /// Generate (or reuse) the portfolio for `source`.
    ///
    /// Waits for a free slot first; the timeout covers the computation only.
    /// A run that times out is cancelled and stores nothing, unless it was
    /// already storing its portfolio, in which case that result is returned.
    pub async fn generate(
        &self,
        source: Arc<dyn SortitionSource>,
    ) -> Result<PanelPortfolio, RuntimeError> {
        let sortition_id = source.sortition_id();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| RuntimeError::Closed)?;

        let guard = Arc::new(GenerationGuard::new());
        let mut service = FairSortitionService::new(
            source,
            Arc::clone(&self.store),
            self.config.selection_config(),
        )
        .with_guard(Arc::clone(&guard));
        if let Some(solver) = &self.solver {
            service = service.with_solver(Arc::clone(solver));
        }

        tracing::info!(sortition = sortition_id, "Starting portfolio generation");
        let mut task = tokio::task::spawn_blocking(move || {
            // held until the computation ends, even after a timeout
            let _permit = permit;
            service.generate_portfolio()
        });

        let timeout = self.config.generation_timeout;
        let joined = match tokio::time::timeout(timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if guard.cancel() => {
                tracing::warn!(sortition = sortition_id, timeout = ?timeout, "Portfolio generation timed out");
                return Err(RuntimeError::Timeout(timeout));
            }
            Err(_) => {
                tracing::debug!(sortition = sortition_id, "Deadline hit while storing, awaiting result");
                task.await
            }
        };

        match joined {
            Ok(Ok(portfolio)) => Ok(portfolio),
            Ok(Err(e)) => {
                tracing::warn!(sortition = sortition_id, error = %e, "Portfolio generation failed");
                Err(e.into())
            }
            Err(join) => Err(RuntimeError::Join(join.to_string())),
        }
    }

    /// Draw from a stored portfolio, or return the recorded draw.
    pub fn sample(
        &self,
        sortition_id: SortitionId,
        seed: Option<&str>,
    ) -> Result<SortitionOutcome, RuntimeError> {
        Ok(sample_stored(self.store.as_ref(), sortition_id, seed)?)
    }

    /// Replay a seeded draw and compare it with `expected_ids`.
    pub fn verify(
        &self,
        sortition_id: SortitionId,
        expected_ids: &[VolunteerId],
        seed: &str,
    ) -> Result<bool, RuntimeError> {
        Ok(verify_stored(
            self.store.as_ref(),
            sortition_id,
            expected_ids,
            seed,
        )?)
    }

    pub fn portfolio(&self, sortition_id: SortitionId) -> Result<Option<PanelPortfolio>, RuntimeError> {
        self.store
            .load(sortition_id)
            .map_err(|e| RuntimeError::Service(e.into()))
    }
}

/// Builder for [`SortitionRuntime`].
pub struct SortitionRuntimeBuilder {
    config: RuntimeConfig,
    store: Option<Arc<dyn PortfolioStore>>,
    solver: Option<Arc<dyn Solver>>,
}

impl SortitionRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config: RuntimeConfig::default(),
            store: None,
            solver: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a store with other runtimes or services.
    pub fn store(mut self, store: Arc<dyn PortfolioStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the configured backend.
    pub fn solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.solver = Some(solver);
        self
    }

    pub fn build(self) -> Result<SortitionRuntime, RuntimeError> {
        self.config.validate()?;

        Ok(SortitionRuntime {
            permits: Arc::new(Semaphore::new(self.config.max_concurrent_runs)),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(InMemoryPortfolioStore::new())),
            solver: self.solver,
            config: self.config,
        })
    }
}

impl Default for SortitionRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
