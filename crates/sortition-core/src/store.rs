//! Portfolio persistence.
//!
//! The store owns the only cross-request mutable state in the engine: the
//! generated → sampled transition. Implementations must perform the draw and
//! the write under one exclusive section so two callers can never both
//! record a draw for the same sortition.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::portfolio::{PanelPortfolio, PortfolioError};
use crate::types::SortitionId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("No panel portfolio stored for sortition {0}")]
    NotFound(SortitionId),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error("Portfolio store failure: {0}")]
    Backend(String),
}

/// Persistence for panel portfolios, keyed by sortition.
pub trait PortfolioStore: Send + Sync {
    fn load(&self, sortition_id: SortitionId) -> Result<Option<PanelPortfolio>, StoreError>;

    /// Store `portfolio` unless one already exists for its sortition.
    ///
    /// Returns whichever portfolio is stored afterwards.
    fn insert_if_absent(&self, portfolio: PanelPortfolio) -> Result<PanelPortfolio, StoreError>;

    /// Atomically draw and record the panel of a stored portfolio.
    ///
    /// A portfolio that is already sampled yields
    /// `StoreError::Portfolio(PortfolioError::AlreadySampled)`.
    fn sample(
        &self,
        sortition_id: SortitionId,
        seed: Option<&str>,
    ) -> Result<PanelPortfolio, StoreError>;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryPortfolioStore {
    portfolios: RwLock<HashMap<SortitionId, PanelPortfolio>>,
}

impl InMemoryPortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.portfolios.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.portfolios.read().is_empty()
    }
}

impl PortfolioStore for InMemoryPortfolioStore {
    fn load(&self, sortition_id: SortitionId) -> Result<Option<PanelPortfolio>, StoreError> {
        Ok(self.portfolios.read().get(&sortition_id).cloned())
    }

    fn insert_if_absent(&self, portfolio: PanelPortfolio) -> Result<PanelPortfolio, StoreError> {
        let mut portfolios = self.portfolios.write();
        let stored = portfolios
            .entry(portfolio.sortition_id())
            .or_insert(portfolio);
        Ok(stored.clone())
    }

    fn sample(
        &self,
        sortition_id: SortitionId,
        seed: Option<&str>,
    ) -> Result<PanelPortfolio, StoreError> {
        let mut portfolios = self.portfolios.write();
        let portfolio = portfolios
            .get_mut(&sortition_id)
            .ok_or(StoreError::NotFound(sortition_id))?;

        portfolio.sample(seed)?;
        Ok(portfolio.clone())
    }
}
