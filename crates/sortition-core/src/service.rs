//! Fair sortition façade.
//!
//! Single-phase: [`FairSortitionService::call`] generates (or reuses) the
//! portfolio and draws immediately.
//!
//! Two-phase: [`FairSortitionService::generate_portfolio`] first, publish the
//! panels, then [`FairSortitionService::sample_from_portfolio`] at the public
//! draw with a verification seed anyone can later feed to
//! [`FairSortitionService::verify`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SelectionConfig;
use crate::guard::GenerationGuard;
use crate::leximin::SampleDraw;
use crate::portfolio::{AuditLog, PanelPortfolio, PortfolioError};
use crate::selector::{LeximinSelector, SelectionError};
use crate::solver::Solver;
use crate::source::SortitionSource;
use crate::store::{PortfolioStore, StoreError};
use crate::types::{SortitionId, VolunteerId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    #[error("The sortition has already been performed")]
    AlreadyPerformed,

    #[error("There is no panel portfolio. Generate one first")]
    NoPortfolio,

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Portfolio(#[from] PortfolioError),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Portfolio(inner) => ServiceError::Portfolio(inner),
            other => ServiceError::Store(other),
        }
    }
}

/// Outcome of a completed draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortitionOutcome {
    pub selected_participant_ids: Vec<VolunteerId>,
    pub selection_probabilities: BTreeMap<VolunteerId, f64>,
    pub draw: SampleDraw,
    pub selection_log: AuditLog,
}

impl SortitionOutcome {
    /// Outcome recorded in a sampled portfolio.
    pub fn from_portfolio(portfolio: &PanelPortfolio) -> Result<Self, ServiceError> {
        let (Some(selected_index), Some(selected_panel), Some(random_value)) = (
            portfolio.selected_panel_index(),
            portfolio.selected_panel(),
            portfolio.random_value_used(),
        ) else {
            return Err(PortfolioError::Validation(
                "portfolio has no recorded draw".to_string(),
            )
            .into());
        };

        Ok(Self {
            selected_participant_ids: portfolio.selected_participant_ids(),
            selection_probabilities: portfolio.selection_probabilities().clone(),
            draw: SampleDraw {
                selected_index,
                selected_panel: selected_panel.clone(),
                random_value,
            },
            selection_log: portfolio.audit_log(),
        })
    }
}

/// Orchestrates portfolio generation and the draw for one sortition.
pub struct FairSortitionService {
    source: Arc<dyn SortitionSource>,
    store: Arc<dyn PortfolioStore>,
    selector: LeximinSelector,
    guard: Option<Arc<GenerationGuard>>,
}

impl FairSortitionService {
    pub fn new(
        source: Arc<dyn SortitionSource>,
        store: Arc<dyn PortfolioStore>,
        config: SelectionConfig,
    ) -> Self {
        Self {
            source,
            store,
            selector: LeximinSelector::new(config),
            guard: None,
        }
    }

    /// Use a specific optimization backend.
    pub fn with_solver(mut self, solver: Arc<dyn Solver>) -> Self {
        self.selector = self.selector.with_solver(solver);
        self
    }

    /// Let another party abandon generation.
    ///
    /// A cancelled run stops between column generation rounds and never
    /// stores its portfolio.
    pub fn with_guard(mut self, guard: Arc<GenerationGuard>) -> Self {
        self.selector = self.selector.with_guard(Arc::clone(&guard));
        self.guard = Some(guard);
        self
    }

    pub fn sortition_id(&self) -> SortitionId {
        self.source.sortition_id()
    }

    pub fn existing_portfolio(&self) -> Result<Option<PanelPortfolio>, ServiceError> {
        Ok(self.store.load(self.sortition_id())?)
    }

    pub fn already_performed(&self) -> Result<bool, ServiceError> {
        Ok(self
            .existing_portfolio()?
            .is_some_and(|portfolio| portfolio.sampled()))
    }

    /// Generate and draw in one step.
    pub fn call(&self, seed: Option<&str>) -> Result<SortitionOutcome, ServiceError> {
        if self.already_performed()? {
            return Err(ServiceError::AlreadyPerformed);
        }
        self.generate_portfolio()?;

        match self.store.sample(self.sortition_id(), seed) {
            Ok(portfolio) => SortitionOutcome::from_portfolio(&portfolio),
            Err(StoreError::Portfolio(PortfolioError::AlreadySampled)) => {
                Err(ServiceError::AlreadyPerformed)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Phase one: compute and store the portfolio.
    ///
    /// Returns the stored portfolio untouched if one already exists.
    pub fn generate_portfolio(&self) -> Result<PanelPortfolio, ServiceError> {
        if let Some(existing) = self.existing_portfolio()? {
            tracing::debug!(sortition = self.sortition_id(), "Reusing stored portfolio");
            return Ok(existing);
        }

        let started = Instant::now();
        let selection = self.selector.run(self.source.as_ref())?;
        let portfolio = PanelPortfolio::new(self.sortition_id(), selection, started.elapsed())?;
        if self.guard.as_ref().is_some_and(|guard| !guard.commit()) {
            tracing::info!(sortition = self.sortition_id(), "Generation cancelled, discarding portfolio");
            return Err(SelectionError::Cancelled.into());
        }

        tracing::info!(
            sortition = self.sortition_id(),
            panels = portfolio.num_panels(),
            iterations = portfolio.num_iterations(),
            converged = portfolio.convergence_achieved(),
            seconds = portfolio.generation_time_seconds(),
            "Portfolio generated"
        );

        Ok(self.store.insert_if_absent(portfolio)?)
    }

    /// Phase two: draw from the stored portfolio.
    ///
    /// An already sampled portfolio returns its recorded outcome; no second
    /// draw ever happens.
    pub fn sample_from_portfolio(&self, seed: Option<&str>) -> Result<SortitionOutcome, ServiceError> {
        sample_stored(self.store.as_ref(), self.sortition_id(), seed)
    }

    /// Replay the seeded draw and compare it with `expected_ids` as a set.
    ///
    /// Nothing is written. `false` when there is no sampled portfolio.
    pub fn verify(&self, expected_ids: &[VolunteerId], seed: &str) -> Result<bool, ServiceError> {
        verify_stored(self.store.as_ref(), self.sortition_id(), expected_ids, seed)
    }
}

/// Draw from the portfolio stored for `sortition_id`, or return the draw
/// already recorded there.
pub fn sample_stored(
    store: &dyn PortfolioStore,
    sortition_id: SortitionId,
    seed: Option<&str>,
) -> Result<SortitionOutcome, ServiceError> {
    let portfolio = store.load(sortition_id)?.ok_or(ServiceError::NoPortfolio)?;
    if portfolio.sampled() {
        return SortitionOutcome::from_portfolio(&portfolio);
    }

    match store.sample(sortition_id, seed) {
        Ok(sampled) => SortitionOutcome::from_portfolio(&sampled),
        Err(StoreError::Portfolio(PortfolioError::AlreadySampled)) => {
            let winner = store.load(sortition_id)?.ok_or(ServiceError::NoPortfolio)?;
            SortitionOutcome::from_portfolio(&winner)
        }
        Err(err) => Err(err.into()),
    }
}

/// Check a recorded draw against `expected_ids` by replaying `seed`.
pub fn verify_stored(
    store: &dyn PortfolioStore,
    sortition_id: SortitionId,
    expected_ids: &[VolunteerId],
    seed: &str,
) -> Result<bool, ServiceError> {
    let Some(portfolio) = store.load(sortition_id)? else {
        return Ok(false);
    };
    if !portfolio.sampled() {
        return Ok(false);
    }

    let replay = match portfolio.replay(seed) {
        Ok(draw) => draw,
        Err(err) => {
            tracing::warn!(sortition = sortition_id, error = %err, "Verification replay failed");
            return Ok(false);
        }
    };

    let expected: BTreeSet<VolunteerId> = expected_ids.iter().copied().collect();
    Ok(replay.selected_panel.to_set() == expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::SortitionDefinition;
    use crate::source::SourceError;
    use crate::store::InMemoryPortfolioStore;
    use crate::types::{Category, Stratum, Volunteer};

    fn definition(pool: u64) -> SortitionDefinition {
        SortitionDefinition {
            sortition_id: 11,
            name: "Assembly".to_string(),
            description: None,
            panel_size: 2,
            strata: vec![Stratum::new(
                1,
                "Gender",
                vec![
                    Category::new(10, "Women", Some(50.0)),
                    Category::new(11, "Men", Some(50.0)),
                ],
            )],
            volunteers: (1..=pool).map(|i| Volunteer::new(i, [10 + (i % 2)])).collect(),
        }
    }

    struct Offline;

    impl SortitionSource for Offline {
        fn sortition_id(&self) -> SortitionId {
            12
        }

        fn panel_size(&self) -> usize {
            2
        }

        fn volunteers(&self) -> Result<Vec<Volunteer>, SourceError> {
            Err(SourceError::Volunteers("database offline".to_string()))
        }

        fn strata(&self) -> Result<Vec<Stratum>, SourceError> {
            Ok(vec![])
        }
    }

    fn service(source: Arc<dyn SortitionSource>) -> (FairSortitionService, Arc<InMemoryPortfolioStore>) {
        let store = Arc::new(InMemoryPortfolioStore::new());
        let service = FairSortitionService::new(source, store.clone(), SelectionConfig::default());
        (service, store)
    }

    #[test]
    fn test_sample_without_portfolio() {
        let (service, _) = service(Arc::new(definition(4)));
        assert_eq!(service.sample_from_portfolio(None), Err(ServiceError::NoPortfolio));
        assert!(!service.already_performed().unwrap());
    }

    #[test]
    fn test_verify_without_portfolio_is_false() {
        let (service, _) = service(Arc::new(definition(4)));
        assert!(!service.verify(&[1, 2], "seed").unwrap());
    }

    #[test]
    fn test_source_failure_surfaces() {
        let (service, store) = service(Arc::new(Offline));
        let err = service.generate_portfolio().unwrap_err();
        assert!(matches!(
            err,
            ServiceError::Selection(SelectionError::Source(SourceError::Volunteers(_)))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_infeasible_generation_stores_nothing() {
        let (service, store) = service(Arc::new(SortitionDefinition {
            panel_size: 10,
            ..definition(5)
        }));
        let err = service.call(None).unwrap_err();
        assert!(err.to_string().contains("smaller than the panel size"));
        assert!(store.is_empty());
    }

    #[cfg(feature = "microlp")]
    mod with_backend {
        use super::*;

        #[test]
        fn test_two_phase_flow() {
            let (service, _) = service(Arc::new(definition(6)));

            let portfolio = service.generate_portfolio().unwrap();
            assert!(!portfolio.sampled());
            // idempotent
            assert_eq!(service.generate_portfolio().unwrap(), portfolio);

            let outcome = service.sample_from_portfolio(Some("public-seed")).unwrap();
            assert_eq!(outcome.selected_participant_ids.len(), 2);
            assert!(outcome.selection_log.sampled);
            assert!(service.already_performed().unwrap());

            // a second sampling returns the recorded draw
            let again = service.sample_from_portfolio(Some("other-seed")).unwrap();
            assert_eq!(again, outcome);

            assert!(service
                .verify(&outcome.selected_participant_ids, "public-seed")
                .unwrap());
        }

        #[test]
        fn test_verify_rejects_wrong_ids() {
            let (service, _) = service(Arc::new(definition(6)));
            let outcome = service.call(Some("ceremony")).unwrap();

            let mut reversed = outcome.selected_participant_ids.clone();
            reversed.reverse();
            assert!(service.verify(&reversed, "ceremony").unwrap());

            let wrong: Vec<VolunteerId> = (1..=6)
                .filter(|id| !outcome.selected_participant_ids.contains(id))
                .take(2)
                .collect();
            assert!(!service.verify(&wrong, "ceremony").unwrap());
        }

        #[test]
        fn test_cancelled_generation_stores_nothing() {
            let guard = Arc::new(GenerationGuard::new());
            let (service, store) = service(Arc::new(definition(6)));
            let service = service.with_guard(Arc::clone(&guard));

            assert!(guard.cancel());
            assert_eq!(
                service.generate_portfolio(),
                Err(ServiceError::Selection(SelectionError::Cancelled))
            );
            assert!(store.is_empty());
        }

        #[test]
        fn test_committed_generation_cannot_be_cancelled() {
            let guard = Arc::new(GenerationGuard::new());
            let (service, store) = service(Arc::new(definition(6)));
            let service = service.with_guard(Arc::clone(&guard));

            service.generate_portfolio().unwrap();
            assert!(!guard.cancel());
            assert_eq!(store.len(), 1);
        }

        #[test]
        fn test_call_twice_fails() {
            let (service, _) = service(Arc::new(definition(6)));
            service.call(None).unwrap();
            assert_eq!(service.call(None), Err(ServiceError::AlreadyPerformed));
        }
    }
}
