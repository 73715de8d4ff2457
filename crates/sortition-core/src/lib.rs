//! # sortition-core
//!
//! Fair panel selection for stratified sortition.
//!
//! Given a pool of volunteers, a set of strata with per-category quotas and
//! a panel size, this crate answers:
//! - Which panels satisfy every quota?
//! - With what probability should each panel be drawn so that the least
//!   likely volunteer is as likely as possible (LEXIMIN)?
//! - Which panel was drawn, and can anyone reproduce that draw?
//!
//! ## Key Guarantees
//!
//! 1. **Quota-safe**: every generated panel has exactly `k` members and
//!    respects every category's maximum
//! 2. **Reproducible**: a seeded draw is a pure function of the seed and the
//!    portfolio
//! 3. **Write-once**: a portfolio is sampled at most once
//! 4. **Backend-agnostic**: optimization goes through the [`Solver`] trait
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sortition_core::{
//!     FairSortitionService, InMemoryPortfolioStore, SelectionConfig, SortitionDefinition,
//! };
//!
//! let definition = SortitionDefinition::from_file("assembly.yaml")?;
//! let service = FairSortitionService::new(
//!     Arc::new(definition),
//!     Arc::new(InMemoryPortfolioStore::new()),
//!     SelectionConfig::default(),
//! );
//!
//! let portfolio = service.generate_portfolio()?;
//! println!("{} candidate panels", portfolio.num_panels());
//!
//! let outcome = service.sample_from_portfolio(Some("public-seed-2026"))?;
//! assert!(service.verify(&outcome.selected_participant_ids, "public-seed-2026")?);
//! ```

pub mod config;
pub mod definition;
pub mod guard;
pub mod leximin;
pub mod portfolio;
pub mod selector;
pub mod service;
pub mod solver;
pub mod source;
pub mod store;
pub mod types;

// Re-export main types at crate root
pub use config::{ConfigError, CoveragePolicy, SelectionConfig, CONVERGENCE_THRESHOLD, MAX_ITERATIONS};
pub use definition::{validate_definition_schema, DefinitionError, SortitionDefinition};
pub use guard::GenerationGuard;
pub use leximin::{
    derive_random_seed, selection_probabilities, ConstraintBuilder, Distribution,
    DistributionSolver, FeasibilityChecker, FeasibilityReport, PanelGenerator, PanelSampler,
    SampleDraw, SamplingError, Snapshot,
};
pub use portfolio::{AuditLog, FairnessMetrics, PanelPortfolio, PortfolioError};
pub use selector::{LeximinSelector, Selection, SelectionError};
pub use service::{
    sample_stored, verify_stored, FairSortitionService, ServiceError, SortitionOutcome,
};
pub use solver::{solver_for, BackendKind, LinearProgram, SolveOutcome, Solver, SolverError};
pub use source::{SortitionSource, SourceError};
pub use store::{InMemoryPortfolioStore, PortfolioStore, StoreError};
pub use types::{
    Category, CategoryId, Panel, Quota, SortitionId, Stratum, StratumId, Volunteer, VolunteerId,
};

/// Check a sortition for feasibility without optimizing.
///
/// Convenience for callers that only need the report, such as a
/// configuration screen or a dry run.
pub fn check_feasibility(
    source: &dyn SortitionSource,
    coverage_policy: CoveragePolicy,
) -> Result<FeasibilityReport, SourceError> {
    let snapshot = ConstraintBuilder::build(source)?;
    Ok(FeasibilityChecker::new(&snapshot)
        .with_coverage_policy(coverage_policy)
        .check())
}
