//! LEXIMIN building blocks.
//!
//! A selection run builds a [`Snapshot`], gates it through the
//! [`FeasibilityChecker`], then alternates the [`PanelGenerator`] (pricing
//! ILP) and the [`DistributionSolver`] (master LP). The [`PanelSampler`]
//! draws the final panel from the resulting distribution.

mod constraint_builder;
mod distribution;
mod feasibility;
mod generator;
mod sampler;

pub use constraint_builder::{CategoryInfo, ConstraintBuilder, Snapshot, StratumInfo};
pub use distribution::{selection_probabilities, Distribution, DistributionSolver, EPSILON};
pub use feasibility::{FeasibilityChecker, FeasibilityReport};
pub use generator::PanelGenerator;
pub use sampler::{derive_random_seed, PanelSampler, SampleDraw, SamplingError};
