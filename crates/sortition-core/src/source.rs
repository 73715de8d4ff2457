//! Domain data collaborator.
//!
//! The engine never talks to a database directly. Whatever owns the pool
//! and the strata configuration implements [`SortitionSource`].

use thiserror::Error;

use crate::types::{SortitionId, Stratum, Volunteer};

/// Errors raised while reading domain data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Failed to load volunteers: {0}")]
    Volunteers(String),

    #[error("Failed to load strata: {0}")]
    Strata(String),
}

/// Read access to the data a selection run needs.
pub trait SortitionSource: Send + Sync {
    /// Identifier of the sortition this data belongs to.
    fn sortition_id(&self) -> SortitionId;

    /// Number of seats on the panel (k).
    fn panel_size(&self) -> usize;

    /// All volunteers in the pool with their category memberships.
    fn volunteers(&self) -> Result<Vec<Volunteer>, SourceError>;

    /// All strata with their categories, in display order.
    fn strata(&self) -> Result<Vec<Stratum>, SourceError>;
}
