//! Shared domain types for the selection engine.
//!
//! Volunteers and categories are opaque integer identifiers. The engine
//! attaches no meaning to them beyond identity and membership.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a pool candidate.
pub type VolunteerId = u64;

/// Identifier of a category (substratum).
pub type CategoryId = u64;

/// Identifier of a stratum.
pub type StratumId = u64;

/// Identifier of a sortition run (the owner of a portfolio).
pub type SortitionId = u64;

/// A volunteer in the pool together with the categories they belong to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volunteer {
    pub id: VolunteerId,

    /// Expected (not enforced) to hold exactly one category per stratum
    #[serde(default)]
    pub categories: Vec<CategoryId>,
}

impl Volunteer {
    pub fn new(id: VolunteerId, categories: impl IntoIterator<Item = CategoryId>) -> Self {
        Self {
            id,
            categories: categories.into_iter().collect(),
        }
    }
}

/// A quota-bearing group inside a stratum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Category {
    pub id: CategoryId,

    pub name: String,

    /// Maximum share of the panel, in percent. Unset or zero means unrestricted.
    #[serde(default)]
    pub max_quota_percentage: Option<f64>,
}

impl Category {
    pub fn new(id: CategoryId, name: impl Into<String>, max_quota_percentage: Option<f64>) -> Self {
        Self {
            id,
            name: name.into(),
            max_quota_percentage,
        }
    }

    /// Percentage as configured, treating unset as zero.
    pub fn percentage(&self) -> f64 {
        self.max_quota_percentage.unwrap_or(0.0)
    }

    /// Maximum number of panel seats this category may take for a panel of size `k`.
    ///
    /// `ceil(percentage / 100 * k)`, or `k` when the percentage is unset or zero.
    pub fn max_quota(&self, panel_size: usize) -> usize {
        let percentage = self.percentage();
        if percentage > 0.0 {
            (percentage / 100.0 * panel_size as f64).ceil() as usize
        } else {
            panel_size
        }
    }
}

/// A partition dimension of the pool (e.g. gender, age band).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stratum {
    pub id: StratumId,

    pub name: String,

    #[serde(default)]
    pub categories: Vec<Category>,
}

impl Stratum {
    pub fn new(id: StratumId, name: impl Into<String>, categories: Vec<Category>) -> Self {
        Self {
            id,
            name: name.into(),
            categories,
        }
    }
}

/// Allowed seat range for a category within a panel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Quota {
    pub min: usize,
    pub max: usize,
}

impl Quota {
    pub fn contains(&self, count: usize) -> bool {
        self.min <= count && count <= self.max
    }
}

/// A candidate selection of volunteers.
///
/// Membership is kept sorted so two panels with the same members compare
/// equal regardless of the order they were produced in.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(from = "Vec<VolunteerId>", into = "Vec<VolunteerId>")]
pub struct Panel(Vec<VolunteerId>);

impl Panel {
    pub fn new(members: impl IntoIterator<Item = VolunteerId>) -> Self {
        let set: BTreeSet<VolunteerId> = members.into_iter().collect();
        Self(set.into_iter().collect())
    }

    pub fn members(&self) -> &[VolunteerId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: VolunteerId) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn to_set(&self) -> BTreeSet<VolunteerId> {
        self.0.iter().copied().collect()
    }
}

impl From<Vec<VolunteerId>> for Panel {
    fn from(members: Vec<VolunteerId>) -> Self {
        Self::new(members)
    }
}

impl From<Panel> for Vec<VolunteerId> {
    fn from(panel: Panel) -> Self {
        panel.0
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<String> = self.0.iter().map(|id| id.to_string()).collect();
        write!(f, "[{}]", ids.join(", "))
    }
}
