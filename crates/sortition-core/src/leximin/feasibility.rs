//! Feasibility gate run before any optimization.
//!
//! Every check runs and every problem is reported; infeasibility is a
//! normal outcome, never an error value.

use serde::{Deserialize, Serialize};

use super::Snapshot;
use crate::config::CoveragePolicy;

/// Tolerance on per-stratum percentage sums.
const PERCENTAGE_TOLERANCE: f64 = 0.01;

/// Outcome of a feasibility check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FeasibilityReport {
    pub feasible: bool,

    /// Problems that make a panel impossible or the configuration invalid
    pub errors: Vec<String>,

    /// Problems worth showing an operator that do not block the run
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl FeasibilityReport {
    /// All errors joined into a single message.
    pub fn joined_errors(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validates a [`Snapshot`] before expensive optimization.
pub struct FeasibilityChecker<'a> {
    snapshot: &'a Snapshot,
    coverage_policy: CoveragePolicy,
}

impl<'a> FeasibilityChecker<'a> {
    pub fn new(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot,
            coverage_policy: CoveragePolicy::default(),
        }
    }

    pub fn with_coverage_policy(mut self, policy: CoveragePolicy) -> Self {
        self.coverage_policy = policy;
        self
    }

    /// Run all checks.
    pub fn check(&self) -> FeasibilityReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        errors.extend(self.check_basic_requirements());
        errors.extend(self.check_pool_size());
        errors.extend(self.check_quota_consistency());
        errors.extend(self.check_category_minimums());

        if let Some(message) = self.check_coverage() {
            match self.coverage_policy {
                CoveragePolicy::Warn => warnings.push(message),
                CoveragePolicy::Reject => errors.push(message),
            }
        }

        let report = FeasibilityReport {
            feasible: errors.is_empty(),
            errors,
            warnings,
        };

        if report.feasible {
            tracing::debug!(
                sortition = self.snapshot.sortition_id(),
                warnings = report.warnings.len(),
                "Feasibility check passed"
            );
        } else {
            tracing::info!(
                sortition = self.snapshot.sortition_id(),
                errors = %report.joined_errors(),
                "Feasibility check failed"
            );
        }

        report
    }

    fn check_basic_requirements(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.snapshot.panel_size() == 0 {
            errors.push("The panel size must be a positive number".to_string());
        }

        if self.snapshot.category_ids().is_empty() {
            errors.push(
                "No categories are defined. Configure strata and their categories before running the selection"
                    .to_string(),
            );
        }

        errors
    }

    fn check_pool_size(&self) -> Vec<String> {
        let n = self.snapshot.num_volunteers();
        let k = self.snapshot.panel_size();

        if n == 0 {
            vec!["The volunteer pool is empty. Import participants before running the selection".to_string()]
        } else if n < k {
            vec![format!(
                "The volunteer pool ({}) is smaller than the panel size ({}). \
                 Add more participants or reduce the number of seats",
                n, k
            )]
        } else {
            vec![]
        }
    }

    fn check_quota_consistency(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let k = self.snapshot.panel_size();
        if k == 0 {
            return errors;
        }

        for stratum in self.snapshot.strata() {
            if stratum.categories.is_empty() {
                continue;
            }

            let total_max: usize = stratum.categories.iter().map(|c| c.max_quota).sum();
            if total_max < k {
                errors.push(format!(
                    "Stratum '{}' has insufficient maximum quotas: \
                     the sum of maximum quotas ({}) is less than the panel size ({})",
                    stratum.name, total_max, k
                ));
            }

            let total_percentage: f64 = stratum.categories.iter().map(|c| c.percentage).sum();
            if total_percentage > 100.0 + PERCENTAGE_TOLERANCE {
                errors.push(format!(
                    "Stratum '{}' has percentages adding up to more than 100% ({:.1}%)",
                    stratum.name, total_percentage
                ));
            }
        }

        errors
    }

    fn check_category_minimums(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for stratum in self.snapshot.strata() {
            for category in &stratum.categories {
                let min_quota = self
                    .snapshot
                    .quota(category.id)
                    .map(|q| q.min)
                    .unwrap_or(0);
                if min_quota == 0 {
                    continue;
                }

                let available = self.snapshot.members_of(category.id).count();
                if available < min_quota {
                    errors.push(format!(
                        "Category '{}' of stratum '{}' requires at least {} volunteers but only {} are available",
                        category.name, stratum.name, min_quota, available
                    ));
                }
            }
        }

        errors
    }

    fn check_coverage(&self) -> Option<String> {
        if self.snapshot.strata().is_empty() {
            return None;
        }

        let uncovered = self
            .snapshot
            .volunteer_categories()
            .values()
            .filter(|categories| categories.is_empty())
            .count();

        if uncovered == 0 {
            None
        } else {
            Some(format!(
                "{} volunteer(s) have no category assigned in any stratum. \
                 They can only fill seats no quota restricts",
                uncovered
            ))
        }
    }
}
