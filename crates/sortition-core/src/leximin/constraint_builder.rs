//! Immutable optimization snapshot of a sortition.
//!
//! [`ConstraintBuilder::build`] reads the pool and strata once and produces a
//! [`Snapshot`] owned by a single selection run. Nothing mutates it afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::source::{SortitionSource, SourceError};
use crate::types::{CategoryId, Quota, SortitionId, StratumId, VolunteerId};

/// Per-category view kept for feasibility reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryInfo {
    pub id: CategoryId,
    pub name: String,
    pub percentage: f64,
    pub max_quota: usize,
}

/// Per-stratum view kept for feasibility reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct StratumInfo {
    pub id: StratumId,
    pub name: String,
    pub categories: Vec<CategoryInfo>,
}

/// Everything the optimizer needs, extracted from domain data.
#[derive(Debug, Clone)]
pub struct Snapshot {
    sortition_id: SortitionId,
    panel_size: usize,
    volunteer_ids: Vec<VolunteerId>,
    category_ids: Vec<CategoryId>,
    quotas: BTreeMap<CategoryId, Quota>,
    volunteer_categories: BTreeMap<VolunteerId, BTreeSet<CategoryId>>,
    category_volunteers: BTreeMap<CategoryId, BTreeSet<VolunteerId>>,
    strata: Vec<StratumInfo>,
    volunteer_index: HashMap<VolunteerId, usize>,
}

impl Snapshot {
    pub fn sortition_id(&self) -> SortitionId {
        self.sortition_id
    }

    /// Panel size (k).
    pub fn panel_size(&self) -> usize {
        self.panel_size
    }

    /// Pool in source order, without duplicates.
    pub fn volunteer_ids(&self) -> &[VolunteerId] {
        &self.volunteer_ids
    }

    pub fn num_volunteers(&self) -> usize {
        self.volunteer_ids.len()
    }

    /// Category ids in stratum order.
    pub fn category_ids(&self) -> &[CategoryId] {
        &self.category_ids
    }

    pub fn quotas(&self) -> &BTreeMap<CategoryId, Quota> {
        &self.quotas
    }

    pub fn quota(&self, category: CategoryId) -> Option<Quota> {
        self.quotas.get(&category).copied()
    }

    /// Categories of every volunteer; volunteers without any membership map to an empty set.
    pub fn volunteer_categories(&self) -> &BTreeMap<VolunteerId, BTreeSet<CategoryId>> {
        &self.volunteer_categories
    }

    pub fn category_volunteers(&self) -> &BTreeMap<CategoryId, BTreeSet<VolunteerId>> {
        &self.category_volunteers
    }

    /// Members of a category (empty when nobody belongs to it).
    pub fn members_of(&self, category: CategoryId) -> impl Iterator<Item = VolunteerId> + '_ {
        self.category_volunteers
            .get(&category)
            .into_iter()
            .flat_map(|members| members.iter().copied())
    }

    pub fn strata(&self) -> &[StratumInfo] {
        &self.strata
    }

    /// Require at least `min` seats for `category`.
    ///
    /// Quotas built from percentages only carry maximums. Deployments that
    /// guarantee representation set minimums here before checking
    /// feasibility. Unknown categories are ignored.
    pub fn with_minimum(mut self, category: CategoryId, min: usize) -> Self {
        if let Some(quota) = self.quotas.get_mut(&category) {
            quota.min = min;
        }
        self
    }

    /// Position of a volunteer in [`Snapshot::volunteer_ids`].
    pub fn volunteer_index(&self, volunteer: VolunteerId) -> Option<usize> {
        self.volunteer_index.get(&volunteer).copied()
    }
}

/// Builds [`Snapshot`]s from a [`SortitionSource`].
pub struct ConstraintBuilder;

impl ConstraintBuilder {
    /// Extract the optimization snapshot.
    ///
    /// Fails only when the source fails to provide its data.
    pub fn build(source: &dyn SortitionSource) -> Result<Snapshot, SourceError> {
        let panel_size = source.panel_size();
        let volunteers = source.volunteers()?;
        let strata = source.strata()?;

        let mut category_ids = Vec::new();
        let mut quotas = BTreeMap::new();
        let mut strata_info = Vec::with_capacity(strata.len());

        for stratum in &strata {
            let mut categories = Vec::with_capacity(stratum.categories.len());
            for category in &stratum.categories {
                let max_quota = category.max_quota(panel_size);
                category_ids.push(category.id);
                quotas.insert(category.id, Quota { min: 0, max: max_quota });
                categories.push(CategoryInfo {
                    id: category.id,
                    name: category.name.clone(),
                    percentage: category.percentage(),
                    max_quota,
                });
            }
            strata_info.push(StratumInfo {
                id: stratum.id,
                name: stratum.name.clone(),
                categories,
            });
        }

        let mut volunteer_ids = Vec::with_capacity(volunteers.len());
        let mut volunteer_index = HashMap::with_capacity(volunteers.len());
        let mut volunteer_categories: BTreeMap<VolunteerId, BTreeSet<CategoryId>> = BTreeMap::new();
        let mut category_volunteers: BTreeMap<CategoryId, BTreeSet<VolunteerId>> = BTreeMap::new();

        for volunteer in volunteers {
            if volunteer_index.contains_key(&volunteer.id) {
                tracing::warn!(volunteer = volunteer.id, "Duplicate volunteer in pool, keeping first");
                continue;
            }
            volunteer_index.insert(volunteer.id, volunteer_ids.len());
            volunteer_ids.push(volunteer.id);

            let memberships = volunteer_categories.entry(volunteer.id).or_default();
            for category in volunteer.categories {
                if !quotas.contains_key(&category) {
                    tracing::warn!(
                        volunteer = volunteer.id,
                        category,
                        "Membership references an undeclared category, ignoring"
                    );
                    continue;
                }
                memberships.insert(category);
                category_volunteers
                    .entry(category)
                    .or_default()
                    .insert(volunteer.id);
            }
        }

        tracing::debug!(
            sortition = source.sortition_id(),
            volunteers = volunteer_ids.len(),
            categories = category_ids.len(),
            panel_size,
            "Built optimization snapshot"
        );

        Ok(Snapshot {
            sortition_id: source.sortition_id(),
            panel_size,
            volunteer_ids,
            category_ids,
            quotas,
            volunteer_categories,
            category_volunteers,
            strata: strata_info,
            volunteer_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, Stratum, Volunteer};

    struct FixedSource {
        volunteers: Vec<Volunteer>,
        strata: Vec<Stratum>,
        panel_size: usize,
    }

    impl SortitionSource for FixedSource {
        fn sortition_id(&self) -> SortitionId {
            3
        }

        fn panel_size(&self) -> usize {
            self.panel_size
        }

        fn volunteers(&self) -> Result<Vec<Volunteer>, SourceError> {
            Ok(self.volunteers.clone())
        }

        fn strata(&self) -> Result<Vec<Stratum>, SourceError> {
            Ok(self.strata.clone())
        }
    }

    struct BrokenSource;

    impl SortitionSource for BrokenSource {
        fn sortition_id(&self) -> SortitionId {
            0
        }

        fn panel_size(&self) -> usize {
            1
        }

        fn volunteers(&self) -> Result<Vec<Volunteer>, SourceError> {
            Err(SourceError::Volunteers("connection reset".to_string()))
        }

        fn strata(&self) -> Result<Vec<Stratum>, SourceError> {
            Ok(vec![])
        }
    }

    fn gender_source() -> FixedSource {
        FixedSource {
            volunteers: vec![
                Volunteer::new(1, [10]),
                Volunteer::new(2, [11]),
                Volunteer::new(3, [10, 99]),
                Volunteer::new(4, []),
                Volunteer::new(1, [11]),
            ],
            strata: vec![Stratum::new(
                1,
                "Gender",
                vec![
                    Category::new(10, "Women", Some(50.0)),
                    Category::new(11, "Men", None),
                ],
            )],
            panel_size: 3,
        }
    }

    #[test]
    fn test_quotas_from_percentages() {
        let snapshot = ConstraintBuilder::build(&gender_source()).unwrap();
        assert_eq!(snapshot.quota(10), Some(Quota { min: 0, max: 2 }));
        assert_eq!(snapshot.quota(11), Some(Quota { min: 0, max: 3 }));
        assert_eq!(snapshot.category_ids(), &[10, 11]);
    }

    #[test]
    fn test_memberships_and_inverse() {
        let snapshot = ConstraintBuilder::build(&gender_source()).unwrap();
        let women: Vec<_> = snapshot.members_of(10).collect();
        assert_eq!(women, vec![1, 3]);
        assert!(snapshot.volunteer_categories()[&4].is_empty());
        // undeclared category 99 is dropped
        assert_eq!(snapshot.volunteer_categories()[&3].len(), 1);
    }

    #[test]
    fn test_duplicate_volunteer_keeps_first() {
        let snapshot = ConstraintBuilder::build(&gender_source()).unwrap();
        assert_eq!(snapshot.volunteer_ids(), &[1, 2, 3, 4]);
        assert_eq!(snapshot.volunteer_index(4), Some(3));
        assert!(snapshot.volunteer_categories()[&1].contains(&10));
        assert!(!snapshot.volunteer_categories()[&1].contains(&11));
    }

    #[test]
    fn test_with_minimum_keeps_maximum() {
        let snapshot = ConstraintBuilder::build(&gender_source())
            .unwrap()
            .with_minimum(10, 1)
            .with_minimum(42, 3);
        assert_eq!(snapshot.quota(10), Some(Quota { min: 1, max: 2 }));
        assert_eq!(snapshot.quota(42), None);
    }

    #[test]
    fn test_source_error_propagates() {
        let result = ConstraintBuilder::build(&BrokenSource);
        assert!(matches!(result, Err(SourceError::Volunteers(_))));
    }
}
