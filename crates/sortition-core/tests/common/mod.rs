#![allow(dead_code)]

use sortition_core::{Category, Panel, Snapshot, SortitionDefinition, Stratum, Volunteer};

pub const GENDER_WOMEN: u64 = 10;
pub const GENDER_MEN: u64 = 11;
pub const AGE_YOUNG: u64 = 20;
pub const AGE_MIDDLE: u64 = 21;
pub const AGE_SENIOR: u64 = 22;

pub fn gender_stratum() -> Stratum {
    Stratum::new(
        1,
        "Gender",
        vec![
            Category::new(GENDER_WOMEN, "Women", Some(50.0)),
            Category::new(GENDER_MEN, "Men", Some(50.0)),
        ],
    )
}

pub fn age_stratum() -> Stratum {
    Stratum::new(
        2,
        "Age",
        vec![
            Category::new(AGE_YOUNG, "18-34", Some(33.0)),
            Category::new(AGE_MIDDLE, "35-59", Some(34.0)),
            Category::new(AGE_SENIOR, "60+", Some(33.0)),
        ],
    )
}

/// Pool of `n` volunteers spread evenly over gender and age.
pub fn assembly(sortition_id: u64, n: u64, panel_size: usize) -> SortitionDefinition {
    let ages = [AGE_YOUNG, AGE_MIDDLE, AGE_SENIOR];
    let volunteers = (1..=n)
        .map(|i| {
            let gender = if i % 2 == 0 { GENDER_WOMEN } else { GENDER_MEN };
            Volunteer::new(i, [gender, ages[(i % 3) as usize]])
        })
        .collect();

    SortitionDefinition {
        sortition_id,
        name: "Citizens' assembly".to_string(),
        description: None,
        panel_size,
        strata: vec![gender_stratum(), age_stratum()],
        volunteers,
    }
}

/// Assert a panel has `k` distinct pool members and respects every quota.
pub fn assert_valid_panel(panel: &Panel, snapshot: &Snapshot) {
    assert_eq!(panel.len(), snapshot.panel_size(), "panel {}", panel);
    for id in panel.members() {
        assert!(
            snapshot.volunteer_index(*id).is_some(),
            "panel {} contains {} outside the pool",
            panel,
            id
        );
    }
    for (&category, quota) in snapshot.quotas() {
        let seats = snapshot.members_of(category).filter(|id| panel.contains(*id)).count();
        assert!(
            quota.contains(seats),
            "panel {} gives category {} {} seats, quota {:?}",
            panel,
            category,
            seats,
            quota
        );
    }
}
