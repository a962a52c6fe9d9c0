//! Derived behavioral indices computed from raw activity counts.
//!
//! Each index is appended to every record of the table, but only when all of
//! its source columns exist in the input. Missing entries inside an existing
//! column count as zero.

use tracing::debug;

use crate::core::featureset::{FeatureTable, UserRecord};

/// Composite social isolation index, 0 to 10
pub const SOCIAL_ISOLATION_INDEX: &str = "social_isolation_index";
/// Comments received per comment made
pub const COMMENT_RECIPROCITY_RATIO: &str = "comment_reciprocity_ratio";
/// Posts in the last week relative to the last month
pub const ACTIVITY_DECAY_RATIO: &str = "activity_decay_ratio";
/// Weighted count of rejections and blocks
pub const SOCIAL_CONFLICT_INDEX: &str = "social_conflict_index";
/// Share of days on the platform with any activity
pub const DAILY_ACTIVITY_RATIO: &str = "daily_activity_ratio";

/// Every derived column name
pub const DERIVED_FEATURES: [&str; 5] = [
    SOCIAL_ISOLATION_INDEX,
    COMMENT_RECIPROCITY_RATIO,
    ACTIVITY_DECAY_RATIO,
    SOCIAL_CONFLICT_INDEX,
    DAILY_ACTIVITY_RATIO,
];

struct DerivedIndex {
    name: &'static str,
    inputs: &'static [&'static str],
    compute: fn(&UserRecord) -> f64,
}

const INDICES: [DerivedIndex; 5] = [
    DerivedIndex {
        name: SOCIAL_ISOLATION_INDEX,
        inputs: &[
            "real_friends",
            "active_conversations",
            "communities",
            "mean_engagement",
            "inactivity_days",
        ],
        compute: social_isolation_index,
    },
    DerivedIndex {
        name: COMMENT_RECIPROCITY_RATIO,
        inputs: &["comments_received", "comments_made"],
        compute: |r| ratio(r.get_or_zero("comments_received"), r.get_or_zero("comments_made")),
    },
    DerivedIndex {
        name: ACTIVITY_DECAY_RATIO,
        inputs: &["posts_last_week", "posts_last_month"],
        compute: |r| ratio(r.get_or_zero("posts_last_week"), r.get_or_zero("posts_last_month")),
    },
    DerivedIndex {
        name: SOCIAL_CONFLICT_INDEX,
        inputs: &["rejections", "blocks", "times_blocked", "message_blocks"],
        compute: |r| {
            2.0 * r.get_or_zero("rejections")
                + 3.0 * r.get_or_zero("blocks")
                + 2.0 * r.get_or_zero("times_blocked")
                + 1.5 * r.get_or_zero("message_blocks")
        },
    },
    DerivedIndex {
        name: DAILY_ACTIVITY_RATIO,
        inputs: &["active_days", "days_on_platform"],
        compute: |r| ratio(r.get_or_zero("active_days"), r.get_or_zero("days_on_platform")),
    },
];

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// Isolation contribution of a social count: 10 for nobody, shrinking
/// logarithmically as the count grows
fn count_isolation(count: f64) -> f64 {
    if count <= 0.0 {
        10.0
    } else {
        (10.0 / (count + 1.0).ln()).min(10.0)
    }
}

fn social_isolation_index(record: &UserRecord) -> f64 {
    let engagement = record.get_or_zero("mean_engagement").min(100.0);
    let components = [
        count_isolation(record.get_or_zero("real_friends")),
        count_isolation(record.get_or_zero("active_conversations")),
        count_isolation(record.get_or_zero("communities")),
        (100.0 - engagement) / 10.0,
        (record.get_or_zero("inactivity_days") / 10.0).min(10.0),
    ];
    components.iter().sum::<f64>() / components.len() as f64
}

/// Copy of the table with every derivable index appended
pub fn with_derived_indices(table: &FeatureTable) -> FeatureTable {
    let mut derived = table.clone();
    for index in &INDICES {
        if !index.inputs.iter().all(|c| table.has_column(c)) {
            debug!(index = index.name, "skipping derived index with missing inputs");
            continue;
        }
        for record in &mut derived.rows {
            let value = (index.compute)(record);
            record.set(index.name, Some(value));
        }
    }
    derived
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record() -> UserRecord {
        UserRecord::new("u1")
            .with_value("real_friends", 0.0)
            .with_value("active_conversations", 0.0)
            .with_value("communities", 0.0)
            .with_value("mean_engagement", 0.0)
            .with_value("inactivity_days", 200.0)
            .with_value("comments_received", 6.0)
            .with_value("comments_made", 3.0)
    }

    #[test]
    fn test_fully_isolated_user_scores_ten() {
        let table = FeatureTable::new(vec![record()]);
        let derived = with_derived_indices(&table);
        assert_relative_eq!(derived.rows[0].get_or_zero(SOCIAL_ISOLATION_INDEX), 10.0);
    }

    #[test]
    fn test_count_isolation_is_capped() {
        assert_eq!(count_isolation(0.0), 10.0);
        assert_eq!(count_isolation(1.0), 10.0);
        assert!(count_isolation(50.0) < 3.0);
    }

    #[test]
    fn test_isolation_index_stays_within_its_scale() {
        // Single contacts would exceed 10 per component without the cap
        let lonely = UserRecord::new("u2")
            .with_value("real_friends", 1.0)
            .with_value("active_conversations", 1.0)
            .with_value("communities", 0.5)
            .with_value("mean_engagement", 0.0)
            .with_value("inactivity_days", 500.0);
        let index = social_isolation_index(&lonely);
        assert_relative_eq!(index, 10.0);
        assert!((0.0..=10.0).contains(&index));
    }

    #[test]
    fn test_ratio_and_skipped_indices() {
        let table = FeatureTable::new(vec![record()]);
        let derived = with_derived_indices(&table);
        let row = &derived.rows[0];

        assert_relative_eq!(row.get_or_zero(COMMENT_RECIPROCITY_RATIO), 2.0);
        // No post or block columns in the input
        assert!(!row.values.contains_key(ACTIVITY_DECAY_RATIO));
        assert!(!row.values.contains_key(SOCIAL_CONFLICT_INDEX));
        assert!(!row.values.contains_key(DAILY_ACTIVITY_RATIO));
    }

    #[test]
    fn test_zero_denominator_gives_zero() {
        let table = FeatureTable::new(vec![UserRecord::new("u1")
            .with_value("active_days", 5.0)
            .with_value("days_on_platform", 0.0)]);
        let derived = with_derived_indices(&table);
        assert_eq!(derived.rows[0].get(DAILY_ACTIVITY_RATIO), Some(0.0));
    }

    #[test]
    fn test_conflict_index_weights() {
        let table = FeatureTable::new(vec![UserRecord::new("u1")
            .with_value("rejections", 1.0)
            .with_value("blocks", 1.0)
            .with_value("times_blocked", 1.0)
            .with_missing("message_blocks")]);
        let derived = with_derived_indices(&table);
        assert_relative_eq!(derived.rows[0].get_or_zero(SOCIAL_CONFLICT_INDEX), 7.0);
    }
}
