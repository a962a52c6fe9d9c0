//! Synthetic user populations shared by the integration tests.

#![allow(dead_code)]

use aura_risk::core::featureset::{FeatureTable, UserRecord};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// (feature, typical low, typical high)
const PROFILE: [(&str, f64, f64); 6] = [
    ("real_friends", 20.0, 60.0),
    ("active_conversations", 2.0, 10.0),
    ("inactivity_days", 0.0, 7.0),
    ("mean_engagement", 10.0, 40.0),
    ("reciprocity_ratio", 0.5, 1.5),
    ("mean_sentiment", -0.2, 0.4),
];

/// Users whose features all fall inside the typical ranges
pub fn normal_user(rng: &mut ChaCha8Rng, user_id: String) -> UserRecord {
    PROFILE
        .iter()
        .fold(UserRecord::new(user_id), |record, (name, low, high)| {
            record.with_value(*name, rng.gen_range(*low..*high))
        })
}

/// Users whose features lie far outside the typical ranges, in random directions
pub fn extreme_user(rng: &mut ChaCha8Rng, user_id: String) -> UserRecord {
    PROFILE
        .iter()
        .fold(UserRecord::new(user_id), |record, (name, low, high)| {
            let width = high - low;
            let center = (low + high) / 2.0;
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            record.with_value(*name, center + sign * width * rng.gen_range(8.0..25.0))
        })
}

/// A population of `normal` typical users followed by `extreme` outliers.
///
/// Outlier ids start with `outlier-`.
pub fn population(normal: usize, extreme: usize, seed: u64) -> FeatureTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows: Vec<UserRecord> = (0..normal)
        .map(|i| normal_user(&mut rng, format!("user-{i:04}")))
        .collect();
    rows.extend((0..extreme).map(|i| extreme_user(&mut rng, format!("outlier-{i:03}"))));
    FeatureTable::new(rows)
}
