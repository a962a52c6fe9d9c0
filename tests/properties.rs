use aura_risk::core::adapters::{EstimatorResult, UserEstimate};
use aura_risk::core::config::{FeatureConfig, SeverityConfig, VotingConfig};
use aura_risk::core::ensemble::{SeverityPlan, VotePlan};
use aura_risk::core::featureset::{
    FeatureDefinition, FeatureMatrix, FeatureMatrixBuilder, FeatureTable, UserRecord,
};
use aura_risk::core::normalization::normalize_min_max;
use aura_risk::core::risk_partition::{identify_risk_partition, RiskPartitionPolicy};
use aura_risk::{EstimatorKind, RiskTier};
use indexmap::IndexMap;
use ndarray::Array2;
use proptest::prelude::*;

fn table_from(values: &[Vec<f64>], names: &[String]) -> FeatureTable {
    FeatureTable::new(
        values
            .iter()
            .enumerate()
            .map(|(i, row)| {
                names
                    .iter()
                    .zip(row)
                    .fold(UserRecord::new(format!("u{i}")), |r, (name, v)| {
                        r.with_value(name.clone(), *v)
                    })
            })
            .collect(),
    )
}

fn three_voters() -> Vec<EstimatorKind> {
    vec![
        EstimatorKind::Partition,
        EstimatorKind::Density,
        EstimatorKind::Isolation,
    ]
}

/// `groups` tight blobs at increasing distance from the origin, labelled
/// through `relabel`
fn blobs(relabel: &[usize], per_group: usize) -> (EstimatorResult, FeatureMatrix) {
    let groups = relabel.len();
    let n = groups * per_group;
    let mut values = Array2::zeros((n, 2));
    let mut records = Vec::with_capacity(n);
    let mut user_ids = Vec::with_capacity(n);

    for g in 0..groups {
        for j in 0..per_group {
            let row = g * per_group + j;
            values[[row, 0]] = g as f64 * 3.0 + j as f64 * 0.01;
            values[[row, 1]] = g as f64 * 2.0 - j as f64 * 0.01;
            let user_id = format!("u{row}");
            user_ids.push(user_id.clone());
            records.push(UserEstimate {
                user_id,
                partition_id: Some(relabel[g]),
                is_outlier: false,
                raw_score: Some(0.0),
                partition_probabilities: None,
            });
        }
    }

    let result = EstimatorResult {
        estimator: EstimatorKind::Partition,
        name: "kmeans".into(),
        records,
        centers: None,
        fit_metrics: IndexMap::new(),
        warnings: Vec::new(),
    };
    let matrix = FeatureMatrix {
        user_ids,
        feature_names: vec!["a".into(), "b".into()],
        raw: values.clone(),
        values,
    };
    (result, matrix)
}

fn risk_users(relabel: &[usize]) -> Vec<String> {
    let (result, matrix) = blobs(relabel, 5);
    let (map, _) =
        identify_risk_partition(&result, &matrix, &RiskPartitionPolicy::CentroidNorm).unwrap();
    result
        .records
        .iter()
        .filter(|r| map.is_risk_member(r.partition_id))
        .map(|r| r.user_id.clone())
        .collect()
}

proptest! {
    /// Property: standardized columns have mean 0 and unit population std, or are all zero
    #[test]
    fn prop_standardized_columns(
        rows in prop::collection::vec(prop::collection::vec(-1.0e3f64..1.0e3, 3), 2..40)
    ) {
        let names: Vec<String> = (0..3).map(|i| format!("f{i}")).collect();
        let table = table_from(&rows, &names);
        let config = FeatureConfig {
            features: names
                .iter()
                .map(|n| FeatureDefinition::new(n.clone(), ""))
                .collect(),
            ..FeatureConfig::default()
        };
        let built = FeatureMatrixBuilder::new(&config, 1).build(&table).unwrap();
        let matrix = built.matrix;

        prop_assert_eq!(matrix.n_features(), 3);
        for name in &names {
            let column = matrix.column(name).unwrap();
            let n = column.len() as f64;
            let mean = column.sum() / n;
            let var = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            if built.report.constant_features.contains(name) {
                prop_assert!(column.iter().all(|v| *v == 0.0));
            } else {
                prop_assert!(mean.abs() < 1e-9, "mean {}", mean);
                prop_assert!((var.sqrt() - 1.0).abs() < 1e-9, "std {}", var.sqrt());
            }
        }
    }

    /// Property: re-normalizing a normalized signal leaves it unchanged
    #[test]
    fn prop_normalization_idempotent(raw in prop::collection::vec(-1.0e6f64..1.0e6, 1..100)) {
        let once = normalize_min_max(&raw);
        let twice = normalize_min_max(&once.values);
        for (a, b) in once.values.iter().zip(&twice.values) {
            prop_assert!((a - b).abs() < 1e-9);
        }
        prop_assert!(once.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    /// Property: constant signals normalize to exact zeros
    #[test]
    fn prop_degenerate_scores_are_zero(value in -1.0e6f64..1.0e6, n in 1usize..200) {
        let normalized = normalize_min_max(&vec![value; n]);
        prop_assert!(normalized.values.iter().all(|v| *v == 0.0));
    }

    /// Property: increasing one normalized input never lowers severity
    #[test]
    fn prop_severity_monotonic(
        scores in prop::collection::vec(0.0f64..1.0, 4),
        bump in 0.0f64..1.0,
        which in 0usize..4,
        density_flag in any::<bool>(),
    ) {
        let mut config = SeverityConfig::default();
        config.weights = IndexMap::from([
            (EstimatorKind::Partition, 0.25),
            (EstimatorKind::Density, 0.15),
            (EstimatorKind::Mixture, 0.2),
            (EstimatorKind::Isolation, 0.4),
        ]);
        let plan = SeverityPlan::resolve(&config, &EstimatorKind::ALL).unwrap();
        let flagged: Vec<EstimatorKind> = if density_flag {
            vec![EstimatorKind::Density]
        } else {
            Vec::new()
        };

        let before: IndexMap<EstimatorKind, f64> =
            EstimatorKind::ALL.into_iter().zip(scores.iter().copied()).collect();
        let mut after = before.clone();
        let kind = EstimatorKind::ALL[which];
        after[&kind] = (after[&kind] + bump).min(1.0);

        let low = plan.unit_severity(&before, &flagged);
        let high = plan.unit_severity(&after, &flagged);
        prop_assert!(high >= low);
        prop_assert!((0.0..=1.0).contains(&high));
    }

    /// Property: relabelling partitions never changes who is in the risk partition
    #[test]
    fn prop_risk_partition_label_invariance(
        permutation in Just((0..5).collect::<Vec<usize>>()).prop_shuffle()
    ) {
        let identity: Vec<usize> = (0..5).collect();
        prop_assert_eq!(risk_users(&identity), risk_users(&permutation));
    }

    /// Property: vote tiers are monotonic in the vote count
    #[test]
    fn prop_vote_tiers_monotonic(votes in 0usize..3) {
        let plan = VotePlan::resolve(&VotingConfig::default(), &three_voters());
        prop_assert!(plan.tier_for(votes) <= plan.tier_for(votes + 1));
    }
}

#[test]
fn two_of_three_votes_is_at_least_high() {
    let plan = VotePlan::resolve(&VotingConfig::default(), &three_voters());
    assert!(matches!(plan.tier_for(2), RiskTier::High | RiskTier::Critical));
    assert_eq!(plan.tier_for(1), RiskTier::Moderate);
    assert_eq!(plan.tier_for(0), RiskTier::Low);
    assert_eq!(plan.tier_for(3), RiskTier::Critical);
}
