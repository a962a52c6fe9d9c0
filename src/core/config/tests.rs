use super::*;
use crate::core::errors::RiskError;
use crate::estimators::EstimatorKind;
use indexmap::IndexMap;
use tempfile::tempdir;

fn expect_config_error<T: std::fmt::Debug>(result: Result<T>) -> Option<String> {
    match result.expect_err("expected validation failure") {
        RiskError::Config { field, .. } => field,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn default_configs_validate_successfully() {
    RiskEngineConfig::default()
        .validate()
        .expect("engine default");
    FeatureConfig::default().validate().expect("feature default");
    EstimatorSuiteConfig::default()
        .validate()
        .expect("estimator default");
}

#[test]
fn weights_not_summing_to_one_fail() {
    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.weights = IndexMap::from([
        (EstimatorKind::Partition, 0.3),
        (EstimatorKind::Isolation, 0.3),
        (EstimatorKind::Mixture, 0.3),
    ]);
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("ensemble.severity.weights"));
}

#[test]
fn weights_within_tolerance_pass() {
    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.weights = IndexMap::from([
        (EstimatorKind::Partition, 0.2),
        (EstimatorKind::Isolation, 0.3),
        (EstimatorKind::Mixture, 0.5 + 1e-9),
    ]);
    config.validate().expect("within tolerance");
}

#[test]
fn negative_weight_fails() {
    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.weights = IndexMap::from([
        (EstimatorKind::Partition, 1.5),
        (EstimatorKind::Isolation, -0.5),
    ]);
    assert!(expect_config_error(config.validate()).is_some());
}

#[test]
fn vote_threshold_bounds() {
    let mut config = RiskEngineConfig::default();
    config.ensemble.voting.threshold = 0;
    expect_config_error(config.validate());

    config.ensemble.voting.threshold = 4;
    expect_config_error(config.validate());

    config.ensemble.voting.threshold = 3;
    config.validate().expect("threshold equal to voter count");

    config.ensemble.voting.critical_threshold = Some(2);
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("ensemble.voting.critical_threshold"));
}

#[test]
fn disabled_voter_fails() {
    let mut config = RiskEngineConfig::default();
    config.estimators.density.run.enabled = false;
    config.ensemble.severity.penalty = None;
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("ensemble.voting.voters"));
}

#[test]
fn disabled_penalty_indicator_fails() {
    let mut config = RiskEngineConfig::default();
    config.estimators.density.run.enabled = false;
    config.ensemble.voting.voters = vec![EstimatorKind::Partition, EstimatorKind::Isolation];
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("ensemble.severity.penalty.indicator"));
}

#[test]
fn estimator_parameter_ranges() {
    let mut config = RiskEngineConfig::default();
    config.estimators.isolation.contamination = 0.0;
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.estimators.partition.k = 0;
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.estimators.density.eps = -1.0;
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.estimators.mixture.components = 0;
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.estimators.partition.run.timeout_ms = 0;
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("estimators.partition.timeout_ms"));
}

#[test]
fn severity_scale_and_tiers() {
    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.scale = SeverityScale {
        lower: 10.0,
        upper: 10.0,
    };
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.tiers = TierCutoffs {
        moderate: 0.5,
        high: 0.4,
        critical: 0.7,
    };
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.ensemble.severity.penalty = Some(SeverityPenalty {
        indicator: EstimatorKind::Density,
        factor: 0.8,
    });
    expect_config_error(config.validate());
}

#[test]
fn feature_schema_rules() {
    let mut config = RiskEngineConfig::default();
    config.features.features.clear();
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    let first = config.features.features[0].clone();
    config.features.features.push(first);
    expect_config_error(config.validate());

    let mut config = RiskEngineConfig::default();
    config.risk_partition = RiskPartitionPolicy::FeatureMean {
        feature: "not_a_feature".into(),
    };
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("risk_partition.feature"));
}

#[test]
fn no_enabled_estimator_fails() {
    let mut config = RiskEngineConfig::default();
    for kind in EstimatorKind::ALL {
        match kind {
            EstimatorKind::Partition => config.estimators.partition.run.enabled = false,
            EstimatorKind::Density => config.estimators.density.run.enabled = false,
            EstimatorKind::Mixture => config.estimators.mixture.run.enabled = false,
            EstimatorKind::Isolation => config.estimators.isolation.run.enabled = false,
        }
    }
    let field = expect_config_error(config.validate());
    assert_eq!(field.as_deref(), Some("estimators"));
}

#[test]
fn partial_yaml_fills_defaults() {
    let yaml = r"
seed: 7
estimators:
  partition:
    k: 3
    failure_policy: fatal
ensemble:
  voting:
    failed_voters: count_as_not_flagged
risk_partition:
  policy: feature_mean
  feature: inactivity_days
";
    let config = RiskEngineConfig::from_yaml_str(yaml).expect("parse");
    assert_eq!(config.seed, 7);
    assert_eq!(config.estimators.partition.k, 3);
    assert_eq!(
        config.estimators.partition.run.failure_policy,
        FailurePolicy::Fatal
    );
    assert_eq!(config.estimators.partition.max_iterations, 300);
    assert_eq!(config.estimators.isolation.contamination, 0.05);
    assert_eq!(
        config.ensemble.voting.failed_voters,
        FailedVoterPolicy::CountAsNotFlagged
    );
    assert_eq!(config.ensemble.severity.weights.len(), 2);
    config.validate().expect("valid");
}

#[test]
fn yaml_file_round_trip() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("risk.yml");

    let mut config = RiskEngineConfig::default();
    config.seed = 1234;
    config.ensemble.voting.critical_threshold = Some(3);
    config.to_yaml_file(&path).expect("write");

    let loaded = RiskEngineConfig::from_yaml_file(&path).expect("read");
    assert_eq!(loaded.seed, 1234);
    assert_eq!(loaded.ensemble.voting.critical_threshold, Some(3));
    assert_eq!(
        loaded.ensemble.severity.weights,
        config.ensemble.severity.weights
    );
    assert_eq!(loaded.features.feature_names(), config.features.feature_names());
}

#[test]
fn missing_file_is_io_error() {
    let err = RiskEngineConfig::from_yaml_file("/definitely/not/here.yml").unwrap_err();
    assert!(matches!(err, RiskError::Io { .. }));
}
