//! Signal conditioning and risk scoring integration tests
//!
//! Runs whole epochs through the public filter, risk and info-risk entry
//! points with the reference decay table.
//!
//! Run with: cargo test --test integration_scoring

use proptest::prelude::*;
use robert_core::signal::risk::window_risk;
use robert_core::signal::RiskComputer;
use robert_core::{
    apply_updates, FilterConfig, FilterMode, ProximityConfig, ProximityFilter,
    ProximityFilterOutput, ProximityInfoRiskComputer, RiskLevel, TimestampedRssi,
};

const EPOCH_SECS: i64 = 15 * 60;

fn reference_config() -> FilterConfig {
    FilterConfig {
        deltas: vec![39.0, 27.0, 23.0, 21.0, 20.0, 15.0],
        p0: -66.0,
        a: 4.34,
        duration_threshold_secs: 120,
        ..FilterConfig::default()
    }
}

fn series(start_ms: i64, count: i64, spacing_ms: i64, rssi: impl Fn(i64) -> i32) -> Vec<TimestampedRssi> {
    (0..count)
        .map(|i| TimestampedRssi::new(format!("rssi-{}", i), start_ms + i * spacing_ms, rssi(i)))
        .collect()
}

#[test]
fn test_duration_gate_scenario() {
    let config = reference_config();
    let filter = ProximityFilter::new(&config);

    // 150 s of samples pass the 120 s gate
    let long = series(1_600_000_000_000, 16, 10_000, |i| -60 - (i % 7) as i32);
    let output = filter.filter(&long, 1_600_000_000_000, EPOCH_SECS, FilterMode::Full);
    let accepted = output.accepted().expect("accepted");
    assert_eq!(accepted.duration_in_minutes, 2.5);
    assert_eq!(accepted.timestamped_rssis, long);

    // a full 15-minute series is judged against the requested duration
    let config = FilterConfig {
        rssi_threshold: 1,
        ..reference_config()
    };
    let filter = ProximityFilter::new(&config);
    let epoch = series(1_600_000_000_000, 91, 10_000, |i| -55 - (i % 11) as i32);
    let output = filter.filter(&epoch, 1_600_000_000_000, 150, FilterMode::Full);
    assert_eq!(output.accepted().map(|a| a.duration_in_minutes), Some(15.0));
    assert_eq!(
        filter.filter(&epoch, 1_600_000_000_000, 1, FilterMode::Full),
        ProximityFilterOutput::Rejected
    );

    // a one-second burst does not
    let short = series(1_600_000_000_000, 2, 1_000, |_| -40);
    for mode in [FilterMode::Full, FilterMode::Medium, FilterMode::Risks] {
        assert_eq!(
            filter.filter(&short, 1_600_000_000_000, EPOCH_SECS, mode),
            ProximityFilterOutput::Rejected
        );
    }
}

#[test]
fn test_single_sample_window_risk() {
    let config = reference_config();
    let samples = vec![TimestampedRssi::new("only", 30_000, -46)];

    let risks = RiskComputer::new(&config).window_risks(&samples, 0, 60);
    assert_eq!(risks.len(), 1);
    assert!((risks[0] - 20.0 / 39.0).abs() < 1e-9);

    // at or above p0 + delta the window saturates
    let strong = vec![TimestampedRssi::new("only", 30_000, -20)];
    assert_eq!(RiskComputer::new(&config).window_risks(&strong, 0, 60), vec![1.0]);
}

#[test]
fn test_rejection_laws() {
    let config = reference_config();
    let filter = ProximityFilter::new(&config);
    let samples = series(0, 30, 10_000, |_| -50);

    for mode in [FilterMode::Full, FilterMode::Medium, FilterMode::Risks] {
        assert!(!filter.filter(&[], 0, EPOCH_SECS, mode).is_accepted());
        assert!(!filter.filter(&samples, 0, 0, mode).is_accepted());
        assert!(!filter.filter(&samples, 0, -1, mode).is_accepted());
    }
}

#[test]
fn test_close_contact_epoch() {
    let config = reference_config();
    let samples = series(0, 90, 10_000, |i| if i == 40 { 12 } else { -52 });

    let output = ProximityFilter::new(&config).filter(&samples, 0, EPOCH_SECS, FilterMode::Risks);
    let accepted = output.accepted().expect("close contact accepted");

    assert_eq!(accepted.peak_count, Some(1));
    assert_eq!(accepted.mean_peak, Some(12.0));
    assert_eq!(accepted.timestamped_rssis[40].rssi, 0);
    assert_eq!(accepted.timestamped_rssis.len(), 90);

    let windows = accepted.window_risks.as_ref().expect("windows");
    assert_eq!(windows.len(), 15);
    let max = windows.iter().copied().fold(0.0, f64::max);
    let risk = accepted.risk.expect("risk");
    let intermediate = accepted.intermediate_risk.expect("intermediate");
    assert!((risk - windows.iter().sum::<f64>()).abs() < 1e-9);
    assert!(intermediate <= max + 1e-12);
    assert!(max <= risk);
    assert_eq!(accepted.risk_density, Some(15));
}

#[test]
fn test_distant_contact_rejected_in_risk_mode() {
    let config = reference_config();
    let samples = series(0, 90, 10_000, |_| -95);
    assert_eq!(
        ProximityFilter::new(&config).filter(&samples, 0, EPOCH_SECS, FilterMode::Risks),
        ProximityFilterOutput::Rejected
    );
}

#[test]
fn test_info_risk_agrees_with_windowed_pipeline() {
    let config = reference_config();
    let samples = series(0, 90, 10_000, |i| -48 - (i % 5) as i32);

    let info = ProximityInfoRiskComputer::new(&config);
    let (score, level) = info.classify(&samples, 0, EPOCH_SECS);
    let windowed: f64 = RiskComputer::new(&config)
        .window_risks(&samples, 0, EPOCH_SECS)
        .iter()
        .sum();

    assert!((score - windowed).abs() < 1e-9);
    assert_eq!(level, RiskLevel::from_score(score));
    assert_eq!(level, RiskLevel::High);
    assert_eq!(info.score(&samples, 0, 0), 0.0);
}

#[test]
fn test_rescored_history_is_updated_in_place() {
    let config = reference_config();
    let mut stored = series(0, 20, 10_000, |i| if i % 4 == 0 { 5 } else { -55 });

    let output = ProximityFilter::new(&config).filter(&stored, 0, EPOCH_SECS, FilterMode::Medium);
    let touched = apply_updates(&mut stored, &output);

    assert_eq!(touched, 5);
    assert_eq!(stored.len(), 20);
    assert!(stored.iter().all(|s| s.rssi <= 0));
    assert_eq!(stored[4].id, "rssi-4");
}

#[test]
fn test_partial_config_json_uses_defaults() {
    let config = ProximityConfig::from_json(
        r#"{"version": 3, "filter": {"p0": -70.0, "deltas": [30.0, 20.0]}}"#,
    )
    .expect("valid json");

    assert_eq!(config.version, 3);
    assert_eq!(config.filter.p0, -70.0);
    assert_eq!(config.filter.deltas, vec![30.0, 20.0]);
    assert_eq!(config.filter.time_window_secs, 120);
    assert_eq!(config.ble.connection_timeout_ms, 5_000);

    assert!(ProximityConfig::from_json(r#"{"filter": {"deltas": []}}"#).is_err());
}

proptest! {
    #[test]
    fn prop_window_risk_monotonic(
        rssis in proptest::collection::vec(-110i32..10, 1..40),
        boost in 0i32..30,
    ) {
        let config = reference_config();
        let boosted: Vec<i32> = rssis.iter().map(|r| r + boost).collect();
        let base = window_risk(&rssis, &config);
        let stronger = window_risk(&boosted, &config);

        prop_assert!((0.0..=1.0).contains(&base));
        prop_assert!(stronger + 1e-12 >= base);
    }

    #[test]
    fn prop_filter_never_panics(
        rssis in proptest::collection::vec(-127i32..127, 0..60),
        spacing in 0i64..30_000,
        duration in prop_oneof![9 => -100i64..2_000, 1 => Just(i64::MAX)],
    ) {
        let config = reference_config();
        let samples = series(0, rssis.len() as i64, spacing, |i| rssis[i as usize]);
        for mode in [FilterMode::Full, FilterMode::Medium, FilterMode::Risks] {
            if let ProximityFilterOutput::Accepted(accepted) =
                ProximityFilter::new(&config).filter(&samples, 0, duration, mode)
            {
                prop_assert_eq!(accepted.timestamped_rssis.len(), samples.len());
                if let Some(risk) = accepted.risk {
                    prop_assert!(risk >= config.risk_threshold);
                }
            }
        }
    }
}
