//! End-to-end campaigns against the loopback simulator.

use hilbench::campaign::{CampaignError, CampaignRunner, Category};
use hilbench::collect::CollectError;
use hilbench::config::{CampaignConfig, ConstantCase};
use hilbench::pacing::PacingConfig;
use hilbench::platform::sim::{EngineOp, SessionPhase, SimConfig, SimPlatform};
use hilbench::report::TestStatus;
use hilbench::stimulus::StimulusError;
use hilbench::topology::layout::TypePair;
use hilbench::topology::message::Protocol;
use hilbench::topology::{CvtType, RawType};

fn fast_config() -> CampaignConfig {
    CampaignConfig {
        pacing: PacingConfig::immediate(),
        sim: SimConfig {
            samples_per_run: 120,
            ..SimConfig::default()
        },
        ..CampaignConfig::default()
    }
}

/// Single double/double loop over tcp.
fn single_signal(config: &mut CampaignConfig) {
    config.signal.types = vec![TypePair::new(CvtType::Double, RawType::Double)];
    config.signal.protocols = vec![Protocol::Tcp];
    config.signal.pair_counts = vec![1];
}

#[tokio::test]
async fn test_default_campaign_passes() {
    let config = fast_config();
    let report = hilbench::run_simulated(&config, &Category::ALL).await.unwrap();

    assert!(report.passed(), "{}", report.render_table());
    let names: Vec<&str> = report.categories.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["signal", "constants", "strings"]);

    // 9 type pairs x 2 protocols x 2 loops
    assert_eq!(report.categories[0].checks, 36);
    // 9 type pairs x 3 constants
    assert_eq!(report.categories[1].checks, 27);
    // 10 rounds x 5 channels
    assert_eq!(report.categories[2].checks, 50);
    assert!(report.finished_at.is_some());
}

#[tokio::test]
async fn test_signal_labels_name_the_loop() {
    let mut config = fast_config();
    single_signal(&mut config);
    let report = hilbench::run_simulated(&config, &[Category::Signal]).await.unwrap();

    let check = &report.categories[0].results[0];
    assert_eq!(check.status, TestStatus::Pass);
    assert_eq!(check.label, "double/double tcp x1 Out.point2 -> In.point1");
}

#[tokio::test]
async fn test_jitter_beyond_tolerance_fails() {
    let mut config = fast_config();
    single_signal(&mut config);
    config.sim.jitter = 5.0;

    let report = hilbench::run_simulated(&config, &[Category::Signal]).await.unwrap();
    let signal = &report.categories[0];
    assert_eq!(signal.checks, 1);
    assert_eq!(signal.failures, 1);
    assert!(signal.results[0].details.contains("exceeds tolerance 3"));
    assert!(!report.passed());
}

#[tokio::test]
async fn test_signal_failure_budget_aborts() {
    let mut config = fast_config();
    config.sim.jitter = 5.0;
    config.signal.failure_budget = Some(0);

    let report = hilbench::run_simulated(&config, &[Category::Signal]).await.unwrap();
    let signal = &report.categories[0];
    assert!(signal.aborted);
    assert_eq!(signal.failures, 1);
    assert!(signal.checks < 36);
}

#[tokio::test]
async fn test_zero_pair_count_is_skipped() {
    let mut config = fast_config();
    single_signal(&mut config);
    config.signal.pair_counts = vec![0, 1];

    let report = hilbench::run_simulated(&config, &[Category::Signal]).await.unwrap();
    let signal = &report.categories[0];
    assert_eq!(signal.checks, 1);
    assert_eq!(signal.results[0].status, TestStatus::Skipped);
    assert_eq!(signal.results[1].status, TestStatus::Pass);
}

#[tokio::test]
async fn test_large_llong_constant_round_trips() {
    let mut config = fast_config();
    config.constants.cases = vec![ConstantCase {
        cvt: CvtType::Llong,
        raw: RawType::Llong,
        values: vec![9e10],
    }];

    let report = hilbench::run_simulated(&config, &[Category::Constants]).await.unwrap();
    let constants = &report.categories[0];
    assert_eq!(constants.checks, 1);
    assert_eq!(constants.failures, 0);
}

#[tokio::test]
async fn test_constant_narrowed_by_raw_type_fails() {
    let mut config = fast_config();
    config.constants.cases = vec![ConstantCase {
        cvt: CvtType::Int,
        raw: RawType::Char,
        values: vec![1000.0],
    }];

    let report = hilbench::run_simulated(&config, &[Category::Constants]).await.unwrap();
    let constants = &report.categories[0];
    assert_eq!(constants.failures, 1);
    assert!(constants.results[0].details.contains("expected 1000, observed 127"));
}

#[tokio::test]
async fn test_string_failure_budget() {
    let mut config = fast_config();
    config.strings.candidates = vec!["abcd".to_string()];

    let report = hilbench::run_simulated(&config, &[Category::Strings]).await.unwrap();
    let strings = &report.categories[0];
    assert!(strings.aborted);
    assert_eq!(strings.checks, 6);
    assert_eq!(strings.failures, 6);
}

#[tokio::test]
async fn test_empty_candidates_are_rejected() {
    let mut config = fast_config();
    config.strings.candidates.clear();

    let err = hilbench::run_simulated(&config, &[Category::Strings]).await.unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Misconfigured {
            category: Category::Strings,
            ..
        }
    ));
}

#[tokio::test]
async fn test_fatal_error_tears_down_session() {
    let mut config = fast_config();
    single_signal(&mut config);
    let sim = SimPlatform::new(config.sim.clone());
    sim.inject_fault(EngineOp::GetRecords).await;

    let err = CampaignRunner::new(&sim, &config)
        .run(&[Category::Signal])
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Collect(CollectError::Records { .. })));
    assert!(sim.has_test("analog").await);
    assert_eq!(sim.session_phase("analog", "test_double").await, None);
}

#[tokio::test]
async fn test_fatal_error_without_teardown_leaves_session() {
    let mut config = fast_config();
    single_signal(&mut config);
    config.campaign.teardown_on_error = false;
    let sim = SimPlatform::new(config.sim.clone());
    sim.inject_fault(EngineOp::GetRecords).await;

    let err = CampaignRunner::new(&sim, &config)
        .run(&[Category::Signal])
        .await
        .unwrap_err();
    assert!(matches!(err, CampaignError::Collect(_)));
    assert_eq!(
        sim.session_phase("analog", "test_double").await,
        Some(SessionPhase::Stopped)
    );
}

#[tokio::test]
async fn test_write_failure_stops_running_session() {
    let config = fast_config();
    let sim = SimPlatform::new(config.sim.clone());
    sim.inject_fault(EngineOp::SetValue).await;

    let err = CampaignRunner::new(&sim, &config)
        .run(&[Category::Constants])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Stimulus(StimulusError::WriteFailed { .. })
    ));
    assert_eq!(sim.session_phase("analog", "test_char").await, None);

    let journal = sim.journal().await;
    let last_stop = journal.iter().rposition(|op| *op == EngineOp::StopSession);
    let last_delete = journal.iter().rposition(|op| *op == EngineOp::DeleteSession);
    assert!(last_stop < last_delete);
}

#[tokio::test]
async fn test_signal_without_samples_fails() {
    let mut config = fast_config();
    single_signal(&mut config);
    config.sim.samples_per_run = 0;

    let report = hilbench::run_simulated(&config, &[Category::Signal]).await.unwrap();
    let signal = &report.categories[0];
    assert_eq!(signal.checks, 1);
    assert_eq!(signal.failures, 1);
    assert!(signal.results[0].details.contains("no samples logged"));
    assert!(!report.passed());
}
