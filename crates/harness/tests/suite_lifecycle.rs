//! End-to-end lifecycle properties: session accounting across concurrent
//! scenarios, error-path release guarantees, and the final report.

use std::sync::Arc;
use std::time::Duration;

use gauntlet::testing::MockDriverFactory;
use gauntlet::{
    DiagnosticCapture, LifecycleController, MetricsAggregator, RetryPolicy, ScenarioContext,
    SessionConfig, SessionManager, SuiteConfig, SuiteHarness,
};

struct Rig {
    factory: MockDriverFactory,
    controller: LifecycleController,
    manager: Arc<SessionManager>,
    metrics: Arc<MetricsAggregator>,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    gauntlet::logging::init_logging(false);
    let dir = tempfile::tempdir().unwrap();
    let factory = MockDriverFactory::new();
    let manager = Arc::new(
        SessionManager::new(Arc::new(factory.clone()))
            .with_retry(RetryPolicy::fixed(3, Duration::ZERO))
            .with_acquire_timeout(Duration::from_secs(5)),
    );
    let capture = Arc::new(DiagnosticCapture::new(dir.path()).unwrap());
    let metrics = Arc::new(MetricsAggregator::new(&SuiteConfig::default()));
    metrics.record_suite_start();
    let controller = LifecycleController::new(
        manager.clone(),
        capture,
        metrics.clone(),
        SessionConfig::default(),
    );

    Rig {
        factory,
        controller,
        manager,
        metrics,
        _dir: dir,
    }
}

#[tokio::test]
async fn concurrent_scenarios_balance_acquisitions_and_releases() {
    let dir = tempfile::tempdir().unwrap();
    let suite_config = SuiteConfig::default()
        .with_artifact_dir(dir.path().join("shots"))
        .with_report_dir(dir.path().join("reports"));
    let factory = MockDriverFactory::new();
    let harness = SuiteHarness::start(
        Arc::new(factory.clone()),
        suite_config,
        SessionConfig::default(),
    )
    .unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let controller = harness.controller();
        tasks.push(tokio::spawn(async move {
            let mut ctx = ScenarioContext::new(format!("scenario {i}"), vec![]);
            controller.before_scenario(&mut ctx).await.unwrap();
            // Half the scenarios fail their body.
            if i % 2 == 0 {
                ctx.scenario.mark_passed();
            } else {
                ctx.scenario.mark_failed();
            }
            controller.after_scenario(&mut ctx).await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let manager = harness.manager();
    assert_eq!(manager.acquired(), 8);
    assert_eq!(manager.released(), 8);
    assert_eq!(factory.total_quits(), 8);

    let summary = harness.metrics().summary();
    assert_eq!(summary.total_tests, 8);
    assert_eq!(summary.passed_tests, 4);
    assert_eq!(summary.failed_tests, 4);
    assert_eq!(summary.success_rate, 50.0);

    harness.finish();
}

#[tokio::test]
async fn every_exit_path_releases_exactly_once() {
    let rig = rig();

    // Clean pass.
    let mut passed = ScenarioContext::new("passes", vec![]);
    rig.controller.before_scenario(&mut passed).await.unwrap();
    passed.scenario.mark_passed();
    rig.controller.after_scenario(&mut passed).await;

    // Assertion failure with a live driver.
    let mut failed = ScenarioContext::new("fails assertion", vec![]);
    rig.controller.before_scenario(&mut failed).await.unwrap();
    failed.scenario.mark_failed();
    rig.controller.after_scenario(&mut failed).await;

    // Driver death mid-scenario.
    let mut died = ScenarioContext::new("driver dies", vec![]);
    rig.controller.before_scenario(&mut died).await.unwrap();
    rig.factory.drivers().last().unwrap().kill();
    died.scenario.mark_failed();
    rig.controller.after_scenario(&mut died).await;

    // Acquisition failure: never acquired, nothing to release.
    rig.factory.fail_creations(10);
    let mut errored = ScenarioContext::new("never starts", vec![]);
    assert!(rig.controller.before_scenario(&mut errored).await.is_err());
    rig.controller.after_scenario(&mut errored).await;

    assert_eq!(rig.manager.acquired(), 3);
    assert_eq!(rig.manager.released(), 3);
    assert_eq!(rig.factory.total_quits(), 3);
}

#[tokio::test]
async fn transient_creation_failures_record_one_start() {
    let rig = rig();
    rig.factory.fail_creations(2);

    let mut ctx = ScenarioContext::new("flaky grid", vec![]);
    rig.controller.before_scenario(&mut ctx).await.unwrap();
    ctx.scenario.mark_passed();
    rig.controller.after_scenario(&mut ctx).await;

    let text = rig.metrics.render();
    let start_line = text
        .lines()
        .find(|l| l.starts_with("tests_started_total"))
        .expect("start sample present");
    assert!(start_line.ends_with(" 1"), "start recorded once: {start_line}");
    assert_eq!(rig.metrics.summary().total_tests, 1);
}

#[tokio::test]
async fn mid_scenario_death_skips_screenshot_and_releases_once() {
    let rig = rig();

    let mut ctx = ScenarioContext::new("page hangs forever", vec![]);
    rig.controller.before_scenario(&mut ctx).await.unwrap();
    rig.factory.drivers()[0].kill();
    rig.controller.after_scenario(&mut ctx).await;

    let driver = &rig.factory.drivers()[0];
    assert!(!driver.was_called("screenshot"));
    assert_eq!(driver.quit_calls(), 1);
    assert_eq!(rig.manager.released(), 1);
    assert_eq!(rig.metrics.summary().screenshots, 0);
}

#[tokio::test]
async fn final_report_reflects_the_whole_suite() {
    let dir = tempfile::tempdir().unwrap();
    let suite_config = SuiteConfig::default()
        .with_artifact_dir(dir.path().join("shots"))
        .with_report_dir(dir.path().join("reports"));
    let harness = SuiteHarness::start(
        Arc::new(MockDriverFactory::new()),
        suite_config.clone(),
        SessionConfig::default(),
    )
    .unwrap();
    let controller = harness.controller();

    for (name, pass) in [("a", true), ("b", true), ("c", true), ("d", false)] {
        let mut ctx = ScenarioContext::new(name, vec![]);
        controller.before_scenario(&mut ctx).await.unwrap();
        if pass {
            ctx.scenario.mark_passed();
        } else {
            ctx.scenario.mark_failed();
        }
        controller.after_scenario(&mut ctx).await;
    }
    harness.finish();

    let report = suite_config.report_dir.join("metrics-summary.json");
    let parsed: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report).unwrap()).unwrap();
    assert_eq!(parsed["totalTests"], 4);
    assert_eq!(parsed["passedTests"], 3);
    assert_eq!(parsed["failedTests"], 1);
    assert_eq!(parsed["successRate"], 75.0);
}
