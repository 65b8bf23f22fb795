//! Process-wide test metrics.
//!
//! One [`MetricsAggregator`] is constructed at suite start and shared by
//! `Arc` with every lifecycle call site; there is no module-level singleton.
//! It is the only state shared across concurrent scenario tasks, so all
//! mutation happens under a single mutex and consists of counter increments
//! and labeled gauge sets. Recording never fails: malformed durations are
//! coerced to zero, and report I/O errors surface as [`HarnessError::Metrics`]
//! for the caller to log and swallow.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::ArtifactKind;
use crate::config::{BrowserKind, SuiteConfig};
use crate::error::{HarnessError, Result};

/// Histogram bucket bounds in seconds, shared by all duration histograms.
const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

type LabelSet = BTreeMap<String, String>;

#[derive(Debug, Default)]
struct Histogram {
    bucket_counts: Vec<u64>,
    sum: f64,
    count: u64,
}

impl Histogram {
    fn observe(&mut self, value: f64) {
        if self.bucket_counts.is_empty() {
            self.bucket_counts = vec![0; DURATION_BUCKETS.len()];
        }
        for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
            if value <= *bound {
                self.bucket_counts[i] += 1;
            }
        }
        self.sum += value;
        self.count += 1;
    }
}

#[derive(Debug, Default)]
struct Registry {
    counters: BTreeMap<String, BTreeMap<LabelSet, u64>>,
    gauges: BTreeMap<String, BTreeMap<LabelSet, f64>>,
    histograms: BTreeMap<String, BTreeMap<LabelSet, Histogram>>,
}

/// Cross-scenario counters, histograms, and gauges plus the derived summary.
#[derive(Debug)]
pub struct MetricsAggregator {
    environment: String,
    build_number: String,
    git_branch: String,
    registry: Mutex<Registry>,
}

/// JSON summary handed to reports and the query endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSummary {
    pub timestamp: String,
    pub environment: String,
    pub build_number: String,
    pub git_branch: String,
    pub total_tests: u64,
    pub passed_tests: u64,
    pub failed_tests: u64,
    pub total_errors: u64,
    pub screenshots: u64,
    pub browser_actions: u64,
    pub success_rate: f64,
}

impl MetricsAggregator {
    pub fn new(config: &SuiteConfig) -> Self {
        Self {
            environment: config.environment.clone(),
            build_number: config.build_number.clone(),
            git_branch: config.git_branch.clone(),
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Marks the beginning of the suite; [`Self::generate_report`] measures
    /// suite duration from this instant.
    pub fn record_suite_start(&self) {
        let now = Utc::now().timestamp() as f64;
        self.set_gauge("suite_start_timestamp", &[], now);
        self.set_gauge("active_tests", &[], 0.0);
    }

    pub fn record_test_start(&self, scenario: &str, browser: BrowserKind) {
        self.inc_counter(
            "tests_started_total",
            &[("scenario", scenario), ("browser", &browser.to_string())],
        );
        self.add_gauge("active_tests", &[], 1.0);
    }

    pub fn record_test_success(&self, scenario: &str, browser: BrowserKind, duration_secs: f64) {
        self.record_outcome(scenario, browser, "passed", duration_secs);
        self.set_gauge("last_scenario_result", &[], 1.0);
    }

    pub fn record_test_failure(&self, scenario: &str, browser: BrowserKind, duration_secs: f64) {
        self.record_outcome(scenario, browser, "failed", duration_secs);
        self.set_gauge("last_scenario_result", &[], 0.0);
    }

    /// Dispatches to success or failure recording based on `passed`.
    pub fn record_test_completion(
        &self,
        scenario: &str,
        browser: BrowserKind,
        passed: bool,
        duration_secs: f64,
    ) {
        if passed {
            self.record_test_success(scenario, browser, duration_secs);
        } else {
            self.record_test_failure(scenario, browser, duration_secs);
        }
        self.add_gauge("active_tests", &[], -1.0);
    }

    pub fn record_error(&self, error_type: &str) {
        self.inc_counter("errors_total", &[("error_type", error_type)]);
    }

    pub fn record_screenshot(&self, kind: ArtifactKind) {
        let kind = match kind {
            ArtifactKind::Failure => "failure",
            ArtifactKind::Manual => "manual",
            ArtifactKind::FullPage => "fullpage",
            ArtifactKind::Comparison => "comparison",
        };
        self.inc_counter("screenshots_total", &[("type", kind)]);
    }

    pub fn record_browser_action(&self, action: &str) {
        self.inc_counter("browser_actions_total", &[("action", action)]);
    }

    pub fn record_page_load(&self, duration_secs: f64) {
        self.observe_histogram("page_load_duration_seconds", &[], duration_secs);
    }

    fn record_outcome(&self, scenario: &str, browser: BrowserKind, status: &str, duration: f64) {
        let browser = browser.to_string();
        self.inc_counter(
            "tests_total",
            &[
                ("scenario", scenario),
                ("status", status),
                ("browser", &browser),
            ],
        );
        self.observe_histogram("test_duration_seconds", &[("browser", &browser)], duration);
    }

    /// Current summary derived from the raw samples.
    pub fn summary(&self) -> TestSummary {
        let registry = self.registry.lock();
        let passed = sum_matching(&registry.counters, "tests_total", Some(("status", "passed")));
        let failed = sum_matching(&registry.counters, "tests_total", Some(("status", "failed")));
        let total = passed + failed;
        let success_rate = if total == 0 {
            0.0
        } else {
            round2(passed as f64 / total as f64 * 100.0)
        };

        TestSummary {
            timestamp: Utc::now().to_rfc3339(),
            environment: self.environment.clone(),
            build_number: self.build_number.clone(),
            git_branch: self.git_branch.clone(),
            total_tests: total,
            passed_tests: passed,
            failed_tests: failed,
            total_errors: sum_matching(&registry.counters, "errors_total", None),
            screenshots: sum_matching(&registry.counters, "screenshots_total", None),
            browser_actions: sum_matching(&registry.counters, "browser_actions_total", None),
            success_rate,
        }
    }

    /// Writes the JSON summary to `dir/metrics-summary.json` and updates the
    /// suite duration gauge. Returns the report path.
    pub fn generate_report(&self, dir: &Path) -> Result<PathBuf> {
        let started = self.gauge_value("suite_start_timestamp").unwrap_or(0.0);
        if started > 0.0 {
            let duration = (Utc::now().timestamp() as f64 - started).max(0.0);
            self.set_gauge("suite_duration_seconds", &[], duration);
        }

        std::fs::create_dir_all(dir)
            .map_err(|err| HarnessError::Metrics(format!("creating report dir: {err}")))?;
        let path = dir.join("metrics-summary.json");
        let summary = self.summary();
        let json = serde_json::to_string_pretty(&summary)
            .map_err(|err| HarnessError::Metrics(format!("serializing summary: {err}")))?;
        std::fs::write(&path, json)
            .map_err(|err| HarnessError::Metrics(format!("writing report: {err}")))?;

        debug!(target = "gauntlet.metrics", path = %path.display(), "report written");
        Ok(path)
    }

    /// Prometheus-style text exposition of every registered sample.
    pub fn render(&self) -> String {
        let registry = self.registry.lock();
        let mut out = String::new();

        for (name, series) in &registry.counters {
            out.push_str(&format!("# TYPE {name} counter\n"));
            for (labels, value) in series {
                out.push_str(&format!("{name}{} {value}\n", render_labels(labels, None)));
            }
        }
        for (name, series) in &registry.gauges {
            out.push_str(&format!("# TYPE {name} gauge\n"));
            for (labels, value) in series {
                out.push_str(&format!("{name}{} {value}\n", render_labels(labels, None)));
            }
        }
        for (name, series) in &registry.histograms {
            out.push_str(&format!("# TYPE {name} histogram\n"));
            for (labels, hist) in series {
                for (i, bound) in DURATION_BUCKETS.iter().enumerate() {
                    let count = hist.bucket_counts.get(i).copied().unwrap_or(0);
                    out.push_str(&format!(
                        "{name}_bucket{} {count}\n",
                        render_labels(labels, Some(&bound.to_string()))
                    ));
                }
                out.push_str(&format!(
                    "{name}_bucket{} {}\n",
                    render_labels(labels, Some("+Inf")),
                    hist.count
                ));
                out.push_str(&format!(
                    "{name}_sum{} {}\n",
                    render_labels(labels, None),
                    hist.sum
                ));
                out.push_str(&format!(
                    "{name}_count{} {}\n",
                    render_labels(labels, None),
                    hist.count
                ));
            }
        }
        out
    }

    fn inc_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = self.label_set(labels);
        let mut registry = self.registry.lock();
        *registry
            .counters
            .entry(name.to_string())
            .or_default()
            .entry(labels)
            .or_insert(0) += 1;
    }

    fn set_gauge(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let labels = self.label_set(labels);
        let mut registry = self.registry.lock();
        registry
            .gauges
            .entry(name.to_string())
            .or_default()
            .insert(labels, value);
    }

    fn add_gauge(&self, name: &str, labels: &[(&str, &str)], delta: f64) {
        let labels = self.label_set(labels);
        let mut registry = self.registry.lock();
        *registry
            .gauges
            .entry(name.to_string())
            .or_default()
            .entry(labels)
            .or_insert(0.0) += delta;
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let value = coerce_duration(value);
        let labels = self.label_set(labels);
        let mut registry = self.registry.lock();
        registry
            .histograms
            .entry(name.to_string())
            .or_default()
            .entry(labels)
            .or_default()
            .observe(value);
    }

    fn gauge_value(&self, name: &str) -> Option<f64> {
        let registry = self.registry.lock();
        registry.gauges.get(name)?.values().next().copied()
    }

    /// Every sample carries the suite environment label.
    fn label_set(&self, labels: &[(&str, &str)]) -> LabelSet {
        let mut set: LabelSet = labels
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        set.insert("environment".to_string(), self.environment.clone());
        set
    }
}

/// Malformed durations (NaN, infinities, negatives) become zero; metrics
/// recording must never reject input.
fn coerce_duration(value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn sum_matching(
    counters: &BTreeMap<String, BTreeMap<LabelSet, u64>>,
    name: &str,
    filter: Option<(&str, &str)>,
) -> u64 {
    counters
        .get(name)
        .map(|series| {
            series
                .iter()
                .filter(|(labels, _)| match filter {
                    Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
                    None => true,
                })
                .map(|(_, v)| v)
                .sum()
        })
        .unwrap_or(0)
}

fn render_labels(labels: &LabelSet, le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    if let Some(le) = le {
        parts.push(format!("le=\"{le}\""));
    }
    format!("{{{}}}", parts.join(","))
}

/// Backslash, double quote, and newline must not appear raw inside a quoted
/// label value.
fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> MetricsAggregator {
        MetricsAggregator::new(&SuiteConfig::default())
    }

    #[test]
    fn success_rate_rounds_to_two_decimals() {
        let metrics = aggregator();
        for i in 0..3 {
            metrics.record_test_completion(&format!("s{i}"), BrowserKind::Chrome, true, 1.0);
        }
        metrics.record_test_completion("s3", BrowserKind::Chrome, false, 1.0);

        let summary = metrics.summary();
        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.passed_tests, 3);
        assert_eq!(summary.failed_tests, 1);
        assert_eq!(summary.success_rate, 75.00);
    }

    #[test]
    fn empty_suite_has_zero_success_rate() {
        let summary = aggregator().summary();
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[test]
    fn thirds_round_correctly() {
        let metrics = aggregator();
        metrics.record_test_completion("a", BrowserKind::Chrome, true, 1.0);
        metrics.record_test_completion("b", BrowserKind::Chrome, true, 1.0);
        metrics.record_test_completion("c", BrowserKind::Chrome, false, 1.0);
        assert_eq!(metrics.summary().success_rate, 66.67);
    }

    #[test]
    fn nan_duration_is_recorded_as_zero() {
        let metrics = aggregator();
        metrics.record_test_completion("flaky", BrowserKind::Firefox, true, f64::NAN);
        metrics.record_test_completion("slow", BrowserKind::Firefox, true, f64::INFINITY);

        let text = metrics.render();
        // Both observations landed in every bucket, including the smallest.
        assert!(text.contains("test_duration_seconds_sum"));
        assert!(!text.contains("NaN"));
        assert_eq!(metrics.summary().total_tests, 2);
    }

    #[test]
    fn start_and_completion_are_separate_counters() {
        let metrics = aggregator();
        metrics.record_test_start("login", BrowserKind::Chrome);
        metrics.record_test_completion("login", BrowserKind::Chrome, true, 2.0);

        let text = metrics.render();
        assert!(text.contains("tests_started_total"));
        assert!(text.contains("status=\"passed\""));
    }

    #[test]
    fn active_tests_gauge_tracks_in_flight_scenarios() {
        let metrics = aggregator();
        metrics.record_suite_start();
        metrics.record_test_start("a", BrowserKind::Chrome);
        metrics.record_test_start("b", BrowserKind::Chrome);
        assert_eq!(metrics.gauge_value("active_tests"), Some(2.0));

        metrics.record_test_completion("a", BrowserKind::Chrome, true, 1.0);
        assert_eq!(metrics.gauge_value("active_tests"), Some(1.0));
    }

    #[test]
    fn errors_and_screenshots_counted_in_summary() {
        let metrics = aggregator();
        metrics.record_error("timeout");
        metrics.record_error("session_creation");
        metrics.record_screenshot(ArtifactKind::Failure);
        metrics.record_browser_action("click");

        let summary = metrics.summary();
        assert_eq!(summary.total_errors, 2);
        assert_eq!(summary.screenshots, 1);
        assert_eq!(summary.browser_actions, 1);
    }

    #[test]
    fn render_exposes_all_sample_families() {
        let metrics = aggregator();
        metrics.record_suite_start();
        metrics.record_test_start("login", BrowserKind::Chrome);
        metrics.record_test_completion("login", BrowserKind::Chrome, false, 3.2);
        metrics.record_error("assertion");
        metrics.record_screenshot(ArtifactKind::Failure);
        metrics.record_browser_action("navigate");
        metrics.record_page_load(0.8);

        let text = metrics.render();
        for family in [
            "tests_total",
            "tests_started_total",
            "errors_total",
            "screenshots_total",
            "browser_actions_total",
            "test_duration_seconds_bucket",
            "page_load_duration_seconds_count",
            "active_tests",
            "last_scenario_result",
            "suite_start_timestamp",
        ] {
            assert!(text.contains(family), "missing {family} in exposition");
        }
        assert!(text.contains("le=\"+Inf\""));
        assert!(text.contains("environment=\"local\""));
    }

    #[test]
    fn label_values_are_escaped_in_exposition() {
        let metrics = aggregator();
        metrics.record_test_completion(
            "user types \"quote\" and \\backslash\\",
            BrowserKind::Chrome,
            true,
            1.0,
        );

        let text = metrics.render();
        let line = text
            .lines()
            .find(|l| l.starts_with("tests_total"))
            .unwrap();
        assert!(line.contains("scenario=\"user types \\\"quote\\\" and \\\\backslash\\\\\""));
        // Every sample line still has balanced, well-formed braces.
        assert_eq!(line.matches('{').count(), 1);
        assert_eq!(line.matches('}').count(), 1);
    }

    #[test]
    fn report_is_persisted_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let metrics = aggregator();
        metrics.record_suite_start();
        metrics.record_test_completion("login", BrowserKind::Chrome, true, 1.5);

        let path = metrics.generate_report(dir.path()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let parsed: TestSummary = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.total_tests, 1);
        assert_eq!(parsed.success_rate, 100.0);
        assert!(contents.contains("\"successRate\""));
        assert!(metrics.gauge_value("suite_duration_seconds").is_some());
    }

    #[test]
    fn summary_serializes_expected_field_names() {
        let json = serde_json::to_value(aggregator().summary()).unwrap();
        for field in [
            "timestamp",
            "environment",
            "buildNumber",
            "gitBranch",
            "totalTests",
            "passedTests",
            "failedTests",
            "totalErrors",
            "screenshots",
            "browserActions",
            "successRate",
        ] {
            assert!(json.get(field).is_some(), "missing field {field}");
        }
    }
}
