//! Unit-test event log parser.
//!
//! The tool writes one JSON object per event, usually back-to-back with no
//! separator (`{...}{...}`). Only `test` events produce results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReportParseError;
use crate::models::build_error::{relative_path, strip_root};

pub const PARSER: &str = "unit-test";

const EVENT_TEST: &str = "test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestSeverity {
    Pass,
    Fail,
    Error,
    Skipped,
}

/// One `test` event, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub pass: bool,
    pub severity: TestSeverity,
    pub message: String,
    /// `file:line` per frame, relative to the working copy. Empty on pass.
    pub trace: Vec<String>,
    pub output: String,
}

/// A non-passing test located at its first stack frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestFailure {
    pub message: String,
    pub severity: TestSeverity,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitTestReport {
    pub results: Vec<TestResult>,
    pub failures: usize,
    pub errors: Vec<TestFailure>,
}

#[derive(Debug, Deserialize)]
struct TestEvent {
    #[serde(default)]
    test: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    trace: Vec<Frame>,
    #[serde(default)]
    output: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    file: String,
    #[serde(default)]
    line: Option<u32>,
}

/// Parse a raw event log. `build_path` is the working-copy root stripped
/// from trace file names.
///
/// Empty or unrecognized input yields an empty report; an unknown test
/// status is an error.
pub fn parse(raw: &str, build_path: &str) -> Result<UnitTestReport, ReportParseError> {
    let mut report = UnitTestReport::default();

    for value in normalize_events(raw) {
        if value.get("event").and_then(Value::as_str) != Some(EVENT_TEST) {
            continue;
        }
        let event: TestEvent = serde_json::from_value(value)
            .map_err(|e| ReportParseError::new(PARSER, format!("malformed test event: {e}"), raw))?;
        let result = parse_event(&event, build_path, raw)?;

        if !result.pass {
            report.failures += 1;
            let first = event.trace.first();
            report.errors.push(TestFailure {
                message: result.message.clone(),
                severity: result.severity,
                file: first.and_then(|f| relative_path(build_path, &f.file)),
                line: first.and_then(|f| f.line),
            });
        }
        report.results.push(result);
    }

    Ok(report)
}

/// Turn `{..}{..}`, `{..}\n{..}` or `[{..},{..}]` into one event sequence.
fn normalize_events(raw: &str) -> Vec<Value> {
    let mut events = Vec::new();
    for item in serde_json::Deserializer::from_str(raw).into_iter::<Value>() {
        match item {
            Ok(Value::Array(items)) => events.extend(items),
            Ok(value) => events.push(value),
            Err(e) => {
                tracing::debug!(error = %e, "Unrecognized unit-test log, treating as empty");
                return Vec::new();
            }
        }
    }
    events
}

fn parse_event(event: &TestEvent, build_path: &str, raw: &str) -> Result<TestResult, ReportParseError> {
    let message = event.message.as_deref().unwrap_or_default();
    let (pass, severity) = classify(event.status.as_deref(), message)
        .ok_or_else(|| {
            ReportParseError::new(
                PARSER,
                format!(
                    "unexpected test status: {}",
                    event.status.as_deref().unwrap_or("<missing>")
                ),
                raw,
            )
        })?;

    let mut full_message = event.test.clone();
    if !message.is_empty() {
        full_message.push('\n');
        full_message.push_str(message);
    }

    let trace = if pass {
        Vec::new()
    } else {
        event
            .trace
            .iter()
            .map(|frame| {
                let file = strip_root(build_path, &frame.file);
                match frame.line {
                    Some(line) => format!("{file}:{line}"),
                    None => file.to_string(),
                }
            })
            .collect()
    };

    Ok(TestResult {
        pass,
        severity,
        message: full_message,
        trace,
        output: event.output.clone().unwrap_or_default(),
    })
}

fn classify(status: Option<&str>, message: &str) -> Option<(bool, TestSeverity)> {
    match status? {
        "fail" => Some((false, TestSeverity::Fail)),
        "error" if message.starts_with("Skipped") || message.starts_with("Incomplete") => {
            Some((true, TestSeverity::Skipped))
        }
        "error" => Some((false, TestSeverity::Error)),
        "pass" | "warning" => Some((true, TestSeverity::Pass)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/var/ci/builds/12/";

    fn sample_log() -> String {
        [
            r#"{"event":"suiteStart","suite":"CalcTest","tests":4}"#,
            r#"{"event":"testStart","suite":"CalcTest","test":"CalcTest::testAdd"}"#,
            r#"{"event":"test","suite":"CalcTest","test":"CalcTest::testAdd","status":"pass","time":0.01,"trace":[],"message":"","output":""}"#,
            r#"{"event":"test","suite":"CalcTest","test":"CalcTest::testDiv","status":"fail","time":0.02,"trace":[{"file":"/var/ci/builds/12/tests/CalcTest.php","line":31},{"file":"/var/ci/builds/12/vendor/phpunit/Framework/TestCase.php","line":900}],"message":"Failed asserting that 1 matches expected 2.","output":"dbg"}"#,
            r#"{"event":"test","suite":"CalcTest","test":"CalcTest::testMod","status":"error","time":0.0,"trace":[{"file":"/var/ci/builds/12/src/Calc.php","line":8}],"message":"Division by zero","output":""}"#,
            r#"{"event":"test","suite":"CalcTest","test":"CalcTest::testPow","status":"error","time":0.0,"trace":[],"message":"Skipped Test: not implemented","output":""}"#,
        ]
        .concat()
    }

    #[test]
    fn parses_concatenated_events() {
        let report = parse(&sample_log(), ROOT).expect("parse");

        assert_eq!(report.results.len(), 4);
        assert_eq!(report.failures, 2);

        let div = &report.results[1];
        assert!(!div.pass);
        assert_eq!(div.severity, TestSeverity::Fail);
        assert_eq!(
            div.message,
            "CalcTest::testDiv\nFailed asserting that 1 matches expected 2."
        );
        assert_eq!(
            div.trace,
            ["tests/CalcTest.php:31", "vendor/phpunit/Framework/TestCase.php:900"]
        );
        assert_eq!(div.output, "dbg");

        let skipped = &report.results[3];
        assert!(skipped.pass);
        assert_eq!(skipped.severity, TestSeverity::Skipped);
        assert!(skipped.trace.is_empty());
    }

    #[test]
    fn errors_use_first_frame() {
        let report = parse(&sample_log(), ROOT).expect("parse");
        assert_eq!(
            report.errors,
            vec![
                TestFailure {
                    message: "CalcTest::testDiv\nFailed asserting that 1 matches expected 2."
                        .to_string(),
                    severity: TestSeverity::Fail,
                    file: Some("tests/CalcTest.php".to_string()),
                    line: Some(31),
                },
                TestFailure {
                    message: "CalcTest::testMod\nDivision by zero".to_string(),
                    severity: TestSeverity::Error,
                    file: Some("src/Calc.php".to_string()),
                    line: Some(8),
                },
            ]
        );
    }

    #[test]
    fn concatenated_and_array_forms_agree() {
        let events = [
            r#"{"event":"test","test":"A::a","status":"pass","trace":[],"message":"","output":""}"#,
            r#"{"event":"test","test":"A::b","status":"error","trace":[],"message":"Incomplete: later","output":""}"#,
            r#"{"event":"test","test":"A::c","status":"warning","trace":[],"message":"risky","output":""}"#,
        ];
        let concatenated = parse(&events.concat(), ROOT).expect("concatenated");
        let array = parse(&format!("[{}]", events.join(",")), ROOT).expect("array");
        let newline = parse(&events.join("\n"), ROOT).expect("newline");

        assert_eq!(concatenated, array);
        assert_eq!(concatenated, newline);
        assert_eq!(concatenated.failures, 0);
    }

    #[test]
    fn failure_count_matches_fail_and_error_severities() {
        let report = parse(&sample_log(), ROOT).expect("parse");
        let failing = report
            .results
            .iter()
            .filter(|r| matches!(r.severity, TestSeverity::Fail | TestSeverity::Error))
            .count();
        assert_eq!(report.failures, failing);
    }

    #[test]
    fn empty_or_garbage_input_yields_nothing() {
        for raw in ["", "   \n", "PHPUnit 5.7 by Sebastian Bergmann", "{\"event\":"] {
            let report = parse(raw, ROOT).expect("no error");
            assert!(report.results.is_empty());
            assert_eq!(report.failures, 0);
        }
    }

    #[test]
    fn unknown_status_is_an_error() {
        let raw = r#"{"event":"test","test":"A::a","status":"exploded","trace":[],"message":"","output":""}"#;
        let err = parse(raw, ROOT).expect_err("unknown status");
        assert!(err.message.contains("exploded"));
        assert_eq!(err.raw, raw);
    }

    #[test]
    fn frames_outside_the_working_copy_keep_no_file() {
        let raw = r#"{"event":"test","test":"A::a","status":"fail","trace":[{"file":"/usr/share/php/Runner.php","line":3}],"message":"x","output":""}"#;
        let report = parse(raw, ROOT).expect("parse");
        assert_eq!(report.errors[0].file, None);
        assert_eq!(report.errors[0].line, Some(3));
        assert_eq!(report.results[0].trace, ["/usr/share/php/Runner.php:3"]);
    }
}
