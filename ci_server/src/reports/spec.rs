//! Behaviour-spec report parser (JUnit-style XML).
//!
//! The result is a whole-report summary stored in build metadata rather
//! than a list of line-addressable diagnostics.

use serde::{Deserialize, Serialize};

use crate::error::ReportParseError;
use crate::reports::attr;

pub const PARSER: &str = "spec";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpecReport {
    pub time: f64,
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub suites: Vec<SuiteSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub name: String,
    pub time: f64,
    pub tests: u32,
    pub failures: u32,
    pub errors: u32,
    pub skipped: u32,
    pub cases: Vec<CaseSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseSummary {
    pub name: String,
    pub classname: String,
    pub time: f64,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CaseError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseError {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

const STATUS_FAILED: &str = "failed";

pub fn parse(xml: &str) -> Result<SpecReport, ReportParseError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| ReportParseError::new(PARSER, e.to_string(), xml))?;
    let root = doc.root_element();
    if !root.has_tag_name("testsuites") {
        return Err(ReportParseError::new(
            PARSER,
            format!("unexpected root element <{}>", root.tag_name().name()),
            xml,
        ));
    }

    let suites = root
        .children()
        .filter(|n| n.has_tag_name("testsuite"))
        .map(|suite| SuiteSummary {
            name: suite.attribute("name").unwrap_or_default().to_string(),
            time: attr(&suite, "time").unwrap_or(0.0),
            tests: attr(&suite, "tests").unwrap_or(0),
            failures: attr(&suite, "failures").unwrap_or(0),
            errors: attr(&suite, "errors").unwrap_or(0),
            skipped: attr(&suite, "skipped").unwrap_or(0),
            cases: suite
                .children()
                .filter(|n| n.has_tag_name("testcase"))
                .map(|case| parse_case(&case))
                .collect(),
        })
        .collect();

    Ok(SpecReport {
        time: attr(&root, "time").unwrap_or(0.0),
        tests: attr(&root, "tests").unwrap_or(0),
        failures: attr(&root, "failures").unwrap_or(0),
        errors: attr(&root, "errors").unwrap_or(0),
        suites,
    })
}

fn parse_case(case: &roxmltree::Node<'_, '_>) -> CaseSummary {
    let status = case.attribute("status").unwrap_or_default().to_string();

    let error = (status == STATUS_FAILED).then(|| {
        let mut error = CaseError::default();
        // Last element wins if a tool emits several.
        for failure in case.children().filter(|n| n.has_tag_name("failure")) {
            error.kind = Some(failure.attribute("type").unwrap_or_default().to_string());
            error.message = Some(failure.attribute("message").unwrap_or_default().to_string());
        }
        for system_err in case.children().filter(|n| n.has_tag_name("system-err")) {
            error.raw = Some(system_err.text().unwrap_or_default().to_string());
        }
        error
    });

    CaseSummary {
        name: case.attribute("name").unwrap_or_default().to_string(),
        classname: case.attribute("classname").unwrap_or_default().to_string(),
        time: attr(case, "time").unwrap_or(0.0),
        status,
        error,
    }
}
