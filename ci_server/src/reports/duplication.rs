//! Copy/paste detector report parser (PMD-CPD XML).
//!
//! ```xml
//! <pmd-cpd>
//!   <duplication lines="12" tokens="80">
//!     <file path="/build/src/A.php" line="10"/>
//!     <file path="/build/src/B.php" line="40"/>
//!     <codefragment><![CDATA[...]]></codefragment>
//!   </duplication>
//! </pmd-cpd>
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ReportParseError;
use crate::models::build_error::{relative_path, Diagnostic, Severity};
use crate::reports::attr;

pub const PARSER: &str = "duplication";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicationReport {
    /// One per `<duplication>` block.
    pub warnings: usize,
    /// One per file span.
    pub diagnostics: Vec<Diagnostic>,
}

pub fn parse(xml: &str, build_path: &str) -> Result<DuplicationReport, ReportParseError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| ReportParseError::new(PARSER, e.to_string(), xml))?;
    let root = doc.root_element();
    if !root.has_tag_name("pmd-cpd") {
        return Err(ReportParseError::new(
            PARSER,
            format!("unexpected root element <{}>", root.tag_name().name()),
            xml,
        ));
    }

    let mut report = DuplicationReport::default();

    for duplication in root
        .children()
        .filter(|n| n.has_tag_name("duplication"))
    {
        let lines: u32 = attr(&duplication, "lines").unwrap_or(0);
        let fragment = duplication
            .children()
            .find(|n| n.has_tag_name("codefragment"))
            .and_then(|n| n.text())
            .unwrap_or_default();
        let message = format!("Copy and paste detected:\n\n```\n{fragment}\n```");

        for file in duplication.children().filter(|n| n.has_tag_name("file")) {
            let path = file.attribute("path").unwrap_or_default();
            let line_start: Option<u32> = attr(&file, "line");
            let line_end = line_start.map(|start| start.saturating_add(lines.saturating_sub(1)));

            report.diagnostics.push(
                Diagnostic::new(message.clone(), Severity::Normal).at(
                    relative_path(build_path, path),
                    line_start,
                    line_end,
                ),
            );
        }

        report.warnings += 1;
    }

    Ok(report)
}
