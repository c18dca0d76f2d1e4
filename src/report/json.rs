use std::path::{Path, PathBuf};

use serde::Serialize;

use super::GeneralReport;
use crate::error::Result;

pub const REPORT_FILE: &str = "generalReport.json";

/// Render the report as JSON indented with four spaces.
pub fn render_json(report: &GeneralReport) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    report.serialize(&mut ser)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write `generalReport.json` into `dir` and return its path.
pub fn write_report(report: &GeneralReport, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(REPORT_FILE);
    std::fs::write(&path, render_json(report)?)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CodeAnalysis, Language};
    use crate::report::{assemble, ReportInputs};
    use crate::scanner::{TrivyMode, TrivyResult};

    #[test]
    fn written_report_is_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let trivy = TrivyResult::default();
        let report = assemble(&ReportInputs {
            image: "nginx:latest",
            language: Language::Java,
            report_folder: dir.path(),
            trivy: &trivy,
            mode: TrivyMode::Precise,
            code: &CodeAnalysis::Skipped,
        });

        let path = write_report(&report, dir.path()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();

        assert_eq!(path, dir.path().join(REPORT_FILE));
        assert!(text.contains("\n    \"imageName\": \"nginx:latest\""));
        assert_eq!(value["analysis"]["trivy"]["imageOS"], "unsupported");
        assert_eq!(value["analysis"]["code"], "skipped");
    }
}
