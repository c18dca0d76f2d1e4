use super::{CodeSection, GeneralReport, SizeMetric};
use crate::severity::SeverityCounts;

/// Render a short terminal summary of a finished image audit.
pub fn render(report: &GeneralReport) -> String {
    let mut output = String::new();
    let analysis = &report.analysis;

    output.push_str(&format!(
        "\n  {} ({}, {} mode)\n\n",
        report.image_name, report.language, analysis.trivy.mode
    ));
    output.push_str(&format!(
        "  {:<16} {:>6} {:>6} {:>6} {:>6}\n",
        "", "LOW", "MEDIUM", "HIGH", "TOTAL"
    ));
    output.push_str(&row("OS packages", &analysis.trivy.os_vulnerabilities));
    output.push_str(&row("Dependencies", &analysis.trivy.dependencies_vulnerabilities));
    match &analysis.code {
        CodeSection::Analyzed(detail) => output.push_str(&row("Code", &detail.vulnerabilities)),
        CodeSection::Skipped(_) => output.push_str(&format!("  {:<16} skipped\n", "Code")),
    }
    output.push_str(&row("Total", &analysis.summary.counts()));

    let size = match analysis.summary.size {
        SizeMetric::Measured(n) => n.to_string(),
        SizeMetric::Skipped(_) => "skipped".into(),
    };
    output.push_str(&format!(
        "\n  Image OS: {}  language files: {}  code size: {}\n",
        analysis.trivy.image_os, analysis.trivy.files_analyzed, size
    ));
    output.push_str(&format!("  Reports generated at {}\n\n", report.report_folder));

    output
}

fn row(label: &str, counts: &SeverityCounts) -> String {
    format!(
        "  {:<16} {:>6} {:>6} {:>6} {:>6}\n",
        label,
        counts.low,
        counts.medium,
        counts.high,
        counts.total()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CodeAnalysis, Language};
    use crate::report::{assemble, ReportInputs};
    use crate::scanner::{TrivyMode, TrivyResult};
    use std::path::Path;

    #[test]
    fn skipped_code_row() {
        let trivy = TrivyResult::default();
        let report = assemble(&ReportInputs {
            image: "app:latest",
            language: Language::Python,
            report_folder: Path::new("/work/reports"),
            trivy: &trivy,
            mode: TrivyMode::Precise,
            code: &CodeAnalysis::Skipped,
        });
        let text = render(&report);
        assert!(text.contains("app:latest (python, precise mode)"));
        assert!(text.contains(&format!("  {:<16} skipped", "Code")));
        assert!(text.contains("Reports generated at /work/reports"));
    }

    #[test]
    fn rows_end_with_total() {
        assert_eq!(
            row("Dependencies", &SeverityCounts::new(1, 2, 3)),
            format!("  {:<16} {:>6} {:>6} {:>6} {:>6}\n", "Dependencies", 1, 2, 3, 6)
        );
    }
}
