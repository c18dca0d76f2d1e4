use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

use super::{ConsoleSummary, ReportExtractor, ScanCounts, TrivyMode};
use crate::config::ToolPaths;
use crate::error::{AuditError, Result};
use crate::exec::{CommandRunner, Invocation, ToolOutput};
use crate::severity::{Severity, SeverityCounts};

/// Table report written into the output directory.
pub const REPORT_FILE: &str = "trivyReport.txt";

static DETECTED_OS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Detected OS:?\s+(.+)").unwrap());

static LANGUAGE_FILES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Number of language-specific files\s+num=(\d+)").unwrap());

static SEVERITY_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"LOW: (\d+), MEDIUM: (\d+), HIGH: (\d+), CRITICAL: (\d+)").unwrap()
});

static SEVERITY_PAIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]+): (\d+)").unwrap());

static FATAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"FATAL").unwrap());

/// Regex extractor for Trivy's console log and `--format=table` report.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivyTableExtractor;

impl ReportExtractor for TrivyTableExtractor {
    fn console_summary(&self, console: &str) -> ConsoleSummary {
        let detected_os = DETECTED_OS_RE
            .captures(console)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|os| !os.is_empty());

        let language_files = match LANGUAGE_FILES_RE
            .captures(console)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<u64>().ok())
        {
            Some(n) => n,
            None => {
                tracing::warn!("language-specific file count missing from trivy output, assuming 0");
                0
            }
        };

        ConsoleSummary {
            detected_os,
            language_files,
        }
    }

    fn severity_counts(&self, report: &str) -> ScanCounts {
        let mut counts = ScanCounts::default();
        let mut first = true;

        for line in SEVERITY_LINE_RE.find_iter(report) {
            let mut triple = SeverityCounts::default();
            for pair in SEVERITY_PAIR_RE.captures_iter(line.as_str()) {
                let Some(severity) = Severity::from_str_lenient(&pair[1]) else {
                    continue;
                };
                triple.record(severity, pair[2].parse().unwrap_or(0));
            }
            // The first summary line belongs to the OS package table.
            if first {
                counts.os = triple;
                first = false;
            } else {
                counts.dependencies += triple;
            }
        }

        counts
    }
}

/// Everything the image audit takes from the scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrivyResult {
    pub counts: ScanCounts,
    pub summary: ConsoleSummary,
    pub report_path: PathBuf,
}

impl TrivyResult {
    /// OS label used in reports.
    pub fn image_os(&self) -> &str {
        self.summary.detected_os.as_deref().unwrap_or("unsupported")
    }
}

/// Trivy writes its console log to stderr; stdout only carries `--help`
/// text when the command line was malformed.
pub fn classify(tool: &str, output: &ToolOutput) -> Result<()> {
    if !output.stdout.trim().is_empty() {
        return Err(AuditError::ToolUsage {
            tool: tool.to_string(),
            stdout: output.stdout.clone(),
            stderr: output.stderr.clone(),
        });
    }
    if FATAL_RE.is_match(&output.stderr) {
        return Err(AuditError::ToolFatal {
            tool: tool.to_string(),
            diagnostics: format!("{}{}", output.stdout, output.stderr),
        });
    }
    Ok(())
}

pub fn scan_invocation(tools: &ToolPaths, image: &str, report: &Path, mode: TrivyMode) -> Invocation {
    Invocation::new(&tools.trivy).args([
        "image".to_string(),
        "--format=table".to_string(),
        format!("--output={}", report.display()),
        "--parallel=0".to_string(),
        format!("--detection-priority={}", mode),
        image.to_string(),
    ])
}

/// Scan an image, writing the table report into `output_dir`.
pub fn scan_image(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    extractor: &dyn ReportExtractor,
    image: &str,
    output_dir: &Path,
    mode: TrivyMode,
) -> Result<TrivyResult> {
    tracing::info!(%image, %mode, "starting trivy analysis");
    tracing::info!("the vulnerability database download can take some time");

    let report_path = output_dir.join(REPORT_FILE);
    let output = runner.run(&scan_invocation(tools, image, &report_path, mode))?;
    classify(&tools.trivy, &output)?;

    let summary = extractor.console_summary(&output.stderr);
    log_summary(&summary);

    let report = std::fs::read_to_string(&report_path)?;
    let counts = extractor.severity_counts(&report);

    Ok(TrivyResult {
        counts,
        summary,
        report_path,
    })
}

fn log_summary(summary: &ConsoleSummary) {
    match &summary.detected_os {
        Some(os) => tracing::info!(%os, "trivy image: supported OS found"),
        None => tracing::info!("trivy image: OS not supported"),
    }
    match summary.language_files {
        0 => tracing::info!("trivy image: no language-specific files have been found"),
        n => tracing::info!(files = n, "trivy image: found language-specific files"),
    }
}

/// Outcome of running the scanner with caller-supplied arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Passthrough {
    /// The scanner printed usage text; both streams verbatim.
    Usage { stdout: String, stderr: String },
    /// The scanner ran; its console log plus the extracted facts.
    Scanned {
        summary: ConsoleSummary,
        console: String,
    },
}

/// Run trivy with arbitrary arguments (plus `--no-progress`).
pub fn passthrough(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    extractor: &dyn ReportExtractor,
    args: &[String],
) -> Result<Passthrough> {
    let output = runner.run(
        &Invocation::new(&tools.trivy)
            .args(args.iter().cloned())
            .arg("--no-progress"),
    )?;

    if !output.stdout.is_empty() {
        return Ok(Passthrough::Usage {
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }

    Ok(Passthrough::Scanned {
        summary: extractor.console_summary(&output.stderr),
        console: output.stderr,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;

    const CONSOLE: &str = "\
2024-06-01T10:00:00.000Z\tINFO\tVulnerability scanning is enabled
2024-06-01T10:00:01.000Z\tINFO\tDetected OS\tfamily=\"debian\" version=\"12.5\"
2024-06-01T10:00:01.000Z\tINFO\t[debian] Detecting vulnerabilities...\tos_version=\"12\" pkg_num=125
2024-06-01T10:00:01.000Z\tINFO\tNumber of language-specific files\tnum=3
";

    const REPORT: &str = "\
app:latest (debian 12.5)
========================
Total: 4 (LOW: 2, MEDIUM: 1, HIGH: 0, CRITICAL: 1)

usr/local/lib/python3.12/site-packages/requests-2.25.0.dist-info/METADATA (python-pkg)
Total: 3 (LOW: 0, MEDIUM: 1, HIGH: 1, CRITICAL: 1)

app/requirements.txt (pip)
Total: 5 (LOW: 1, MEDIUM: 2, HIGH: 2, CRITICAL: 0)
";

    #[test]
    fn first_severity_line_is_os() {
        let counts = TrivyTableExtractor.severity_counts(
            "Total: 4 (LOW: 2, MEDIUM: 1, HIGH: 0, CRITICAL: 1)\n",
        );
        assert_eq!(counts.os, SeverityCounts::new(2, 1, 1));
        assert_eq!(counts.dependencies, SeverityCounts::default());
    }

    #[test]
    fn later_lines_accumulate_into_dependencies() {
        let counts = TrivyTableExtractor.severity_counts(REPORT);
        assert_eq!(counts.os, SeverityCounts::new(2, 1, 1));
        assert_eq!(counts.dependencies, SeverityCounts::new(1, 3, 4));
        assert_eq!(counts.total(), SeverityCounts::new(3, 4, 5));
    }

    #[test]
    fn console_summary_extracts_os_and_files() {
        let summary = TrivyTableExtractor.console_summary(CONSOLE);
        assert_eq!(
            summary.detected_os.as_deref(),
            Some("family=\"debian\" version=\"12.5\"")
        );
        assert_eq!(summary.language_files, 3);
    }

    #[test]
    fn console_summary_without_os() {
        let summary = TrivyTableExtractor
            .console_summary("INFO\tNumber of language-specific files\tnum=0\n");
        assert_eq!(summary.detected_os, None);
        assert_eq!(summary.language_files, 0);
        let result = TrivyResult {
            summary,
            ..TrivyResult::default()
        };
        assert_eq!(result.image_os(), "unsupported");
    }

    #[test]
    fn stdout_means_usage_error() {
        let out = ToolOutput {
            code: Some(1),
            stdout: "Usage:\n  trivy image [flags] IMAGE_NAME\n".into(),
            stderr: "Error: unknown flag\n".into(),
        };
        let err = classify("trivy", &out).unwrap_err();
        assert!(matches!(err, AuditError::ToolUsage { .. }));
        assert!(err.is_usage());
    }

    #[test]
    fn fatal_in_log_is_fatal() {
        let out = ToolOutput::failed(1, "2024-06-01T10:00:00Z\tFATAL\tFatal error\timage not found");
        let err = classify("trivy", &out).unwrap_err();
        assert!(matches!(err, AuditError::ToolFatal { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn scan_image_reads_written_report() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new().on_with("trivy", &["image"], |inv| {
            let output = inv
                .args
                .iter()
                .find_map(|a| a.strip_prefix("--output="))
                .unwrap();
            std::fs::write(output, REPORT).unwrap();
            ToolOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: CONSOLE.into(),
            }
        });

        let result = scan_image(
            &runner,
            &ToolPaths::default(),
            &TrivyTableExtractor,
            "app:latest",
            dir.path(),
            TrivyMode::Comprehensive,
        )
        .unwrap();

        assert_eq!(result.counts.os, SeverityCounts::new(2, 1, 1));
        assert_eq!(result.summary.language_files, 3);
        assert_eq!(result.report_path, dir.path().join(REPORT_FILE));
        let call = &runner.calls_to("trivy")[0];
        assert!(call.args.contains(&"--detection-priority=comprehensive".to_string()));
        assert_eq!(call.args.last().map(String::as_str), Some("app:latest"));
    }

    #[test]
    fn passthrough_reports_usage_verbatim() {
        let runner = FakeRunner::new().on(
            "trivy",
            &[],
            ToolOutput {
                code: Some(0),
                stdout: "Usage: trivy [command]\n".into(),
                stderr: "unknown command\n".into(),
            },
        );
        let out = passthrough(
            &runner,
            &ToolPaths::default(),
            &TrivyTableExtractor,
            &["bogus".to_string()],
        )
        .unwrap();
        assert_eq!(
            out,
            Passthrough::Usage {
                stdout: "Usage: trivy [command]\n".into(),
                stderr: "unknown command\n".into(),
            }
        );
        assert_eq!(runner.calls()[0].args, vec!["bogus", "--no-progress"]);
    }
}
