//! dockaudit: security auditing for container images and running containers.
//!
//! Three auditors share one configuration and one process boundary:
//!
//! * the static auditor pulls an image, runs the Docker CIS baseline check,
//!   scans it for known vulnerabilities, analyzes the application source
//!   found in its working directory and writes a consolidated JSON report;
//! * the dynamic auditor checks a running container and can fuzz its REST API;
//! * the observer follows a security-event log and probes newly opened ports.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::PathBuf;
//! use dockaudit::analysis::Language;
//! use dockaudit::config::Config;
//! use dockaudit::exec::SystemRunner;
//! use dockaudit::{audit_image, ImageAuditOptions};
//!
//! let options = ImageAuditOptions::new("python:3.12-slim", Language::Python, PathBuf::from("reports"));
//! let outcome = audit_image(&options, &Config::default(), &SystemRunner).unwrap();
//! println!("{}", outcome.report_path.display());
//! ```

pub mod analysis;
pub mod bench;
pub mod config;
pub mod docker;
pub mod dynamic;
pub mod error;
pub mod exec;
pub mod monitor;
pub mod report;
pub mod scanner;
pub mod severity;

use std::path::PathBuf;

use analysis::{CodeAnalysisRequest, ExclusionSet, Language};
use bench::BenchTarget;
use config::Config;
use error::{AuditError, Result};
use exec::CommandRunner;
use report::{GeneralReport, ReportInputs};
use scanner::{TrivyMode, TrivyTableExtractor};

pub use dynamic::{audit_container, ContainerAuditOptions, ContainerAuditOutcome};

/// Options for a static image audit.
#[derive(Debug, Clone)]
pub struct ImageAuditOptions {
    pub image: String,
    pub language: Language,
    /// Application directory inside the image; read from image metadata when unset.
    pub workdir: Option<String>,
    pub output_dir: PathBuf,
    /// Absolute container paths to leave out of the code analysis.
    pub exclusions: Vec<String>,
    pub trivy_mode: TrivyMode,
    /// Use an image already present locally instead of pulling it.
    pub local: bool,
    /// Remove the pulled image once the audit is done. Ignored with `local`.
    pub cleanup: bool,
    pub include_system_packages: bool,
}

impl ImageAuditOptions {
    pub fn new(image: impl Into<String>, language: Language, output_dir: PathBuf) -> Self {
        Self {
            image: image.into(),
            language,
            workdir: None,
            output_dir,
            exclusions: Vec::new(),
            trivy_mode: TrivyMode::default(),
            local: false,
            cleanup: false,
            include_system_packages: false,
        }
    }
}

/// Result of a completed image audit.
#[derive(Debug)]
pub struct ImageAuditOutcome {
    pub report: GeneralReport,
    pub report_path: PathBuf,
}

/// Run the full static audit of an image and write `generalReport.json`.
pub fn audit_image(
    options: &ImageAuditOptions,
    config: &Config,
    runner: &dyn CommandRunner,
) -> Result<ImageAuditOutcome> {
    let tools = &config.tools;
    let exclusions = ExclusionSet::parse(&options.exclusions)?;
    if let Some(workdir) = options.workdir.as_deref().filter(|w| !w.trim().is_empty()) {
        analysis::validate_workdir(workdir)?;
    }
    let image = docker::normalize_image(&options.image);

    if options.local {
        if !docker::image_exists_locally(runner, tools, &image)? {
            return Err(AuditError::Usage(format!(
                "Image {} not found locally",
                image
            )));
        }
        tracing::info!(%image, "using local image");
    } else {
        docker::pull_image(runner, tools, &image)?;
    }

    std::fs::create_dir_all(&options.output_dir)?;
    let output_dir = options.output_dir.canonicalize()?;

    bench::run_baseline_check(runner, tools, BenchTarget::Image(&image), &output_dir);

    let trivy = scanner::scan_image(
        runner,
        tools,
        &TrivyTableExtractor,
        &image,
        &output_dir,
        options.trivy_mode,
    )?;
    tracing::info!(report = %trivy.report_path.display(), "vulnerability report written");

    let code = analysis::run_code_analysis(
        &CodeAnalysisRequest {
            image: &image,
            language: options.language,
            detected_os: trivy.summary.detected_os.as_deref(),
            workdir: options.workdir.as_deref(),
            include_system_packages: options.include_system_packages,
            exclusions: &exclusions,
            output_dir: &output_dir,
        },
        tools,
        &config.scratch,
        runner,
    )?;

    let report = report::assemble(&ReportInputs {
        image: &image,
        language: options.language,
        report_folder: &output_dir,
        trivy: &trivy,
        mode: options.trivy_mode,
        code: &code,
    });
    let report_path = report::json::write_report(&report, &output_dir)?;
    tracing::info!(path = %report_path.display(), "general report written");

    if options.cleanup && !options.local {
        docker::remove_image(runner, tools, &image);
    }

    Ok(ImageAuditOutcome {
        report,
        report_path,
    })
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::exec::ToolOutput;
    use crate::report::{CodeSection, Marker, SizeMetric};
    use crate::severity::SeverityCounts;
    use std::path::Path;

    const CONSOLE: &str = "INFO\tDetected OS\tdebian 12.5\nINFO\tNumber of language-specific files\tnum=2\n";
    const TABLE: &str = "\
app:latest (debian 12.5)
Total: 3 (LOW: 1, MEDIUM: 1, HIGH: 1, CRITICAL: 0)

app/requirements.txt (pip)
Total: 2 (LOW: 0, MEDIUM: 0, HIGH: 1, CRITICAL: 1)
";

    fn trivy_writes_report(inv: &exec::Invocation) -> ToolOutput {
        let output = inv
            .args
            .iter()
            .find_map(|a| a.strip_prefix("--output="))
            .unwrap();
        std::fs::write(output, TABLE).unwrap();
        ToolOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: CONSOLE.into(),
        }
    }

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.scratch.root = dir.join("scratch");
        config
    }

    #[test]
    fn image_without_workdir_gets_scan_only_report() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new()
            .on_with("trivy", &["image"], trivy_writes_report)
            .on(
                "docker",
                &["inspect"],
                ToolOutput::ok(r#"[{"Config":{"WorkingDir":""}}]"#),
            );
        let mut options = ImageAuditOptions::new("app", Language::Python, dir.path().join("reports"));
        options.cleanup = true;

        let outcome = audit_image(&options, &config_in(dir.path()), &runner).unwrap();

        let general = &outcome.report;
        assert_eq!(general.image_name, "app:latest");
        assert_eq!(general.analysis.code, CodeSection::Skipped(Marker::Skipped));
        assert_eq!(general.analysis.summary.size, SizeMetric::Skipped(Marker::Skipped));
        assert_eq!(general.analysis.summary.counts(), SeverityCounts::new(1, 1, 3));
        assert!(outcome.report_path.exists());

        let programs: Vec<String> = runner.calls().into_iter().map(|c| c.program).collect();
        assert_eq!(programs, vec!["docker", "sh", "trivy", "docker", "docker"]);
        let calls = runner.calls_to("docker");
        assert_eq!(calls[0].args, vec!["pull", "app:latest"]);
        assert_eq!(calls[2].args, vec!["image", "rm", "app:latest"]);
        let bench = &runner.calls_to("sh")[0];
        assert!(bench.args.contains(&"app".to_string()));
        assert!(bench.args.contains(&"container_images".to_string()));
    }

    #[test]
    fn traversal_in_exclusion_rejected_before_any_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let mut options = ImageAuditOptions::new("app", Language::Java, dir.path().join("reports"));
        options.exclusions = vec!["/app/../etc".into()];

        let err = audit_image(&options, &config_in(dir.path()), &runner).unwrap_err();

        assert!(matches!(err, AuditError::InvalidExclusion { .. }));
        assert_eq!(err.exit_code(), 2);
        assert!(runner.calls().is_empty());
        assert!(!dir.path().join("reports").exists());
    }

    #[test]
    fn climbing_workdir_rejected_before_any_process() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new();
        let mut options = ImageAuditOptions::new("app", Language::Python, dir.path().join("reports"));
        options.workdir = Some("/app/..".into());

        let err = audit_image(&options, &config_in(dir.path()), &runner).unwrap_err();

        assert!(matches!(err, AuditError::Usage(_)));
        assert!(runner.calls().is_empty());
        assert!(!dir.path().join("reports").exists());
    }

    #[test]
    fn local_image_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new().on("docker", &["images"], ToolOutput::ok("other:latest\n"));
        let mut options = ImageAuditOptions::new("app:1.0", Language::Python, dir.path().join("reports"));
        options.local = true;

        let err = audit_image(&options, &config_in(dir.path()), &runner).unwrap_err();

        assert!(err.is_usage());
        assert!(runner.calls_to("trivy").is_empty());
        assert!(!runner.calls_to("docker").iter().any(|c| c.args[0] == "pull"));
    }

    #[test]
    fn scanner_fatal_aborts_before_report() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::new().on(
            "trivy",
            &["image"],
            ToolOutput::failed(1, "FATAL\tunable to find the specified image"),
        );
        let options = ImageAuditOptions::new("ghost", Language::Java, dir.path().join("reports"));

        let err = audit_image(&options, &config_in(dir.path()), &runner).unwrap_err();

        assert_eq!(err.exit_code(), 1);
        assert!(!dir.path().join("reports").join(report::json::REPORT_FILE).exists());
    }
}
