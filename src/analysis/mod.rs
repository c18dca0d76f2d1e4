//! Source-code static analysis of an image's application directory.
//!
//! The image filesystem is exported into a scratch directory, system files
//! installed by the package manager and caller exclusions are pruned, and a
//! language-specific analyzer runs over the working directory. The scratch
//! directory is removed when the analysis returns, whatever the outcome.

pub mod exclusion;
pub mod java;
pub mod packages;
pub mod python;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::{ScratchConfig, ToolPaths};
use crate::docker;
use crate::error::{AuditError, Result};
use crate::exec::{CommandRunner, Invocation};
use crate::severity::SeverityCounts;

pub use exclusion::{ExclusionSet, ScratchRoot};
use packages::PackageFamily;

const EXPORT_TARBALL: &str = "filesystem.tar";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Java,
    Python,
}

impl Language {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "java" => Some(Self::Java),
            "python" | "py" => Some(Self::Python),
            _ => None,
        }
    }

    /// Extension alternation of files a package manager may install for
    /// this language.
    pub fn package_extensions(&self) -> &'static str {
        match self {
            Self::Java => "jar|ear|war|zip|class",
            Self::Python => "py",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Java => write!(f, "java"),
            Self::Python => write!(f, "python"),
        }
    }
}

/// Security-relevant findings of one analyzer run plus a size metric:
/// lines of code for Python, distinct analyzed classes for Java.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeFindings {
    pub counts: SeverityCounts,
    pub size: u64,
}

/// Result of the code-analysis step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeAnalysis {
    Completed {
        /// In-container working directory that was analyzed.
        workdir: String,
        excluded_paths: Vec<String>,
        findings: CodeFindings,
    },
    /// No working directory could be determined.
    Skipped,
}

impl CodeAnalysis {
    pub fn findings(&self) -> Option<&CodeFindings> {
        match self {
            Self::Completed { findings, .. } => Some(findings),
            Self::Skipped => None,
        }
    }
}

/// Everything an analyzer needs for one run.
pub struct AnalyzerContext<'a> {
    pub root: &'a ScratchRoot,
    /// Host path of the working directory inside the extraction.
    pub workdir: &'a Path,
    pub exclusions: &'a ExclusionSet,
    pub output_dir: &'a Path,
    pub tools: &'a ToolPaths,
    pub runner: &'a dyn CommandRunner,
}

/// A language-specific analyzer.
pub trait CodeAnalyzer: Send + Sync {
    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Result<CodeFindings>;
}

pub fn analyzer_for_language(lang: Language) -> Box<dyn CodeAnalyzer> {
    match lang {
        Language::Java => Box::new(java::SpotBugsAnalyzer),
        Language::Python => Box::new(python::PythonAnalyzer),
    }
}

/// Inputs of [`run_code_analysis`].
#[derive(Debug, Clone)]
pub struct CodeAnalysisRequest<'a> {
    pub image: &'a str,
    pub language: Language,
    /// Base OS reported by the vulnerability scanner.
    pub detected_os: Option<&'a str>,
    /// Caller-provided working directory; image metadata is used otherwise.
    pub workdir: Option<&'a str>,
    /// Keep files installed by the package manager in the analysis.
    pub include_system_packages: bool,
    pub exclusions: &'a ExclusionSet,
    pub output_dir: &'a Path,
}

/// A working directory must be absolute and must not climb out of itself.
pub fn validate_workdir(workdir: &str) -> Result<()> {
    if workdir.contains("..") || !workdir.starts_with('/') {
        return Err(AuditError::Usage(format!(
            "Invalid workdir '{}': expected an absolute path inside the container without '..'",
            workdir
        )));
    }
    Ok(())
}

pub fn run_code_analysis(
    request: &CodeAnalysisRequest<'_>,
    tools: &ToolPaths,
    scratch: &ScratchConfig,
    runner: &dyn CommandRunner,
) -> Result<CodeAnalysis> {
    tracing::info!(language = %request.language, "starting language-specific analysis");

    let workdir = match request.workdir.filter(|w| !w.trim().is_empty()) {
        Some(dir) => dir.to_string(),
        None => match docker::inspect_workdir(runner, tools, request.image)? {
            Some(dir) => dir,
            None => {
                tracing::warn!("WorkingDir not detected, skipping code analysis");
                return Ok(CodeAnalysis::Skipped);
            }
        },
    };
    validate_workdir(&workdir)?;

    // Dropping the TempDir removes the extraction on every return path.
    let scratch_dir = create_scratch_dir(&scratch.root)?;
    let root = ScratchRoot::new(scratch_dir.path())?;

    export_filesystem(runner, tools, request.image, &root)?;

    if request.include_system_packages {
        tracing::info!("system files will be included in the analysis");
    } else {
        exclude_system_files(runner, tools, request, &root)?;
    }

    // `/` is the extraction itself, which `resolve` refuses to hand out.
    let host_workdir = if workdir.trim_matches('/').is_empty() {
        root.path().to_path_buf()
    } else {
        root.resolve(&workdir)?
    };
    let analyzer = analyzer_for_language(request.language);
    let findings = analyzer.analyze(&AnalyzerContext {
        root: &root,
        workdir: &host_workdir,
        exclusions: request.exclusions,
        output_dir: request.output_dir,
        tools,
        runner,
    })?;

    if let Err(e) = scratch_dir.close() {
        tracing::warn!(error = %e, "could not fully remove scratch directory");
    }

    Ok(CodeAnalysis::Completed {
        workdir,
        excluded_paths: request.exclusions.to_vec(),
        findings,
    })
}

/// Delete a tool report left by an earlier run so it is never read back as
/// this run's output.
fn clear_previous_report(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "previous report removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn create_scratch_dir(parent: &Path) -> Result<tempfile::TempDir> {
    let parent: PathBuf = if parent.is_absolute() {
        parent.to_path_buf()
    } else {
        std::env::current_dir()?.join(parent)
    };
    std::fs::create_dir_all(&parent)?;
    Ok(tempfile::Builder::new().prefix("image-tmp").tempdir_in(parent)?)
}

/// `docker save | crane export -` into the scratch root, then unpack.
/// Failures are logged; the analyzers then simply find nothing.
fn export_filesystem(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    image: &str,
    root: &ScratchRoot,
) -> Result<()> {
    tracing::info!("extracting image filesystem");
    let tarball = root.path().join(EXPORT_TARBALL);

    let export = runner.run_piped(
        &Invocation::new(&tools.docker).args(["save", image]),
        &Invocation::new(&tools.crane)
            .args(["export", "-"])
            .arg(tarball.to_string_lossy()),
    )?;
    if !export.success() {
        tracing::warn!(stderr = %export.stderr.trim(), "image export failed");
        return Ok(());
    }

    let unpack = runner.run(
        &Invocation::new(&tools.tar)
            .arg("xf")
            .arg(tarball.to_string_lossy())
            .arg("-C")
            .arg(root.path().to_string_lossy()),
    )?;
    if !unpack.success() {
        tracing::warn!(stderr = %unpack.stderr.trim(), "unpacking exported filesystem failed");
    }

    if let Err(e) = std::fs::remove_file(&tarball) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(error = %e, "could not remove exported tarball");
        }
    }
    Ok(())
}

fn exclude_system_files(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    request: &CodeAnalysisRequest<'_>,
    root: &ScratchRoot,
) -> Result<()> {
    let family = match request.detected_os.and_then(PackageFamily::from_detected_os) {
        Some(family) => family,
        None => {
            tracing::warn!("unknown package manager, system files not excluded from the analysis");
            return Ok(());
        }
    };

    let files =
        match packages::installed_files(runner, tools, request.image, family, request.language)? {
            Some(files) => files,
            None => {
                tracing::warn!("could not list installed files, system files not excluded from the analysis");
                return Ok(());
            }
        };

    let mut removed = 0usize;
    for file in &files {
        match root.remove(file) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => tracing::debug!(path = %file, error = %e, "installed file not removed"),
        }
    }
    tracing::info!(removed, listed = files.len(), "system files excluded from the analysis");
    Ok(())
}
