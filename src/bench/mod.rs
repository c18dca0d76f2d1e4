//! Baseline configuration check via docker-bench-security.
//!
//! The check is advisory: its report lands in the output directory, nothing
//! is parsed, and any failure is logged and ignored.

use std::path::Path;

use crate::config::ToolPaths;
use crate::docker;
use crate::exec::{CommandRunner, Invocation};

/// Entry script, run from inside the docker-bench directory.
pub const SCRIPT: &str = "docker-bench-security.sh";

/// File docker-bench writes next to its report; removed after each run.
pub const LOG_ARTIFACT: &str = "docker_bench";

/// What the baseline checker looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchTarget<'a> {
    /// An image, checked with the `container_images` section.
    Image(&'a str),
    /// A running container, checked with the `container_runtime` section.
    Container(&'a str),
}

impl BenchTarget<'_> {
    pub fn category(&self) -> &'static str {
        match self {
            Self::Image(_) => "container_images",
            Self::Container(_) => "container_runtime",
        }
    }

    /// Name passed to `-i`. docker-bench rejects tagged image names.
    pub fn name(&self) -> &str {
        match self {
            Self::Image(image) => docker::strip_tag(image),
            Self::Container(name) => name,
        }
    }
}

pub fn invocation(tools: &ToolPaths, target: BenchTarget<'_>, output_dir: &Path) -> Invocation {
    let log = output_dir.join(LOG_ARTIFACT);
    Invocation::new(&tools.sh)
        .args([
            SCRIPT,
            "-b",
            "-p",
            "-i",
            target.name(),
            "-c",
            target.category(),
            "-l",
        ])
        .arg(log.to_string_lossy())
        .current_dir(&tools.docker_bench_dir)
}

/// Run the check. `output_dir` should be absolute: the script runs from its
/// own directory.
pub fn run_baseline_check(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    target: BenchTarget<'_>,
    output_dir: &Path,
) {
    tracing::info!(
        name = target.name(),
        category = target.category(),
        "starting docker-bench-security analysis"
    );

    match runner.run(&invocation(tools, target, output_dir)) {
        Ok(out) if out.success() => {}
        Ok(out) => tracing::warn!(
            code = ?out.code,
            stderr = %out.stderr.trim(),
            "docker-bench-security reported a failure, continuing"
        ),
        Err(e) => tracing::warn!(error = %e, "docker-bench-security could not run, continuing"),
    }

    let artifact = output_dir.join(LOG_ARTIFACT);
    if let Err(e) = std::fs::remove_file(&artifact) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %artifact.display(), error = %e, "could not remove docker-bench log");
        }
    }
    tracing::info!("docker-bench-security done");
}
