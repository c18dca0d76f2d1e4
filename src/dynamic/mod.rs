//! Dynamic audit of a running container: runtime baseline check plus
//! optional REST API fuzzing.

pub mod fuzz;

use std::path::PathBuf;

use url::Url;

use crate::bench::{self, BenchTarget};
use crate::config::Config;
use crate::docker;
use crate::error::{AuditError, Result};
use crate::exec::CommandRunner;

pub use fuzz::FuzzRequest;

#[derive(Debug, Clone)]
pub struct ContainerAuditOptions {
    /// Name of an already running container.
    pub name: String,
    pub output_dir: PathBuf,
    pub fuzz: Option<FuzzRequest>,
}

#[derive(Debug, Clone)]
pub struct ContainerAuditOutcome {
    pub output_dir: PathBuf,
    /// Base URL the fuzzer ran against, if it ran.
    pub fuzzed_server: Option<Url>,
}

pub fn audit_container(
    options: &ContainerAuditOptions,
    config: &Config,
    runner: &dyn CommandRunner,
) -> Result<ContainerAuditOutcome> {
    let tools = &config.tools;

    if !docker::container_running(runner, tools, &options.name)? {
        return Err(AuditError::Usage(format!(
            "Container {} is not running",
            options.name
        )));
    }

    std::fs::create_dir_all(&options.output_dir)?;
    let output_dir = options.output_dir.canonicalize()?;

    bench::run_baseline_check(runner, tools, BenchTarget::Container(&options.name), &output_dir);

    let fuzzed_server = match &options.fuzz {
        Some(request) => Some(fuzz::run_fuzzer(runner, tools, &options.name, request, &output_dir)?),
        None => None,
    };

    Ok(ContainerAuditOutcome {
        output_dir,
        fuzzed_server,
    })
}
