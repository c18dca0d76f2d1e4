use std::path::{Path, PathBuf};

use url::Url;

use crate::config::ToolPaths;
use crate::error::{AuditError, Result};
use crate::exec::{CommandRunner, Invocation};

/// Report directory CATS writes into, under the output directory.
pub const REPORT_DIR: &str = "cats_report";

/// A validated request to fuzz a container's REST API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzRequest {
    /// OpenAPI document describing the API.
    pub apispec: PathBuf,
    pub port: u16,
    /// Path prefix placed in front of every path of the API document.
    pub prefix: Option<String>,
    pub https: bool,
}

impl FuzzRequest {
    /// `None` when no API document was given. A document without a
    /// port is a usage error.
    pub fn from_args(
        apispec: Option<PathBuf>,
        port: Option<u16>,
        prefix: Option<String>,
        https: bool,
    ) -> Result<Option<Self>> {
        let Some(apispec) = apispec else {
            return Ok(None);
        };
        let port = port.ok_or_else(|| {
            AuditError::Usage("Missing argument --port (required with --apispec)".into())
        })?;
        Ok(Some(Self {
            apispec,
            port,
            prefix,
            https,
        }))
    }
}

/// `scheme://ip:port/prefix`.
pub fn server_url(https: bool, ip: &str, port: u16, prefix: Option<&str>) -> Result<Url> {
    let scheme = if https { "https" } else { "http" };
    let prefix = prefix.unwrap_or("").trim_start_matches('/');
    let raw = format!("{}://{}:{}/{}", scheme, ip, port, prefix);
    Url::parse(&raw).map_err(|e| AuditError::Usage(format!("invalid server URL '{}': {}", raw, e)))
}

pub fn cats_invocation(tools: &ToolPaths, apispec: &Path, server: &Url, report_dir: &Path) -> Invocation {
    Invocation::new(&tools.java)
        .arg("-jar")
        .arg(tools.cats_jar().to_string_lossy())
        .arg("--contract")
        .arg(apispec.to_string_lossy())
        .arg("--server")
        .arg(server.as_str())
        .arg("--output")
        .arg(report_dir.to_string_lossy())
}

/// Fuzz the API served by `container`. Returns the base URL that was used.
pub fn run_fuzzer(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    container: &str,
    request: &FuzzRequest,
    output_dir: &Path,
) -> Result<Url> {
    let ip = crate::docker::container_ip(runner, tools, container)?.ok_or_else(|| {
        AuditError::ToolFailed {
            tool: format!("{} inspect", tools.docker),
            code: None,
            stderr: format!("container {} has no network address", container),
        }
    })?;
    let server = server_url(request.https, &ip, request.port, request.prefix.as_deref())?;

    tracing::info!(%server, "starting CATS fuzzing");
    let report_dir = output_dir.join(REPORT_DIR);
    let out = runner.run(&cats_invocation(tools, &request.apispec, &server, &report_dir))?;
    if !out.success() {
        tracing::warn!(code = ?out.code, stderr = %out.stderr.trim(), "CATS exited with an error");
    }
    Ok(server)
}
