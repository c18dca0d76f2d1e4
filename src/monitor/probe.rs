use std::path::{Path, PathBuf};

use super::event::NetworkEvent;
use crate::config::ToolPaths;
use crate::docker;
use crate::error::{AuditError, Result};
use crate::exec::{CommandRunner, Invocation};

pub fn nmap_invocation(tools: &ToolPaths, ip: &str, port: u16) -> Invocation {
    Invocation::new(&tools.nmap)
        .arg("--script")
        .arg("ssl-enum-ciphers")
        .arg(ip)
        .arg("-p")
        .arg(port.to_string())
}

/// Enumerate the TLS ciphers offered on the event's port and store the
/// scan output in `output_dir`. Returns the written file.
pub fn probe_event(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    event: &NetworkEvent,
    output_dir: &Path,
) -> Result<PathBuf> {
    let ip = docker::container_ip(runner, tools, &event.container_id)?.ok_or_else(|| {
        AuditError::ToolFailed {
            tool: format!("{} inspect", tools.docker),
            code: None,
            stderr: format!("container {} has no network address", event.container_id),
        }
    })?;

    let out = runner.run(&nmap_invocation(tools, &ip, event.port))?;
    if !out.success() {
        return Err(AuditError::ToolFailed {
            tool: tools.nmap.clone(),
            code: out.code,
            stderr: out.stderr,
        });
    }

    let path = output_dir.join(event.probe_file_name());
    std::fs::write(&path, out.stdout.trim())?;
    Ok(path)
}
