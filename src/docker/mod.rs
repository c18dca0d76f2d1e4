//! Thin wrappers over the image-runtime CLI.

use crate::config::ToolPaths;
use crate::error::{AuditError, Result};
use crate::exec::{CommandRunner, Invocation};

const IP_TEMPLATE: &str = "{{range .NetworkSettings.Networks}}{{.IPAddress}}{{end}}";

/// Append `:latest` when the reference names no tag or digest.
pub fn normalize_image(image: &str) -> String {
    if has_tag(image) || image.contains('@') {
        image.to_string()
    } else {
        format!("{}:latest", image)
    }
}

/// Repository part of a reference, without tag. Registry ports are kept.
pub fn strip_tag(image: &str) -> &str {
    let image = image.split('@').next().unwrap_or(image);
    let last_segment_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[last_segment_start..].find(':') {
        Some(pos) => &image[..last_segment_start + pos],
        None => image,
    }
}

fn has_tag(image: &str) -> bool {
    let last_segment = image.rsplit('/').next().unwrap_or(image);
    last_segment.contains(':')
}

pub fn pull_image(runner: &dyn CommandRunner, tools: &ToolPaths, image: &str) -> Result<()> {
    tracing::info!(%image, "pulling image");
    let out = runner.run(&Invocation::new(&tools.docker).args(["pull", image]))?;
    if !out.success() {
        return Err(AuditError::ToolFailed {
            tool: format!("{} pull", tools.docker),
            code: out.code,
            stderr: out.stderr,
        });
    }
    tracing::info!(%image, "successfully pulled image");
    Ok(())
}

pub fn image_exists_locally(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    image: &str,
) -> Result<bool> {
    let out = runner.run(&Invocation::new(&tools.docker).args([
        "images",
        "--format",
        "{{.Repository}}:{{.Tag}}",
    ]))?;
    Ok(out.stdout.lines().any(|line| line.trim() == image))
}

pub fn container_running(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    name: &str,
) -> Result<bool> {
    let out = runner.run(&Invocation::new(&tools.docker).args([
        "ps".to_string(),
        "--filter".to_string(),
        format!("name={}", name),
        "--quiet".to_string(),
    ]))?;
    Ok(out.success() && !out.stdout.trim().is_empty())
}

/// `Config.WorkingDir` of an image, `None` when unset or not inspectable.
pub fn inspect_workdir(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    image: &str,
) -> Result<Option<String>> {
    let out = runner.run(&Invocation::new(&tools.docker).args(["inspect", image]))?;
    if !out.success() {
        tracing::warn!(%image, stderr = %out.stderr.trim(), "docker inspect failed");
        return Ok(None);
    }
    Ok(parse_workdir(&out.stdout))
}

fn parse_workdir(inspect_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(inspect_json).ok()?;
    value
        .get(0)?
        .get("Config")?
        .get("WorkingDir")?
        .as_str()
        .filter(|dir| !dir.is_empty())
        .map(str::to_string)
}

/// Internal network address of a container, `None` if it has none.
pub fn container_ip(
    runner: &dyn CommandRunner,
    tools: &ToolPaths,
    container: &str,
) -> Result<Option<String>> {
    let out =
        runner.run(&Invocation::new(&tools.docker).args(["inspect", "-f", IP_TEMPLATE, container]))?;
    let ip = out.stdout.trim();
    if !out.success() || ip.is_empty() {
        return Ok(None);
    }
    Ok(Some(ip.to_string()))
}

/// Best-effort image removal.
pub fn remove_image(runner: &dyn CommandRunner, tools: &ToolPaths, image: &str) {
    tracing::info!(%image, "deleting image");
    match runner.run(&Invocation::new(&tools.docker).args(["image", "rm", image])) {
        Ok(out) if out.success() => {}
        Ok(out) => tracing::warn!(%image, stderr = %out.stderr.trim(), "image removal failed"),
        Err(e) => tracing::warn!(%image, error = %e, "image removal failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::exec::ToolOutput;

    #[test]
    fn normalize_adds_latest() {
        assert_eq!(normalize_image("nginx"), "nginx:latest");
        assert_eq!(normalize_image("nginx:1.25"), "nginx:1.25");
        assert_eq!(normalize_image("localhost:5000/app"), "localhost:5000/app:latest");
        assert_eq!(normalize_image("app@sha256:abcd"), "app@sha256:abcd");
    }

    #[test]
    fn strip_tag_keeps_registry_port() {
        assert_eq!(strip_tag("nginx:latest"), "nginx");
        assert_eq!(strip_tag("localhost:5000/app:1.0"), "localhost:5000/app");
        assert_eq!(strip_tag("library/python"), "library/python");
    }

    #[test]
    fn workdir_from_inspect_json() {
        let json = r#"[{"Id":"sha256:1","Config":{"WorkingDir":"/app"}}]"#;
        assert_eq!(parse_workdir(json), Some("/app".into()));
        let empty = r#"[{"Config":{"WorkingDir":""}}]"#;
        assert_eq!(parse_workdir(empty), None);
        assert_eq!(parse_workdir("not json"), None);
    }

    #[test]
    fn pull_failure_is_fatal() {
        let runner = FakeRunner::new().on("docker", &["pull"], ToolOutput::failed(1, "manifest unknown"));
        let err = pull_image(&runner, &ToolPaths::default(), "nope:latest").unwrap_err();
        assert!(matches!(err, AuditError::ToolFailed { code: Some(1), .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn local_image_lookup() {
        let runner = FakeRunner::new().on(
            "docker",
            &["images"],
            ToolOutput::ok("nginx:latest\nmyapp:dev\n"),
        );
        let tools = ToolPaths::default();
        assert!(image_exists_locally(&runner, &tools, "myapp:dev").unwrap());
        assert!(!image_exists_locally(&runner, &tools, "myapp:latest").unwrap());
    }

    #[test]
    fn container_ip_trimmed_or_none() {
        let tools = ToolPaths::default();
        let runner = FakeRunner::new().on("docker", &["inspect", "-f"], ToolOutput::ok("172.17.0.3\n"));
        assert_eq!(container_ip(&runner, &tools, "web").unwrap(), Some("172.17.0.3".into()));
        let runner = FakeRunner::new().on("docker", &["inspect", "-f"], ToolOutput::ok("\n"));
        assert_eq!(container_ip(&runner, &tools, "web").unwrap(), None);
    }

    #[test]
    fn running_check_uses_name_filter() {
        let runner = FakeRunner::new().on("docker", &["ps"], ToolOutput::ok("f00d\n"));
        assert!(container_running(&runner, &ToolPaths::default(), "web").unwrap());
        assert_eq!(runner.calls()[0].args[2], "name=web");
    }
}
