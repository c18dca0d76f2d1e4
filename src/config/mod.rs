use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Top-level configuration from `.dockaudit.toml`, merged with CLI flags and
/// environment variables once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tools: ToolPaths,
    #[serde(default)]
    pub scratch: ScratchConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
}

/// Where the external tools live. Plain names are resolved through `$PATH`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub docker: String,
    pub trivy: String,
    pub crane: String,
    pub tar: String,
    pub java: String,
    pub pylint: String,
    pub bandit: String,
    pub nmap: String,
    pub sh: String,
    /// Directory containing `docker-bench-security.sh`.
    pub docker_bench_dir: PathBuf,
    /// Directory containing `spotbugs.jar`.
    pub spotbugs_dir: PathBuf,
    /// Directory containing `cats.jar`.
    pub cats_dir: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            docker: "docker".into(),
            trivy: "trivy".into(),
            crane: "crane".into(),
            tar: "tar".into(),
            java: "java".into(),
            pylint: "pylint".into(),
            bandit: "bandit".into(),
            nmap: "nmap".into(),
            sh: "sh".into(),
            docker_bench_dir: PathBuf::from("docker-bench-security"),
            spotbugs_dir: PathBuf::from("spotbugs-4.8.6/lib"),
            cats_dir: PathBuf::from("."),
        }
    }
}

impl ToolPaths {
    pub fn spotbugs_jar(&self) -> PathBuf {
        self.spotbugs_dir.join("spotbugs.jar")
    }

    pub fn cats_jar(&self) -> PathBuf {
        self.cats_dir.join("cats.jar")
    }
}

/// Tool directory overrides coming from flags or environment variables.
/// `clap` already resolves flag-over-env, so a `Some` here wins over the file.
#[derive(Debug, Clone, Default)]
pub struct ToolOverrides {
    pub docker_bench_dir: Option<PathBuf>,
    pub spotbugs_dir: Option<PathBuf>,
    pub cats_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScratchConfig {
    /// Parent directory for image filesystem extraction.
    pub root: PathBuf,
}

impl Default for ScratchConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Security-event log to follow (one JSON event per line).
    pub log_path: PathBuf,
    /// Directory receiving one probe report per event.
    pub output_dir: PathBuf,
    /// Concurrent probe workers.
    pub workers: usize,
    /// Events buffered between the tail loop and the workers.
    pub queue_capacity: usize,
    pub poll_interval_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("report/openport.txt"),
            output_dir: PathBuf::from("report/nmap_reports"),
            workers: 4,
            queue_capacity: 64,
            poll_interval_ms: 100,
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load config from a TOML file. Returns default if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ToolOverrides) {
        if let Some(dir) = overrides.docker_bench_dir {
            self.tools.docker_bench_dir = dir;
        }
        if let Some(dir) = overrides.spotbugs_dir {
            self.tools.spotbugs_dir = dir;
        }
        if let Some(dir) = overrides.cats_dir {
            self.tools.cats_dir = dir;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.observer.workers == 0 {
            return Err(AuditError::Config("observer.workers must be at least 1".into()));
        }
        if self.observer.queue_capacity == 0 {
            return Err(AuditError::Config(
                "observer.queue_capacity must be at least 1".into(),
            ));
        }
        if self.observer.poll_interval_ms == 0 {
            return Err(AuditError::Config(
                "observer.poll_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Generate a starter config file.
    pub fn starter_toml() -> &'static str {
        r#"# dockaudit configuration
# Values left out fall back to the defaults shown here.

[tools]
docker = "docker"
trivy = "trivy"
crane = "crane"
# Directories holding the script/jar based tools. The DOCKERBENCH_PATH,
# SPOTBUGS_PATH and CATS_PATH variables and the matching flags override them.
docker_bench_dir = "docker-bench-security"
spotbugs_dir = "spotbugs-4.8.6/lib"
cats_dir = "."

[scratch]
# Image filesystems are extracted under this directory and removed afterwards.
root = "."

[observer]
log_path = "report/openport.txt"
output_dir = "report/nmap_reports"
workers = 4
queue_capacity = 64
poll_interval_ms = 100
"#
    }
}
