use once_cell::sync::Lazy;
use regex::Regex;

use super::{clear_previous_report, AnalyzerContext, CodeAnalyzer, CodeFindings};
use crate::error::Result;
use crate::exec::Invocation;
use crate::severity::SeverityCounts;

pub const PYLINT_REPORT: &str = "pylint.json";
pub const BANDIT_REPORT: &str = "bandit.txt";

/// Virtualenv directory names never worth analyzing.
const VENV_NAMES: &[&str] = &["env", "venv", ".env", ".venv"];

static BANDIT_SEVERITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"Total issues \(by severity\):\s+(?:Undefined:\s+\d+\s+)?Low:\s+(\d+)\s+Medium:\s+(\d+)\s+High:\s+(\d+)",
    )
    .unwrap()
});

static BANDIT_LOC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Total lines of code:\s+(\d+)").unwrap());

/// Pylint (report artifact only) followed by Bandit (security counts).
pub struct PythonAnalyzer;

impl CodeAnalyzer for PythonAnalyzer {
    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Result<CodeFindings> {
        let mut user_excluded = Vec::new();
        for path in ctx.exclusions.iter() {
            match ctx.root.resolve(path) {
                Ok(resolved) => user_excluded.push(resolved.to_string_lossy().into_owned()),
                Err(e) => tracing::error!(%path, error = %e, "invalid excluded path"),
            }
        }

        tracing::info!("starting Pylint analysis");
        let pylint_report = ctx.output_dir.join(PYLINT_REPORT);
        clear_previous_report(&pylint_report)?;
        let mut pylint = Invocation::new(&ctx.tools.pylint)
            .args(["-j", "0", "-f", "json2", "--output"])
            .arg(pylint_report.to_string_lossy())
            .args(["--recursive", "y", "--ignore"])
            .arg(VENV_NAMES.join(","));
        if !user_excluded.is_empty() {
            pylint = pylint.arg("--ignore-paths").arg(user_excluded.join(","));
        }
        let pylint = pylint.arg(ctx.workdir.to_string_lossy());
        // Pylint's exit status is a bitmask of message categories, not an error.
        let out = ctx.runner.run(&pylint)?;
        tracing::debug!(code = ?out.code, "pylint finished");

        tracing::info!("starting Bandit analysis");
        // A bare `-x env` is ignored by bandit when env sits next to the
        // target; the rooted form works at any depth.
        let mut bandit_excluded: Vec<String> =
            VENV_NAMES.iter().map(|name| format!("/{}", name)).collect();
        bandit_excluded.extend(user_excluded);
        let bandit_report = ctx.output_dir.join(BANDIT_REPORT);
        clear_previous_report(&bandit_report)?;
        let out = ctx.runner.run(
            &Invocation::new(&ctx.tools.bandit)
                .args(["-r", "-x"])
                .arg(bandit_excluded.join(","))
                .args(["-f", "txt", "--output"])
                .arg(bandit_report.to_string_lossy())
                .arg(ctx.workdir.to_string_lossy()),
        )?;
        tracing::debug!(code = ?out.code, "bandit finished");

        let text = match std::fs::read_to_string(&bandit_report) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "no Bandit report, reporting no findings");
                return Ok(CodeFindings::default());
            }
        };
        Ok(parse_bandit(&text).unwrap_or_else(|| {
            tracing::warn!("Bandit report has no metrics section, reporting no findings");
            CodeFindings::default()
        }))
    }
}

/// Severity totals and analyzed lines of code from Bandit's text report.
pub fn parse_bandit(text: &str) -> Option<CodeFindings> {
    let caps = BANDIT_SEVERITY_RE.captures(text)?;
    let n = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };
    let counts = SeverityCounts::new(n(1), n(2), n(3));

    let size = BANDIT_LOC_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);

    Some(CodeFindings { counts, size })
}
