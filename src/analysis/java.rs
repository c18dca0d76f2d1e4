use std::collections::HashSet;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{clear_previous_report, AnalyzerContext, CodeAnalyzer, CodeFindings};
use crate::error::{AuditError, Result};
use crate::exec::Invocation;
use crate::severity::Severity;

pub const REPORT_FILE: &str = "spotbugs.xml";

/// SpotBugs over the compiled classes and archives under the workdir.
pub struct SpotBugsAnalyzer;

impl CodeAnalyzer for SpotBugsAnalyzer {
    fn analyze(&self, ctx: &AnalyzerContext<'_>) -> Result<CodeFindings> {
        // SpotBugs filters by class and package, not directory, so excluded
        // paths are deleted from the extraction instead.
        for path in ctx.exclusions.iter() {
            match ctx.root.remove(path) {
                Ok(true) => tracing::info!(%path, "excluded path removed"),
                Ok(false) => tracing::debug!(%path, "excluded path not present"),
                Err(e) => tracing::error!(%path, error = %e, "invalid excluded path"),
            }
        }

        tracing::info!("starting SpotBugs analysis");
        let report = ctx.output_dir.join(REPORT_FILE);
        clear_previous_report(&report)?;
        let output = ctx.runner.run(
            &Invocation::new(&ctx.tools.java)
                .args(["-Xmx6G", "-jar"])
                .arg(ctx.tools.spotbugs_jar().to_string_lossy())
                .args(["-textui", "-progress", "-low"])
                .arg(format!("-xml={}", report.display()))
                .arg("-quiet")
                .arg(ctx.workdir.to_string_lossy()),
        )?;

        // A non-zero exit is what SpotBugs does when there is nothing to analyze.
        if !output.success() {
            tracing::warn!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "SpotBugs failed, reporting no findings"
            );
            return Ok(CodeFindings::default());
        }

        let xml = match std::fs::read_to_string(&report) {
            Ok(xml) => xml,
            Err(e) => {
                tracing::warn!(error = %e, "no SpotBugs report, reporting no findings");
                return Ok(CodeFindings::default());
            }
        };
        match parse_spotbugs(&xml) {
            Ok(findings) => Ok(findings),
            Err(e) => {
                tracing::warn!(error = %e, "unreadable SpotBugs report, reporting no findings");
                Ok(CodeFindings::default())
            }
        }
    }
}

/// Count SECURITY bug instances by priority (1 = high, 2 = medium, 3 = low)
/// and the distinct analyzed classes, the Java project size metric.
pub fn parse_spotbugs(xml: &str) -> Result<CodeFindings> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut findings = CodeFindings::default();
    let mut classes: HashSet<String> = HashSet::new();
    let mut depth: usize = 0;

    loop {
        let event = reader.read_event().map_err(|e| xml_error(e.to_string()))?;
        match event {
            Event::Start(ref e) => {
                inspect_element(e, depth, &mut findings, &mut classes)?;
                depth += 1;
            }
            Event::Empty(ref e) => inspect_element(e, depth, &mut findings, &mut classes)?,
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Eof => break,
            _ => {}
        }
    }

    findings.size = classes.len() as u64;
    Ok(findings)
}

fn inspect_element(
    element: &BytesStart<'_>,
    depth: usize,
    findings: &mut CodeFindings,
    classes: &mut HashSet<String>,
) -> Result<()> {
    match element.name().as_ref() {
        // Only direct children of <BugCollection> are reported bugs.
        b"BugInstance" if depth == 1 => {
            if attribute(element, b"category")?.as_deref() != Some("SECURITY") {
                return Ok(());
            }
            let severity = match attribute(element, b"priority")?.as_deref() {
                Some("1") => Severity::High,
                Some("2") => Severity::Medium,
                Some("3") => Severity::Low,
                _ => return Ok(()),
            };
            findings.counts.record(severity, 1);
        }
        b"Class" => {
            if let Some(name) = attribute(element, b"classname")? {
                if !name.is_empty() {
                    classes.insert(name);
                }
            }
        }
        _ => {}
    }
    Ok(())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr.map_err(|e| xml_error(e.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr.unescape_value().map_err(|e| xml_error(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn xml_error(message: String) -> AuditError {
    AuditError::Parse {
        file: REPORT_FILE.into(),
        message,
    }
}
