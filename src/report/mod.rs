//! Final JSON report of an image audit.
//!
//! [`assemble`] is a pure function of the scan and code-analysis results;
//! the same inputs always serialize to the same bytes.

pub mod console;
pub mod json;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::analysis::{CodeAnalysis, Language};
use crate::scanner::{TrivyMode, TrivyResult};
use crate::severity::SeverityCounts;

/// Serializes as the literal string `"skipped"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralReport {
    pub image_name: String,
    pub language: Language,
    pub report_folder: String,
    pub analysis: AnalysisSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub trivy: TrivySection,
    /// Either the analysis detail or `"skipped"`.
    pub code: CodeSection,
    pub summary: SummarySection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrivySection {
    #[serde(rename = "imageOS")]
    pub image_os: String,
    #[serde(rename = "filesAnalyzed")]
    pub files_analyzed: u64,
    pub mode: TrivyMode,
    #[serde(rename = "OS_vulnerabilities")]
    pub os_vulnerabilities: SeverityCounts,
    pub dependencies_vulnerabilities: SeverityCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeSection {
    Analyzed(CodeDetail),
    Skipped(Marker),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeDetail {
    pub workdir: String,
    pub excluded_paths: Vec<String>,
    pub size: u64,
    pub vulnerabilities: SeverityCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    /// Code size, or `"skipped"` when no code was analyzed.
    pub size: SizeMetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeMetric {
    Measured(u64),
    Skipped(Marker),
}

impl SummarySection {
    pub fn counts(&self) -> SeverityCounts {
        SeverityCounts::new(self.low, self.medium, self.high)
    }
}

/// Borrowed inputs of [`assemble`].
#[derive(Debug, Clone, Copy)]
pub struct ReportInputs<'a> {
    pub image: &'a str,
    pub language: Language,
    /// Absolute path of the output directory.
    pub report_folder: &'a Path,
    pub trivy: &'a TrivyResult,
    pub mode: TrivyMode,
    pub code: &'a CodeAnalysis,
}

/// Build the report. The summary is the element-wise sum of OS, dependency
/// and code triples; code is left out when it was skipped.
pub fn assemble(inputs: &ReportInputs<'_>) -> GeneralReport {
    let counts = inputs.trivy.counts;

    let code_counts = inputs
        .code
        .findings()
        .map(|findings| findings.counts)
        .unwrap_or_default();

    let (code, size) = match inputs.code {
        CodeAnalysis::Completed {
            workdir,
            excluded_paths,
            findings,
        } => (
            CodeSection::Analyzed(CodeDetail {
                workdir: workdir.clone(),
                excluded_paths: excluded_paths.clone(),
                size: findings.size,
                vulnerabilities: findings.counts,
            }),
            SizeMetric::Measured(findings.size),
        ),
        CodeAnalysis::Skipped => (
            CodeSection::Skipped(Marker::Skipped),
            SizeMetric::Skipped(Marker::Skipped),
        ),
    };

    let total = counts.total() + code_counts;

    GeneralReport {
        image_name: inputs.image.to_string(),
        language: inputs.language,
        report_folder: inputs.report_folder.display().to_string(),
        analysis: AnalysisSection {
            trivy: TrivySection {
                image_os: inputs.trivy.image_os().to_string(),
                files_analyzed: inputs.trivy.summary.language_files,
                mode: inputs.mode,
                os_vulnerabilities: counts.os,
                dependencies_vulnerabilities: counts.dependencies,
            },
            code,
            summary: SummarySection {
                low: total.low,
                medium: total.medium,
                high: total.high,
                size,
            },
        },
    }
}
