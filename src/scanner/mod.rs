//! Vulnerability scanning of images.
//!
//! Scanner output is scraped from text, so the matching lives behind
//! [`ReportExtractor`]; a new scanner version only needs a new extractor.

pub mod trivy;

use serde::{Deserialize, Serialize};

use crate::severity::SeverityCounts;

pub use trivy::{scan_image, TrivyResult, TrivyTableExtractor};

/// Trivy's `--detection-priority`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrivyMode {
    #[default]
    Precise,
    Comprehensive,
}

impl TrivyMode {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "precise" => Some(Self::Precise),
            "comprehensive" => Some(Self::Comprehensive),
            _ => None,
        }
    }
}

impl std::fmt::Display for TrivyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Precise => write!(f, "precise"),
            Self::Comprehensive => write!(f, "comprehensive"),
        }
    }
}

/// What the scanner says about the image itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsoleSummary {
    /// Base OS as reported by the scanner, `None` when unsupported.
    pub detected_os: Option<String>,
    /// Number of language-specific files (lockfiles, jars, ...) found.
    pub language_files: u64,
}

/// Severity triples split by origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounts {
    /// OS packages.
    pub os: SeverityCounts,
    /// Third-party dependencies.
    pub dependencies: SeverityCounts,
}

impl ScanCounts {
    pub fn total(&self) -> SeverityCounts {
        self.os + self.dependencies
    }
}

/// `raw text -> structured counts` for one scanner's output format.
pub trait ReportExtractor: Send + Sync {
    /// Extract image facts from the scanner's console log.
    fn console_summary(&self, console: &str) -> ConsoleSummary;

    /// Extract severity counts from the scanner's written report.
    fn severity_counts(&self, report: &str) -> ScanCounts;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing() {
        assert_eq!(TrivyMode::from_str_lenient("Precise"), Some(TrivyMode::Precise));
        assert_eq!(
            TrivyMode::from_str_lenient("comprehensive"),
            Some(TrivyMode::Comprehensive)
        );
        assert_eq!(TrivyMode::from_str_lenient("fast"), None);
        assert_eq!(TrivyMode::default().to_string(), "precise");
    }
}
