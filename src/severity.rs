use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Severity bucket used across every report section. Scanner tiers above
/// `High` (e.g. CRITICAL) are folded into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn from_str_lenient(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" | "med" => Some(Self::Medium),
            "high" | "critical" | "crit" => Some(Self::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Severity triple: low/medium/high finding counts from a single source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
}

impl SeverityCounts {
    pub fn new(low: u64, medium: u64, high: u64) -> Self {
        Self { low, medium, high }
    }

    pub fn record(&mut self, severity: Severity, count: u64) {
        match severity {
            Severity::Low => self.low += count,
            Severity::Medium => self.medium += count,
            Severity::High => self.high += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.low + self.medium + self.high
    }
}

impl Add for SeverityCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            low: self.low + rhs.low,
            medium: self.medium + rhs.medium,
            high: self.high + rhs.high,
        }
    }
}

impl AddAssign for SeverityCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}
