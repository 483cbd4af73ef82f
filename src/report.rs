//! Campaign reporting: per-check results rolled up per category.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::validate::ValidationResult;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum TestStatus {
    Pass,
    Fail,
    Skipped,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skipped => "SKIP",
        };
        f.write_str(s)
    }
}

/// Outcome of a single check.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CheckResult {
    pub label: String,
    pub status: TestStatus,
    pub details: String,
}

impl From<&ValidationResult> for CheckResult {
    fn from(result: &ValidationResult) -> Self {
        Self {
            label: result.label.clone(),
            status: if result.passed() {
                TestStatus::Pass
            } else {
                TestStatus::Fail
            },
            details: result.diagnostic(),
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CategoryReport {
    pub name: String,
    pub checks: usize,
    pub failures: usize,
    /// Stopped early because the failure budget ran out.
    pub aborted: bool,
    pub results: Vec<CheckResult>,
}

impl CategoryReport {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            checks: 0,
            failures: 0,
            aborted: false,
            results: Vec::new(),
        }
    }

    pub fn record(&mut self, result: &ValidationResult) {
        self.checks += 1;
        if !result.passed() {
            self.failures += 1;
        }
        self.results.push(CheckResult::from(result));
    }

    pub fn skip(&mut self, label: &str, reason: &str) {
        self.results.push(CheckResult {
            label: label.to_string(),
            status: TestStatus::Skipped,
            details: reason.to_string(),
        });
    }

    pub fn status(&self) -> TestStatus {
        if self.failures > 0 || self.aborted {
            TestStatus::Fail
        } else if self.checks == 0 {
            TestStatus::Skipped
        } else {
            TestStatus::Pass
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CampaignReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub categories: Vec<CategoryReport>,
}

impl Default for CampaignReport {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            categories: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn checks(&self) -> usize {
        self.categories.iter().map(|c| c.checks).sum()
    }

    pub fn failures(&self) -> usize {
        self.categories.iter().map(|c| c.failures).sum()
    }

    pub fn passed(&self) -> bool {
        self.categories.iter().all(|c| c.failures == 0 && !c.aborted)
    }

    /// Plain-text summary table.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("\nhilbench campaign {}\n", self.run_id));
        out.push_str(&format!("{:<12} | {:<6} | {:>6} | {:>8} | Notes\n", "Category", "Status", "Checks", "Failures"));
        out.push_str(&format!("{:-<12}-|-{:-<6}-|-{:-<6}-|-{:-<8}-|-{:-<20}\n", "", "", "", "", ""));
        for category in &self.categories {
            let notes = if category.aborted { "failure budget exhausted" } else { "" };
            out.push_str(&format!(
                "{:<12} | {:<6} | {:>6} | {:>8} | {}\n",
                category.name,
                category.status(),
                category.checks,
                category.failures,
                notes
            ));
            for check in category.results.iter().filter(|c| c.status != TestStatus::Pass) {
                out.push_str(&format!("{:<12} | {:<6} |   -> {}\n", "", check.status, check.details));
            }
        }
        out.push_str(&format!("\n{} check(s), {} failed\n", self.checks(), self.failures()));
        out
    }
}
