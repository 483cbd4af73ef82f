//! Campaign orchestration: runs test categories against a platform and
//! rolls the validation results into a [`CampaignReport`].
//!
//! Iterations run strictly one after another. A fatal error aborts the whole
//! campaign; when `campaign.teardown_on_error` is set the running session is
//! stopped and deleted first. Validation failures are counted against the
//! category's failure budget instead.

pub mod constants;
pub mod signal;
pub mod strings;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::collect::{CollectError, SampleCollector};
use crate::config::CampaignConfig;
use crate::platform::{Platform, StopMode};
use crate::provision::ProvisionError;
use crate::report::{CampaignReport, CategoryReport};
use crate::session::{SessionController, SessionError, SessionParams};
use crate::stimulus::StimulusError;
use crate::topology::UnknownType;
use crate::validate::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Generator-driven analog loops checked against a tolerance.
    Signal,
    /// Discrete numeric writes read back exactly.
    Constants,
    /// Packed string channels read back exactly.
    Strings,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Signal, Category::Constants, Category::Strings];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Signal => "signal",
            Category::Constants => "constants",
            Category::Strings => "strings",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = UnknownType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "signal" => Ok(Category::Signal),
            "constants" => Ok(Category::Constants),
            "strings" => Ok(Category::Strings),
            other => Err(UnknownType {
                kind: "category",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("provisioning failed")]
    Provision(#[from] ProvisionError),

    #[error("session lifecycle failed")]
    Session(#[from] SessionError),

    #[error("stimulus failed")]
    Stimulus(#[from] StimulusError),

    #[error("sample collection failed")]
    Collect(#[from] CollectError),

    #[error("{category} category is misconfigured: {reason}")]
    Misconfigured { category: Category, reason: String },
}

impl CampaignError {
    /// The error and every cause beneath it, joined with `: `, so the failing
    /// engine call shows up in a single log field.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

/// Counts validation failures; exhausted once failures exceed the limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureBudget {
    limit: Option<usize>,
    failures: usize,
}

impl FailureBudget {
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit, failures: 0 }
    }

    /// Record one check. Returns `true` when the budget is exhausted.
    pub fn record(&mut self, passed: bool) -> bool {
        if !passed {
            self.failures += 1;
        }
        self.exhausted()
    }

    pub fn exhausted(&self) -> bool {
        self.limit.is_some_and(|limit| self.failures > limit)
    }

    pub fn failures(&self) -> usize {
        self.failures
    }
}

pub struct CampaignRunner<'a, P: Platform + ?Sized> {
    platform: &'a P,
    config: &'a CampaignConfig,
}

impl<'a, P: Platform + ?Sized> CampaignRunner<'a, P> {
    pub fn new(platform: &'a P, config: &'a CampaignConfig) -> Self {
        Self { platform, config }
    }

    /// Run `categories` in order.
    pub async fn run(&self, categories: &[Category]) -> Result<CampaignReport, CampaignError> {
        let mut report = CampaignReport::new();
        info!(run_id = %report.run_id, categories = categories.len(), "campaign starting");

        for &category in categories {
            info!(%category, "category starting");
            let outcome = match category {
                Category::Signal => signal::run(self).await,
                Category::Constants => constants::run(self).await,
                Category::Strings => strings::run(self).await,
            };
            let category_report = outcome.map_err(|e| {
                error!(%category, error = %e.chain(), "category aborted by fatal error");
                e
            })?;

            info!(
                %category,
                checks = category_report.checks,
                failures = category_report.failures,
                aborted = category_report.aborted,
                "category finished"
            );
            report.categories.push(category_report);
        }

        report.finish();
        info!(
            run_id = %report.run_id,
            checks = report.checks(),
            failures = report.failures(),
            "campaign finished"
        );
        Ok(report)
    }

    fn session_params(&self, test: &str, database: &str, session: &str) -> SessionParams {
        SessionParams::new(test, database, session)
            .with_fixed_step(self.config.platform.fixed_step_ms)
            .with_schedule(self.config.platform.schedule_type)
    }

    fn collector(&self) -> SampleCollector<'a, P> {
        SampleCollector::new(self.platform, &self.config.platform.host, &self.config.platform.project)
    }

    /// Clean up after a fatal error, then hand the error back.
    async fn abandon(&self, sessions: &mut SessionController<'a, P>, err: CampaignError) -> CampaignError {
        if self.config.campaign.teardown_on_error {
            warn!(error = %err.chain(), state = %sessions.state(), "fatal error, tearing down session");
            sessions.stop(StopMode::UserAbort).await;
            sessions.teardown().await;
        }
        err
    }
}

/// Record `results` into `report`, marking it aborted and returning `true`
/// once `budget` runs out.
fn record_all(
    report: &mut CategoryReport,
    budget: &mut FailureBudget,
    results: impl IntoIterator<Item = ValidationResult>,
) -> bool {
    for result in results {
        if result.passed() {
            debug!(check = %result.label, "check passed");
        } else {
            warn!(check = %result.label, diagnostic = %result.diagnostic(), "check failed");
        }
        report.record(&result);
        if budget.record(result.passed()) {
            warn!(category = %report.name, failures = budget.failures(), "failure budget exhausted");
            report.aborted = true;
            return true;
        }
    }
    false
}
