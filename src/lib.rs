//! hilbench -- hardware-in-the-loop validation campaigns for RTDB test
//! platforms.
//!
//! This crate provisions parametrized I/O topologies, drives test sessions
//! and signal generators, pulls logged samples back and validates input
//! against output channels. The platform itself is reached through the
//! engine traits in [`platform`]; [`platform::sim`] provides an in-process
//! loopback implementation.

pub mod campaign;
pub mod collect;
pub mod config;
pub mod pacing;
pub mod platform;
pub mod provision;
pub mod report;
pub mod session;
pub mod stimulus;
pub mod topology;
pub mod validate;

use campaign::{CampaignError, CampaignRunner, Category};
use config::CampaignConfig;
use platform::sim::SimPlatform;
use report::CampaignReport;

/// Run `categories` against a fresh loopback simulator.
pub async fn run_simulated(config: &CampaignConfig, categories: &[Category]) -> Result<CampaignReport, CampaignError> {
    tracing::info!(seed = config.sim.seed, jitter = config.sim.jitter, "Starting loopback simulator");
    let platform = SimPlatform::new(config.sim.clone());
    CampaignRunner::new(&platform, config).run(categories).await
}
