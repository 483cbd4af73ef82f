//! Generator-driven analog loops.
//!
//! For every type pair, protocol and pair count: provision a fresh topology,
//! start a logged session, drive every output with a generator, then stop,
//! collect and compare each pair.

use tracing::info;

use super::{record_all, CampaignError, CampaignRunner, Category, FailureBudget};
use crate::pacing;
use crate::platform::{Platform, StopMode};
use crate::provision::Provisioner;
use crate::report::CategoryReport;
use crate::session::SessionController;
use crate::stimulus::StimulusDriver;
use crate::topology::layout::{analog_topology, TypePair};
use crate::topology::message::Protocol;
use crate::validate::{check_series, ValidationResult};

pub(super) async fn run<P: Platform + ?Sized>(runner: &CampaignRunner<'_, P>) -> Result<CategoryReport, CampaignError> {
    let cfg = &runner.config.signal;
    let mut report = CategoryReport::new(Category::Signal.as_str());
    let mut budget = FailureBudget::new(cfg.failure_budget);
    let mut sessions = SessionController::new(runner.platform);

    'types: for &types in &cfg.types {
        for &protocol in &cfg.protocols {
            for &pairs in &cfg.pair_counts {
                let label = format!("{}/{} {protocol} x{pairs}", types.cvt, types.raw);
                if pairs == 0 {
                    report.skip(&label, "no point pairs");
                    continue;
                }

                let results = match iteration(runner, &mut sessions, types, protocol, pairs).await {
                    Ok(results) => results,
                    Err(e) => return Err(runner.abandon(&mut sessions, e).await),
                };
                let labelled = results.into_iter().map(|r| {
                    let check = format!("{label} {}", r.label);
                    r.with_label(check)
                });
                if record_all(&mut report, &mut budget, labelled) {
                    break 'types;
                }
            }
        }
    }

    sessions.stop(StopMode::UserAbort).await;
    Ok(report)
}

async fn iteration<'a, P: Platform + ?Sized>(
    runner: &CampaignRunner<'a, P>,
    sessions: &mut SessionController<'a, P>,
    types: TypePair,
    protocol: Protocol,
    pairs: usize,
) -> Result<Vec<ValidationResult>, CampaignError> {
    let cfg = &runner.config.signal;
    let pacing = &runner.config.pacing;

    info!(cvt = %types.cvt, raw = %types.raw, %protocol, pairs, "signal iteration starting");

    let topology = analog_topology(types, protocol, pairs, cfg.message_length);
    Provisioner::new(runner.platform)
        .provision(&cfg.rtdb, &topology)
        .await?;
    pacing::settle("provision", pacing.after_provision()).await;

    let params = runner.session_params(&cfg.test, &cfg.rtdb, &format!("test_{}", types.cvt));
    sessions.reset(&params).await;
    sessions.start(&params).await?;
    pacing::settle("session start", pacing.after_start()).await;

    StimulusDriver::new(runner.platform)
        .attach_generators(&topology.outputs(), types.cvt, &cfg.generator)
        .await?;
    pacing::settle("generators", pacing.after_generators()).await;

    let collector = runner.collector();
    let mut results = Vec::with_capacity(topology.pairs.len());
    for pair in &topology.pairs {
        sessions.stop(StopMode::Normal).await;
        let collected = collector
            .collect(&params.path(), &pair.input, &pair.output, cfg.record_cap, cfg.selector)
            .await?;
        results.push(check_series(&collected, cfg.tolerance));
    }

    sessions.teardown().await;
    Ok(results)
}
