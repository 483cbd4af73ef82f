//! Packed string channels: rotate candidate strings through every output and
//! read each back from its input.

use tracing::info;

use super::{record_all, CampaignError, CampaignRunner, Category, FailureBudget};
use crate::pacing;
use crate::platform::{Platform, StopMode, Value};
use crate::provision::Provisioner;
use crate::report::CategoryReport;
use crate::session::SessionController;
use crate::stimulus::{Rotation, StimulusDriver};
use crate::topology::layout::{string_topology, Topology};
use crate::validate::check_string;

pub(super) async fn run<P: Platform + ?Sized>(runner: &CampaignRunner<'_, P>) -> Result<CategoryReport, CampaignError> {
    let cfg = &runner.config.strings;
    let mut report = CategoryReport::new(Category::Strings.as_str());

    if cfg.candidates.is_empty() {
        return Err(CampaignError::Misconfigured {
            category: Category::Strings,
            reason: "no candidate strings".to_string(),
        });
    }

    let topology = string_topology(&cfg.shape, cfg.protocol);
    let mut sessions = SessionController::new(runner.platform);

    if let Err(e) = prepare(runner, &mut sessions, &topology).await {
        return Err(runner.abandon(&mut sessions, e).await);
    }

    let driver = StimulusDriver::new(runner.platform);
    let collector = runner.collector();
    let mut candidates = Rotation::new(cfg.candidates.clone());
    let mut budget = FailureBudget::new(cfg.failure_budget);
    let settle = runner.config.pacing.string_settle();

    'rounds: for round in 1..=cfg.rounds {
        for pair in &topology.pairs {
            let Some(expected) = candidates.next_item().cloned() else {
                break 'rounds;
            };

            let observed = match driver.write(&pair.output, Value::Text(expected.clone()), settle).await {
                Ok(()) => collector.snapshot(&pair.input).await.map_err(CampaignError::from),
                Err(e) => Err(e.into()),
            };
            let observed = match observed {
                Ok(value) => value.value.as_text().unwrap_or_default().to_string(),
                Err(e) => return Err(runner.abandon(&mut sessions, e).await),
            };

            let result = check_string(&pair.input, &pair.output, &expected, &observed)
                .with_label(format!("round {round} {} <- {expected:?}", pair.input));
            if record_all(&mut report, &mut budget, [result]) {
                break 'rounds;
            }
        }
    }

    sessions.stop(StopMode::UserAbort).await;
    Ok(report)
}

async fn prepare<'a, P: Platform + ?Sized>(
    runner: &CampaignRunner<'a, P>,
    sessions: &mut SessionController<'a, P>,
    topology: &Topology,
) -> Result<(), CampaignError> {
    let cfg = &runner.config.strings;
    let pacing = &runner.config.pacing;

    info!(
        channels = cfg.shape.channels,
        rounds = cfg.rounds,
        protocol = %cfg.protocol,
        "string run starting"
    );

    Provisioner::new(runner.platform)
        .provision(&cfg.rtdb, topology)
        .await?;
    pacing::settle("provision", pacing.after_provision()).await;

    let params = runner
        .session_params(&cfg.test, &cfg.rtdb, &cfg.session)
        .with_logging(false);
    sessions.reset(&params).await;
    sessions.start(&params).await?;
    pacing::settle("session start", pacing.string_warmup()).await;
    Ok(())
}
