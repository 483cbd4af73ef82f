//! Discrete constant writes, read back from the live input point.

use tracing::info;

use super::{record_all, CampaignError, CampaignRunner, Category, FailureBudget};
use crate::config::ConstantCase;
use crate::pacing;
use crate::platform::{Platform, StopMode, Value};
use crate::provision::Provisioner;
use crate::report::CategoryReport;
use crate::session::SessionController;
use crate::stimulus::StimulusDriver;
use crate::topology::layout::{analog_topology, PointPair, TypePair};
use crate::validate::{check_constant, ValidationResult};

pub(super) async fn run<P: Platform + ?Sized>(runner: &CampaignRunner<'_, P>) -> Result<CategoryReport, CampaignError> {
    let cfg = &runner.config.constants;
    let mut report = CategoryReport::new(Category::Constants.as_str());
    let mut budget = FailureBudget::new(cfg.failure_budget);
    let mut sessions = SessionController::new(runner.platform);

    'cases: for case in &cfg.cases {
        if case.values.is_empty() {
            report.skip(&format!("{}/{}", case.cvt, case.raw), "no values configured");
            continue;
        }

        for &value in &case.values {
            let result = match iteration(runner, &mut sessions, case, value).await {
                Ok(result) => result,
                Err(e) => return Err(runner.abandon(&mut sessions, e).await),
            };
            if record_all(&mut report, &mut budget, [result]) {
                sessions.teardown().await;
                break 'cases;
            }
        }
        sessions.teardown().await;
    }

    Ok(report)
}

async fn iteration<'a, P: Platform + ?Sized>(
    runner: &CampaignRunner<'a, P>,
    sessions: &mut SessionController<'a, P>,
    case: &ConstantCase,
    value: f64,
) -> Result<ValidationResult, CampaignError> {
    let cfg = &runner.config.constants;
    let pacing = &runner.config.pacing;
    let types = TypePair::new(case.cvt, case.raw);

    info!(cvt = %case.cvt, raw = %case.raw, value, "constant iteration starting");

    let topology = analog_topology(types, cfg.protocol, 1, runner.config.signal.message_length);
    let Some(PointPair { input, output }) = topology.pairs.first().cloned() else {
        return Err(CampaignError::Misconfigured {
            category: Category::Constants,
            reason: "topology has no point pair".to_string(),
        });
    };

    Provisioner::new(runner.platform)
        .provision(&cfg.rtdb, &topology)
        .await?;
    pacing::settle("provision", pacing.after_provision()).await;

    let params = runner.session_params(&cfg.test, &cfg.rtdb, &format!("test_{}", case.cvt));
    sessions.reset(&params).await;
    sessions.start(&params).await?;
    pacing::settle("session start", pacing.after_start()).await;

    StimulusDriver::new(runner.platform)
        .write(&output, Value::Number(value), pacing.constant_settle())
        .await?;
    let observed = runner.collector().snapshot(&input).await?;
    let observed = observed.value.as_number().unwrap_or(f64::NAN);

    sessions.stop(StopMode::Normal).await;

    Ok(check_constant(&input, &output, case.cvt, value, observed)
        .with_label(format!("{}/{} = {value}", case.cvt, case.raw)))
}
