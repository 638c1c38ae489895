use async_trait::async_trait;
use tokio::time;

use crate::{plugins::Plugin, prelude::*, state::AppState};

/// Settles pending commissions once they are old enough.
pub struct SettleCommissions;

#[async_trait]
impl Plugin for SettleCommissions {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let every = app.config.settle_interval;
    if every.is_zero() {
      info!("Commission settlement disabled via config (0 interval)");
      return Ok(());
    }

    let after = TimeDelta::from_std(app.config.settle_after)?;
    info!(
      "Commission settlement started (interval: {}, after: {})",
      humantime::format_duration(every),
      humantime::format_duration(app.config.settle_after)
    );

    tokio::spawn(async move {
      let mut interval = time::interval(every);
      loop {
        interval.tick().await;

        let cutoff = now() - after;
        match app.bounded(app.sv().commission.settle_due(cutoff)).await {
          Ok(0) => debug!("No commissions due"),
          Ok(settled) => info!("Settled {settled} commission(s)"),
          Err(err) => error!("Commission settlement failed: {err}"),
        }
      }
    });

    Ok(())
  }
}

/// Re-runs settlement side effects that failed or never finished after their
/// notification was acknowledged.
pub struct RetryFailures;

#[async_trait]
impl Plugin for RetryFailures {
  async fn start(&self, app: Arc<AppState>) -> anyhow::Result<()> {
    let every = app.config.retry_interval;
    if every.is_zero() {
      info!("Settlement retry disabled via config (0 interval)");
      return Ok(());
    }

    let limit = TimeDelta::from_std(app.config.op_timeout)?;

    tokio::spawn(async move {
      let mut interval = time::interval(every);
      // nothing to retry right at startup
      interval.tick().await;

      loop {
        interval.tick().await;

        // anything paid before this has had a full limit to settle
        let cutoff = now() - limit;
        match app.bounded(app.sv().reconciler.resume_unsettled(cutoff)).await {
          Ok(0) => {}
          Ok(resumed) => info!("Resumed settlement of {resumed} order(s)"),
          Err(err) => error!("Resuming unsettled orders failed: {err}"),
        }

        match app.bounded(app.sv().failures.retry_all()).await {
          Ok(report) if report.resolved + report.failed == 0 => {}
          Ok(report) => info!(
            "Settlement retry: {} resolved, {} still failing",
            report.resolved, report.failed
          ),
          Err(err) => error!("Settlement retry failed: {err}"),
        }
      }
    });

    Ok(())
  }
}
