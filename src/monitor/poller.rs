//! Fixed-interval monitoring loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::model::Dataset;
use crate::state::AppState;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub probed: usize,
    pub reachable: usize,
    pub alerts_raised: usize,
    pub alerts_sent: usize,
}

/// Load the dataset, probe every enabled device once and dispatch the
/// resulting alerts.
pub async fn run_cycle(state: &AppState) -> Result<CycleSummary, AppError> {
    let _cycle = state.cycle.lock().await;

    let data = state.load().await?;
    let settings = state.notification_settings().await?;

    let targets = {
        let mut monitor = state.monitor.write().await;
        monitor.sync(&data.ip_addresses);
        monitor.targets()
    };

    let results = state.fping.probe(&targets).await?;
    let reachable = results.iter().filter(|r| r.alive).count();

    let now = Utc::now();
    let (alerts, observed) = {
        let mut monitor = state.monitor.write().await;
        let alerts = monitor.apply(&results, &settings, now);
        (alerts, monitor.reachability())
    };
    let alerts_raised = alerts.len();

    let changed: Vec<(String, bool)> = observed
        .into_iter()
        .filter(|(id, up)| {
            data.ip_addresses
                .iter()
                .any(|ip| &ip.id == id && ip.is_online != Some(*up))
        })
        .collect();
    if !changed.is_empty() {
        let count = changed.len();
        let checked = now.to_rfc3339();
        match state
            .modify(move |data| {
                store_status(data, &changed, &checked);
                Ok(())
            })
            .await
        {
            Ok(()) => debug!(changed = count, "Stored device status changes"),
            Err(e) => warn!(error = %e, "Failed to store device status"),
        }
    }

    let mut alerts_sent = 0;
    for alert in alerts {
        let outcome = state
            .notifier
            .send_alert(&alert.device_id, alert.payload, &settings)
            .await;
        if outcome.success {
            alerts_sent += 1;
        }
    }
    state
        .monitor
        .write()
        .await
        .record_alerts_sent(alerts_sent as u64);

    Ok(CycleSummary {
        probed: targets.len(),
        reachable,
        alerts_raised,
        alerts_sent,
    })
}

/// Copy fresh reachability onto the matching address records.
fn store_status(data: &mut Dataset, changed: &[(String, bool)], checked: &str) {
    for ip in &mut data.ip_addresses {
        if let Some((_, up)) = changed.iter().find(|(id, _)| *id == ip.id) {
            ip.is_online = Some(*up);
            ip.last_checked = Some(checked.to_string());
        }
    }
}

pub fn spawn(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs(), "Starting monitor poller");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match run_cycle(&state).await {
                Ok(summary) => debug!(
                    probed = summary.probed,
                    reachable = summary.reachable,
                    alerts = summary.alerts_raised,
                    "Monitor cycle complete"
                ),
                Err(e) => warn!(error = %e, "Monitor cycle failed"),
            }
        }
    })
}
