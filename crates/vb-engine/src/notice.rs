//! Human readable notifications sent through the `NotificationSink`

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};
use vb_core::NotificationSink;

use crate::charging::SessionReport;
use crate::climatisation::ExtendStop;

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    SessionEnded(SessionReport),
    ChargeLimitReached { soc_pct: f64, limit_pct: u8 },
    ExtendDisabled { reason: ExtendStop, soc_pct: f64 },
    /// A climatisation start expired while the cabin stayed off
    ClimatisationFailed,
    Offline,
    Online,
    WokeUp,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::SessionEnded(report) => {
                let stats = &report.stats;
                write!(
                    f,
                    "{}: charged {:.0}% ({:.1} kWh) in {:.1} h, avg {:.1} kW, max {:.1} kW, now at {:.0}%",
                    report.reason,
                    stats.charged_pct,
                    stats.charged_kwh,
                    stats.hours,
                    stats.avg_kw,
                    stats.max_kw,
                    stats.ending_soc_pct
                )
            }
            Notice::ChargeLimitReached { soc_pct, limit_pct } => write!(
                f,
                "Charge limit of {}% reached at {:.0}%, stopping charging",
                limit_pct, soc_pct
            ),
            Notice::ExtendDisabled {
                reason: ExtendStop::LowBattery,
                soc_pct,
            } => write!(
                f,
                "Battery at {:.0}%, climatisation extension switched off",
                soc_pct
            ),
            Notice::ExtendDisabled {
                reason: ExtendStop::ArrivedHome,
                ..
            } => f.write_str("Arrived home, climatisation extension switched off"),
            Notice::ClimatisationFailed => f.write_str("Climatisation could not be started"),
            Notice::Offline => f.write_str("Vehicle is offline"),
            Notice::Online => f.write_str("Vehicle is back online"),
            Notice::WokeUp => f.write_str("Car woke up"),
        }
    }
}

/// Hands notices to a background task that delivers them in order
#[derive(Clone)]
pub(crate) struct NoticeSender {
    tx: mpsc::UnboundedSender<Notice>,
}

impl NoticeSender {
    pub(crate) fn spawn(sink: Arc<dyn NotificationSink>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(deliver(sink, rx));
        Self { tx }
    }

    /// Never waits for the sink
    pub(crate) fn send(&self, notice: Notice) {
        info!(notice = %notice, "Notification");
        if self.tx.send(notice).is_err() {
            debug!("Notification worker is gone");
        }
    }
}

async fn deliver(sink: Arc<dyn NotificationSink>, mut rx: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = rx.recv().await {
        if let Err(e) = sink.notify(&notice.to_string()).await {
            debug!(error = %e, "Notification dropped");
        }
    }
}
