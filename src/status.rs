use tokio::sync::mpsc;
use tracing::{error, info};

use crate::types::PriceSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Successful phase transition (rendered green by hosts).
    Normal,
    /// Terminal failure (rendered red by hosts).
    Error,
}

/// Host-provided display for pipeline progress.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, message: &str, severity: Severity);

    /// Price boxes and trend narrative from the envelope summary record.
    fn show_summary(&self, _summary: &PriceSummary) {}
}

/// Sink for headless runs: every update becomes a log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStatusSink;

impl StatusSink for LogStatusSink {
    fn set_status(&self, message: &str, severity: Severity) {
        match severity {
            Severity::Normal => info!(target: "status", "{message}"),
            Severity::Error => error!(target: "status", "{message}"),
        }
    }

    fn show_summary(&self, summary: &PriceSummary) {
        info!(
            target: "status",
            lowest = %summary.lowest,
            average = %summary.average,
            highest = %summary.highest,
            "Prices | lowest: {} | average: {} | highest: {}",
            summary.lowest, summary.average, summary.highest,
        );
        if !summary.trend.is_empty() {
            info!(target: "status", "Trend: {}", summary.trend);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Status { message: String, severity: Severity },
    Summary(PriceSummary),
}

/// Forwards updates to a host event loop.
#[derive(Debug, Clone)]
pub struct ChannelStatusSink {
    tx: mpsc::UnboundedSender<StatusEvent>,
}

impl ChannelStatusSink {
    pub fn new(tx: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self { tx }
    }
}

impl StatusSink for ChannelStatusSink {
    fn set_status(&self, message: &str, severity: Severity) {
        let _ = self.tx.send(StatusEvent::Status {
            message: message.to_string(),
            severity,
        });
    }

    fn show_summary(&self, summary: &PriceSummary) {
        let _ = self.tx.send(StatusEvent::Summary(summary.clone()));
    }
}
