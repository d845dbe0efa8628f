use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::JobBackend;
use crate::config::CHANNEL_CAPACITY;
use crate::error::{BridgeError, Result};
use crate::extract;
use crate::poller::{PollPolicy, PollState, Poller};
use crate::sheet::{SheetWriter, Workbook, WriteSummary};
use crate::status::{Severity, StatusSink};
use crate::types::{JobHandle, JobRequest, JobStatus, PriceSummary, RawEnvelope};

pub const MSG_SEARCHING: &str = "Searching...";
pub const MSG_PROCESSING: &str = "Still processing...";
pub const MSG_CANCELLED: &str = "Search cancelled.";

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub job: JobHandle,
    /// Terminal state of the poll loop: `Ready` or `Cancelled`.
    pub state: PollState,
    pub summary: Option<PriceSummary>,
    pub written: Option<WriteSummary>,
}

/// One search end to end: submit, poll until the job resolves, then lay the
/// table out in the workbook. Progress goes to the caller's [`StatusSink`].
pub struct Orchestrator {
    backend: Arc<dyn JobBackend>,
    workbook: Arc<dyn Workbook>,
    policy: PollPolicy,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn JobBackend>, workbook: Arc<dyn Workbook>, policy: PollPolicy) -> Self {
        Self {
            backend,
            workbook,
            policy,
        }
    }

    pub fn workbook(&self) -> Arc<dyn Workbook> {
        Arc::clone(&self.workbook)
    }

    /// Runs are not serialized here. Two concurrent calls start two
    /// independent poll loops.
    pub async fn run(&self, request: JobRequest, sink: &dyn StatusSink, cancel: CancellationToken) -> Result<RunReport> {
        sink.set_status(MSG_SEARCHING, Severity::Normal);

        let job = match self.backend.submit(&request).await {
            Ok(job) => job,
            Err(e) => return Err(report(sink, format!("Failed to send data: {e}"), e)),
        };
        info!(
            job_id = %job,
            site_url = %request.target_url,
            destination = %request.destination,
            "Job submitted: {job}"
        );
        sink.set_status(&format!("Data sent successfully. Response ID: {job}"), Severity::Normal);

        let (status_tx, mut status_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let poll = Poller::new(Arc::clone(&self.backend), self.policy.clone()).poll(job.clone(), status_tx);

        let mut envelope: Option<RawEnvelope> = None;
        let mut failure: Option<BridgeError> = None;
        let mut cancel_sent = false;

        loop {
            tokio::select! {
                biased;
                status = status_rx.recv() => match status {
                    Some(JobStatus::Processing) => sink.set_status(MSG_PROCESSING, Severity::Normal),
                    Some(JobStatus::Ready(env)) => envelope = Some(env),
                    Some(JobStatus::Failed(e)) => failure = Some(e),
                    None => break,
                },
                _ = cancel.cancelled(), if !cancel_sent => {
                    info!(job_id = %job, "Cancelling poll loop");
                    poll.cancel();
                    cancel_sent = true;
                }
            }
        }
        let state = poll.finished().await;

        if let Some(e) = failure {
            return Err(report(sink, format!("Error polling backend: {e}"), e));
        }
        // An answer already in flight when the cancel landed is still used.
        let Some(envelope) = envelope else {
            if state != PollState::Cancelled {
                let e = BridgeError::PollAborted { state: state.to_string() };
                return Err(report(sink, format!("Error polling backend: {e}"), e));
            }
            sink.set_status(MSG_CANCELLED, Severity::Normal);
            return Ok(RunReport {
                job,
                state,
                summary: None,
                written: None,
            });
        };

        let summary = extract::summary(&envelope);
        sink.show_summary(&summary);

        let table = match extract::extract(&envelope) {
            Ok(table) => table,
            Err(e) => return Err(report(sink, e.to_string(), e)),
        };

        let written = match SheetWriter::new(Arc::clone(&self.workbook))
            .write(&table, request.destination)
            .await
        {
            Ok(w) => w,
            Err(e) => return Err(report(sink, format!("Failed to write to sheet: {e}"), e)),
        };

        sink.set_status(
            &format!(
                "Processing complete. {} row(s) written to '{}'.",
                written.rows_written, written.sheet
            ),
            Severity::Normal,
        );

        Ok(RunReport {
            job,
            state,
            summary: Some(summary),
            written: Some(written),
        })
    }
}

fn report(sink: &dyn StatusSink, message: String, e: BridgeError) -> BridgeError {
    warn!(kind = ?e.kind(), "{message}");
    sink.set_status(&message, Severity::Error);
    e
}
