//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::client::{JobBackend, PollReply};
use crate::error::Result;
use crate::status::{Severity, StatusSink};
use crate::types::{JobHandle, JobRequest, PriceSummary};

/// Backend that answers status queries from a script and keeps answering
/// `processing` once the script runs out. `reply_delay` holds every status
/// answer back to simulate a slow proxy.
pub struct ScriptedBackend {
    reply_delay: Duration,
    submit_result: Mutex<Option<Result<JobHandle>>>,
    replies: Mutex<VecDeque<Result<PollReply>>>,
    submitted: Mutex<Vec<JobRequest>>,
    calls: Mutex<Vec<Instant>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<PollReply>>) -> Arc<Self> {
        Self::delayed(replies, Duration::ZERO)
    }

    pub fn delayed(replies: Vec<Result<PollReply>>, reply_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply_delay,
            submit_result: Mutex::new(None),
            replies: Mutex::new(replies.into()),
            submitted: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_submit(replies: Vec<Result<PollReply>>, submit: Result<JobHandle>) -> Arc<Self> {
        let backend = Self::new(replies);
        *backend.submit_result.lock().unwrap() = Some(submit);
        backend
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<JobRequest> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobBackend for ScriptedBackend {
    async fn submit(&self, request: &JobRequest) -> Result<JobHandle> {
        self.submitted.lock().unwrap().push(request.clone());
        match self.submit_result.lock().unwrap().take() {
            Some(result) => result,
            None => Ok(JobHandle::new("job-1").unwrap()),
        }
    }

    async fn status(&self, _handle: &JobHandle) -> Result<PollReply> {
        self.calls.lock().unwrap().push(Instant::now());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(PollReply::Processing));
        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }
        reply
    }
}

/// Sink that records every update in order.
#[derive(Default)]
pub struct RecordingSink {
    pub statuses: Mutex<Vec<(String, Severity)>>,
    pub summaries: Mutex<Vec<PriceSummary>>,
}

impl RecordingSink {
    pub fn statuses(&self) -> Vec<(String, Severity)> {
        self.statuses.lock().unwrap().clone()
    }
}

impl StatusSink for RecordingSink {
    fn set_status(&self, message: &str, severity: Severity) {
        self.statuses.lock().unwrap().push((message.to_string(), severity));
    }

    fn show_summary(&self, summary: &PriceSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}
