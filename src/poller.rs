use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{JobBackend, PollReply};
use crate::config::{POLL_INTERVAL_MS, POLL_MAX_INTERVAL_MS};
use crate::error::BridgeError;
use crate::types::{JobHandle, JobStatus};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Spacing and give-up rules for one poll loop.
///
/// The default polls every 10s with no attempt ceiling: the loop runs until
/// the job resolves, a query fails, or the caller cancels. Set
/// `max_attempts` to bound it and `backoff_factor > 1.0` to stretch the
/// spacing after every `processing` answer, capped at `max_interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub backoff_factor: f64,
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(POLL_INTERVAL_MS))
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            backoff_factor: 1.0,
            max_interval: interval.max(Duration::from_millis(POLL_MAX_INTERVAL_MS)),
        }
    }

    /// Spacing after `current`, never above `max_interval`. A factor that
    /// overflows the duration range lands on the cap.
    pub fn next_delay(&self, current: Duration) -> Duration {
        if !(self.backoff_factor > 1.0) {
            return current;
        }
        match Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor) {
            Ok(next) if next <= self.max_interval => next,
            _ => self.max_interval,
        }
    }
}

// ---------------------------------------------------------------------------
// Loop state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Loop spawned, no query issued yet.
    Submitted,
    Polling,
    Ready,
    Failed,
    Cancelled,
    /// The attempt ceiling was reached while the job was still processing.
    TimedOut,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollState::Submitted | PollState::Polling)
    }
}

impl std::fmt::Display for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PollState::Submitted => "submitted",
            PollState::Polling => "polling",
            PollState::Ready => "ready",
            PollState::Failed => "failed",
            PollState::Cancelled => "cancelled",
            PollState::TimedOut => "timed_out",
        };
        write!(f, "{s}")
    }
}

/// Handle to a running poll loop.
pub struct PollLoop {
    token: CancellationToken,
    state_rx: watch::Receiver<PollState>,
    task: JoinHandle<PollState>,
}

impl PollLoop {
    /// Token that stops future ticks. A query already in flight still
    /// completes and its result is still delivered.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn state(&self) -> PollState {
        *self.state_rx.borrow()
    }

    /// Wait for the loop to end and return its terminal state.
    pub async fn finished(self) -> PollState {
        match self.task.await {
            Ok(state) => state,
            Err(e) => {
                warn!("Poll task aborted: {e}");
                PollState::Failed
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct Poller {
    backend: Arc<dyn JobBackend>,
    policy: PollPolicy,
}

impl Poller {
    pub fn new(backend: Arc<dyn JobBackend>, policy: PollPolicy) -> Self {
        Self { backend, policy }
    }

    /// Spawn the loop for `handle`. Every query yields exactly one
    /// [`JobStatus`] on `status_tx`; at most one of them is terminal, after
    /// which the sender is dropped.
    pub fn poll(&self, handle: JobHandle, status_tx: mpsc::Sender<JobStatus>) -> PollLoop {
        let token = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(PollState::Submitted);

        let task = tokio::spawn(run_loop(
            Arc::clone(&self.backend),
            handle,
            self.policy.clone(),
            status_tx,
            token.clone(),
            state_tx,
        ));

        PollLoop { token, state_rx, task }
    }
}

async fn run_loop(
    backend: Arc<dyn JobBackend>,
    handle: JobHandle,
    policy: PollPolicy,
    status_tx: mpsc::Sender<JobStatus>,
    token: CancellationToken,
    state_tx: watch::Sender<PollState>,
) -> PollState {
    let finish = |state: PollState| {
        state_tx.send_replace(state);
        info!(job_id = %handle, state = %state, "Poll loop finished: {state}");
        state
    };

    let mut attempt = 0u32;
    let mut delay = policy.interval;

    loop {
        if token.is_cancelled() {
            return finish(PollState::Cancelled);
        }

        attempt += 1;
        // Ticks are measured from the start of each query, so request
        // latency does not stretch the spacing.
        let tick_started = Instant::now();
        state_tx.send_replace(PollState::Polling);
        debug!(job_id = %handle, attempt, "Polling job status");

        let (status, terminal) = match backend.status(&handle).await {
            Ok(PollReply::Processing) => (JobStatus::Processing, None),
            Ok(PollReply::Finished(envelope)) => (JobStatus::Ready(envelope), Some(PollState::Ready)),
            Err(e) => {
                warn!(job_id = %handle, attempt, "Poll failed: {e}");
                (JobStatus::Failed(e), Some(PollState::Failed))
            }
        };

        if status_tx.send(status).await.is_err() {
            // Nobody is listening anymore.
            return finish(PollState::Cancelled);
        }
        if let Some(state) = terminal {
            return finish(state);
        }

        if let Some(max) = policy.max_attempts {
            if attempt >= max {
                let _ = status_tx.send(JobStatus::Failed(BridgeError::TimedOut { attempts: attempt })).await;
                return finish(PollState::TimedOut);
            }
        }

        tokio::select! {
            _ = token.cancelled() => return finish(PollState::Cancelled),
            _ = tokio::time::sleep_until(tick_started + delay) => {}
        }
        delay = policy.next_delay(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::ScriptedBackend;
    use serde_json::json;

    fn ready(records: serde_json::Value) -> crate::error::Result<PollReply> {
        Ok(PollReply::classify(records))
    }

    fn handle() -> JobHandle {
        JobHandle::new("job-1").unwrap()
    }

    fn ready_one_row() -> crate::error::Result<PollReply> {
        ready(json!([{}, {"headers": ["a"]}, {"a": 1}]))
    }

    async fn drain(mut rx: mpsc::Receiver<JobStatus>) -> Vec<JobStatus> {
        let mut out = Vec::new();
        while let Some(s) = rx.recv().await {
            out.push(s);
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn first_query_is_immediate_then_every_interval() {
        let backend = ScriptedBackend::new(vec![
            Ok(PollReply::Processing),
            Ok(PollReply::Processing),
            ready(json!([{}, {"headers": []}, {}])),
        ]);
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_millis(10_000)));
        let (tx, rx) = mpsc::channel(16);
        let started = tokio::time::Instant::now();

        let poll = poller.poll(handle(), tx);
        let statuses = drain(rx).await;
        assert_eq!(poll.finished().await, PollState::Ready);

        assert_eq!(statuses.len(), 3);
        assert!(matches!(statuses[0], JobStatus::Processing));
        assert!(matches!(statuses[1], JobStatus::Processing));
        assert!(matches!(statuses[2], JobStatus::Ready(_)));

        let offsets: Vec<Duration> = backend.call_times().iter().map(|t| *t - started).collect();
        assert_eq!(
            offsets,
            vec![Duration::ZERO, Duration::from_secs(10), Duration::from_secs(20)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_stops_loop_without_retry() {
        let backend = ScriptedBackend::new(vec![
            Ok(PollReply::Processing),
            Err(BridgeError::BackendRejected { endpoint: "/reply".to_string(), status: 500 }),
            Ok(PollReply::Processing),
        ]);
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_secs(1)));
        let (tx, rx) = mpsc::channel(16);

        let poll = poller.poll(handle(), tx);
        let statuses = drain(rx).await;
        assert_eq!(poll.finished().await, PollState::Failed);

        assert_eq!(statuses.len(), 2);
        match &statuses[1] {
            JobStatus::Failed(e) => assert_eq!(e.kind(), ErrorKind::BackendRejected),
            other => panic!("expected Failed, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn at_most_one_terminal_emission() {
        let backend = ScriptedBackend::new(vec![
            ready(json!([{}, {"headers": ["a"]}, {"a": 1}])),
            ready(json!([{}, {"headers": ["b"]}, {"b": 2}])),
        ]);
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_secs(1)));
        let (tx, rx) = mpsc::channel(16);

        let poll = poller.poll(handle(), tx);
        let statuses = drain(rx).await;
        poll.finished().await;

        let terminal = statuses.iter().filter(|s| s.is_terminal()).count();
        assert_eq!(terminal, 1);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_ticks() {
        let backend = ScriptedBackend::new(Vec::new());
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_secs(5)));
        let (tx, mut rx) = mpsc::channel(16);

        let poll = poller.poll(handle(), tx);
        assert!(matches!(rx.recv().await, Some(JobStatus::Processing)));
        poll.cancel();

        assert!(rx.recv().await.is_none());
        assert_eq!(poll.state(), PollState::Cancelled);
        assert_eq!(poll.finished().await, PollState::Cancelled);
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_ceiling_times_out() {
        let backend = ScriptedBackend::new(Vec::new());
        let policy = PollPolicy {
            max_attempts: Some(3),
            ..PollPolicy::fixed(Duration::from_secs(1))
        };
        let poller = Poller::new(backend.clone(), policy);
        let (tx, rx) = mpsc::channel(16);

        let poll = poller.poll(handle(), tx);
        let statuses = drain(rx).await;
        assert_eq!(poll.finished().await, PollState::TimedOut);

        assert_eq!(statuses.len(), 4);
        match statuses.last() {
            Some(JobStatus::Failed(BridgeError::TimedOut { attempts })) => assert_eq!(*attempts, 3),
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_stretches_spacing() {
        let backend = ScriptedBackend::new(vec![
            Ok(PollReply::Processing),
            Ok(PollReply::Processing),
            Ok(PollReply::Processing),
            ready(json!([{}, {"headers": []}, {}])),
        ]);
        let policy = PollPolicy {
            interval: Duration::from_secs(1),
            max_attempts: None,
            backoff_factor: 2.0,
            max_interval: Duration::from_secs(3),
        };
        let poller = Poller::new(backend.clone(), policy);
        let (tx, rx) = mpsc::channel(16);
        let started = tokio::time::Instant::now();

        let poll = poller.poll(handle(), tx);
        drain(rx).await;
        poll.finished().await;

        let offsets: Vec<u64> = backend
            .call_times()
            .iter()
            .map(|t| (*t - started).as_secs())
            .collect();
        // waits of 1s, 2s, then capped at 3s
        assert_eq!(offsets, vec![0, 1, 3, 6]);
    }

    #[test]
    fn next_delay_respects_cap() {
        let policy = PollPolicy {
            interval: Duration::from_secs(10),
            max_attempts: None,
            backoff_factor: 1.5,
            max_interval: Duration::from_secs(20),
        };
        assert_eq!(policy.next_delay(Duration::from_secs(10)), Duration::from_secs(15));
        assert_eq!(policy.next_delay(Duration::from_secs(15)), Duration::from_secs(20));
        assert_eq!(PollPolicy::default().next_delay(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[test]
    fn next_delay_survives_unbounded_factor() {
        let policy = PollPolicy {
            backoff_factor: f64::INFINITY,
            ..PollPolicy::fixed(Duration::from_secs(10))
        };
        assert_eq!(policy.next_delay(Duration::from_secs(10)), policy.max_interval);

        let huge = PollPolicy {
            backoff_factor: 1e300,
            ..PollPolicy::fixed(Duration::from_secs(10))
        };
        assert_eq!(huge.next_delay(Duration::from_secs(10)), huge.max_interval);

        let nan = PollPolicy {
            backoff_factor: f64::NAN,
            ..PollPolicy::fixed(Duration::from_secs(10))
        };
        assert_eq!(nan.next_delay(Duration::from_secs(10)), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_replies_keep_fixed_rate() {
        let backend = ScriptedBackend::delayed(
            vec![Ok(PollReply::Processing), Ok(PollReply::Processing), ready_one_row()],
            Duration::from_secs(3),
        );
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_secs(10)));
        let (tx, rx) = mpsc::channel(16);
        let started = tokio::time::Instant::now();

        let poll = poller.poll(handle(), tx);
        drain(rx).await;
        assert_eq!(poll.finished().await, PollState::Ready);

        let offsets: Vec<u64> = backend
            .call_times()
            .iter()
            .map(|t| (*t - started).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 10, 20]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_query_still_delivers_reply() {
        let backend = ScriptedBackend::delayed(vec![ready_one_row()], Duration::from_secs(5));
        let poller = Poller::new(backend.clone(), PollPolicy::fixed(Duration::from_secs(10)));
        let (tx, mut rx) = mpsc::channel(16);

        let poll = poller.poll(handle(), tx);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(backend.call_count(), 1);
        poll.cancel();

        assert!(matches!(rx.recv().await, Some(JobStatus::Ready(_))));
        assert!(rx.recv().await.is_none());
        assert_eq!(poll.finished().await, PollState::Ready);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.call_count(), 1);
    }
}
