use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::probe::{Probe, ProbeError};
use crate::target::{CheckOutcome, Target};

/// Upper bound (exclusive) of the random delay added to every backoff sleep
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(200);

/// Runs one check cycle: the probe plus bounded retries with exponential backoff.
///
/// Only transport failures are retried. Any HTTP response ends the cycle,
/// whether or not its status is one the target expects.
pub struct RetryController {
    probe: Arc<dyn Probe>,
    max_jitter: Duration,
    max_backoff: Option<Duration>,
}

impl RetryController {
    pub fn new(probe: Arc<dyn Probe>) -> Self {
        Self { probe, max_jitter: DEFAULT_MAX_JITTER, max_backoff: None }
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    /// Cap a single backoff sleep (jitter excluded). `None` leaves growth uncapped.
    pub fn with_max_backoff(mut self, max_backoff: Option<Duration>) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    /// Deterministic part of the sleep before retry number `retry` (1-based):
    /// `initial * 2^(retry - 1)`, capped when a maximum is configured
    pub fn backoff_delay(&self, initial: Duration, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        let delay = initial.saturating_mul(factor);
        match self.max_backoff {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    fn jitter(&self) -> Duration {
        let max_nanos = u64::try_from(self.max_jitter.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(rand::thread_rng().gen_range(0..max_nanos))
    }

    /// Run a full cycle for `target`. Never fails: network trouble ends up in the outcome.
    pub async fn run_cycle(&self, target: &Target) -> CheckOutcome {
        let start = Instant::now();
        let mut failures: u32 = 0;
        let mut last_error: Option<ProbeError> = None;

        let status = loop {
            match self.probe.execute(target).await {
                Ok(code) => break Some(code),
                Err(err) => {
                    failures += 1;
                    if failures > target.spec.retries {
                        debug!(
                            target_id = %target.id,
                            attempts = failures,
                            error = %err,
                            "probe attempts exhausted"
                        );
                        last_error = Some(err);
                        break None;
                    }

                    let pause = self
                        .backoff_delay(target.initial_backoff(), failures)
                        .saturating_add(self.jitter());
                    debug!(
                        target_id = %target.id,
                        attempt = failures,
                        error = %err,
                        retry_in_ms = pause.as_millis() as u64,
                        "probe attempt failed"
                    );
                    last_error = Some(err);
                    sleep(pause).await;
                }
            }
        };

        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        let ok = status.is_some_and(|code| target.accepts(code));
        // A received status documents the failure on its own
        let error = match status {
            Some(_) => None,
            None => last_error.map(|e| e.to_string()),
        };

        debug!(target_id = %target.id, ok, ?status, latency_ms, "check cycle finished");

        CheckOutcome { target_id: target.id, checked_at: Utc::now(), ok, status, latency_ms, error }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, VecDeque};
    use std::sync::Mutex;

    use super::*;
    use crate::target::TargetSpec;

    /// Replays a fixed list of attempt results and records when each attempt happened
    struct ScriptedProbe {
        script: Mutex<VecDeque<Result<u16, ProbeError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedProbe {
        fn new(script: Vec<Result<u16, ProbeError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Probe for ScriptedProbe {
        async fn execute(&self, _target: &Target) -> Result<u16, ProbeError> {
            self.calls.lock().unwrap().push(Instant::now());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProbeError::Transport("script exhausted".into())))
        }
    }

    fn target(retries: u32, backoff_s: f64) -> Target {
        let mut spec = TargetSpec::new("scripted", "http://localhost/");
        spec.retries = retries;
        spec.backoff_s = backoff_s;
        spec.expected_statuses = BTreeSet::from([200]);
        Target::from_spec(spec)
    }

    fn timeout() -> ProbeError {
        ProbeError::Timeout { timeout_ms: 100 }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let probe = ScriptedProbe::new(vec![Err(timeout())]);
        let controller = RetryController::new(probe.clone());

        let started = Instant::now();
        let outcome = controller.run_cycle(&target(0, 0.5)).await;

        assert_eq!(probe.calls().len(), 1);
        assert!(!outcome.ok);
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.error.as_deref(), Some("request timed out after 100 ms"));
        // No backoff sleep happened
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_status_is_not_retried() {
        let probe = ScriptedProbe::new(vec![Ok(500), Ok(200)]);
        let controller = RetryController::new(probe.clone());
        let t = target(2, 0.5);

        let outcome = controller.run_cycle(&t).await;

        assert_eq!(probe.calls().len(), 1);
        assert_eq!(outcome.target_id, t.id);
        assert!(!outcome.ok);
        assert_eq!(outcome.status, Some(500));
        assert_eq!(outcome.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_retries_with_backoff() {
        let probe = ScriptedProbe::new(vec![Err(timeout()), Err(timeout()), Err(timeout())]);
        let controller = RetryController::new(probe.clone());

        let outcome = controller.run_cycle(&target(2, 0.1)).await;

        let calls = probe.calls();
        assert_eq!(calls.len(), 3);

        // The timer wheel rounds sleeps up to whole milliseconds
        let first_gap = calls[1] - calls[0];
        let second_gap = calls[2] - calls[1];
        assert!(first_gap >= Duration::from_millis(100) && first_gap <= Duration::from_millis(300));
        assert!(second_gap >= Duration::from_millis(200) && second_gap <= Duration::from_millis(400));

        assert!(!outcome.ok);
        assert_eq!(outcome.status, None);
        assert_eq!(outcome.error.as_deref(), Some("request timed out after 100 ms"));
        assert_eq!(outcome.latency_ms, (calls[2] - calls[0]).as_millis() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_after_transport_failure() {
        let probe = ScriptedProbe::new(vec![Err(ProbeError::Connect("refused".into())), Ok(200)]);
        let controller = RetryController::new(probe.clone()).with_max_jitter(Duration::ZERO);

        let outcome = controller.run_cycle(&target(3, 0.5)).await;

        assert_eq!(probe.calls().len(), 2);
        assert!(outcome.ok);
        assert_eq!(outcome.status, Some(200));
        assert_eq!(outcome.error, None);
        assert_eq!(outcome.latency_ms, 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_transport_error_does_not_mask_response() {
        let probe = ScriptedProbe::new(vec![Err(timeout()), Ok(503)]);
        let controller = RetryController::new(probe.clone()).with_max_jitter(Duration::ZERO);

        let outcome = controller.run_cycle(&target(2, 0.1)).await;

        assert!(!outcome.ok);
        assert_eq!(outcome.status, Some(503));
        assert_eq!(outcome.error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_is_reported() {
        let probe = ScriptedProbe::new(vec![
            Err(ProbeError::Connect("refused".into())),
            Err(ProbeError::Transport("reset by peer".into())),
        ]);
        let controller = RetryController::new(probe.clone()).with_max_jitter(Duration::ZERO);

        let outcome = controller.run_cycle(&target(1, 0.1)).await;

        assert_eq!(probe.calls().len(), 2);
        assert_eq!(outcome.error.as_deref(), Some("request failed: reset by peer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_retries_plus_one() {
        for retries in 0..5 {
            let probe = ScriptedProbe::new(Vec::new());
            let controller = RetryController::new(probe.clone()).with_max_jitter(Duration::ZERO);

            controller.run_cycle(&target(retries, 0.01)).await;

            assert_eq!(probe.calls().len(), retries as usize + 1);
        }
    }

    #[test]
    fn test_backoff_schedule_doubles() {
        let controller = RetryController::new(ScriptedProbe::new(Vec::new()));
        let initial = Duration::from_millis(500);

        assert_eq!(controller.backoff_delay(initial, 1), Duration::from_millis(500));
        assert_eq!(controller.backoff_delay(initial, 2), Duration::from_secs(1));
        assert_eq!(controller.backoff_delay(initial, 3), Duration::from_secs(2));
        assert_eq!(controller.backoff_delay(initial, 4), Duration::from_secs(4));
    }

    #[test]
    fn test_backoff_cap() {
        let controller = RetryController::new(ScriptedProbe::new(Vec::new()))
            .with_max_backoff(Some(Duration::from_secs(3)));
        let initial = Duration::from_secs(1);

        assert_eq!(controller.backoff_delay(initial, 2), Duration::from_secs(2));
        assert_eq!(controller.backoff_delay(initial, 3), Duration::from_secs(3));
        assert_eq!(controller.backoff_delay(initial, 40), Duration::from_secs(3));
        assert_eq!(controller.backoff_delay(Duration::MAX, 3), Duration::from_secs(3));
    }

    #[test]
    fn test_backoff_saturates_without_cap() {
        let controller = RetryController::new(ScriptedProbe::new(Vec::new()));
        assert_eq!(controller.backoff_delay(Duration::MAX, 5), Duration::MAX);
        assert_eq!(controller.backoff_delay(Duration::from_secs(u64::MAX / 2), 3), Duration::MAX);
    }

    #[test]
    fn test_jitter_stays_in_window() {
        let controller = RetryController::new(ScriptedProbe::new(Vec::new()));
        for _ in 0..1000 {
            assert!(controller.jitter() < DEFAULT_MAX_JITTER);
        }

        let controller = controller.with_max_jitter(Duration::ZERO);
        assert_eq!(controller.jitter(), Duration::ZERO);
    }
}
