#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use monitor::{
    CheckOutcome, OverlapPolicy, Probe, ProbeError, ResultSink, RetryController, Target,
    TargetId, TargetRegistry, TargetScheduler, TargetSpec,
};
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// How the scripted probe answers every attempt
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Status(u16),
    Fail,
    /// Respond with the status after the given delay
    Hang(Duration, u16),
    Panic,
}

pub struct ScriptedProbe {
    step: Step,
    calls: Mutex<Vec<(TargetId, Instant)>>,
}

impl ScriptedProbe {
    pub fn new(step: Step) -> Arc<Self> {
        Arc::new(Self { step, calls: Mutex::new(Vec::new()) })
    }

    pub fn calls_for(&self, id: TargetId) -> usize {
        self.calls.lock().unwrap().iter().filter(|(target, _)| *target == id).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl Probe for ScriptedProbe {
    async fn execute(&self, target: &Target) -> Result<u16, ProbeError> {
        self.calls.lock().unwrap().push((target.id, Instant::now()));
        match self.step {
            Step::Status(code) => Ok(code),
            Step::Fail => Err(ProbeError::Transport("connection reset".into())),
            Step::Hang(delay, code) => {
                tokio::time::sleep(delay).await;
                Ok(code)
            }
            Step::Panic => panic!("scripted probe blew up"),
        }
    }
}

/// Sink whose storage is always unavailable
#[derive(Default)]
pub struct FailingSink {
    attempts: AtomicUsize,
}

impl FailingSink {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ResultSink for FailingSink {
    async fn record(&self, _outcome: &CheckOutcome) -> anyhow::Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(anyhow!("storage unavailable"))
    }

    async fn last_outcome(&self, _target_id: TargetId) -> anyhow::Result<Option<CheckOutcome>> {
        Err(anyhow!("storage unavailable"))
    }
}

pub fn target(name: &str, interval_s: u64) -> Target {
    let mut spec = TargetSpec::new(name, format!("http://{name}.test/"));
    spec.interval_s = interval_s;
    spec.retries = 0;
    spec.expected_statuses = BTreeSet::from([200]);
    Target::from_spec(spec)
}

pub fn scheduler(
    probe: Arc<ScriptedProbe>,
    registry: Arc<dyn TargetRegistry>,
    sink: Arc<dyn ResultSink>,
    overlap: OverlapPolicy,
) -> TargetScheduler {
    let controller = RetryController::new(probe).with_max_jitter(Duration::ZERO);
    TargetScheduler::new(Arc::new(controller), registry, sink).with_overlap_policy(overlap)
}
