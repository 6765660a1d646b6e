//! Tests for the supervisor loop using in-memory producers and consumers.

use async_trait::async_trait;
use paramjob::consumer::Consumer;
use paramjob::engine::{Supervisor, SupervisorConfig};
use paramjob::error::{Error, Result};
use paramjob::model::WorkUnit;
use paramjob::producer::Producer;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn fast() -> SupervisorConfig {
    SupervisorConfig {
        startup_backoff: Duration::from_millis(10),
        idle_interval: Duration::from_millis(10),
    }
}

fn unit(owner: &str) -> WorkUnit {
    WorkUnit::new(
        "jobs.run",
        None,
        json!({"meta": {"owner": owner}}).as_object().cloned().unwrap(),
    )
}

fn boxed(list: Vec<Scripted>) -> Vec<Box<dyn Producer>> {
    list.into_iter()
        .map(|p| Box::new(p) as Box<dyn Producer>)
        .collect()
}

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Hands out queued units; fails to start a set number of times.
struct Scripted {
    name: &'static str,
    queue: VecDeque<Result<Option<WorkUnit>>>,
    start_failures: usize,
    fatal: bool,
    starts: Arc<AtomicUsize>,
    reject: bool,
}

impl Scripted {
    fn new(name: &'static str, queue: Vec<Result<Option<WorkUnit>>>) -> Self {
        Self {
            name,
            queue: queue.into(),
            start_failures: 0,
            fatal: false,
            starts: Arc::new(AtomicUsize::new(0)),
            reject: false,
        }
    }
}

#[async_trait]
impl Producer for Scripted {
    fn name(&self) -> &str {
        self.name
    }

    async fn start(&mut self) -> Result<()> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fatal {
            return Err(Error::Config("no subject".to_string()));
        }
        if attempt < self.start_failures {
            return Err(Error::Connect("refused".to_string()));
        }
        Ok(())
    }

    async fn produce_work(&mut self) -> Result<Option<WorkUnit>> {
        self.queue.pop_front().unwrap_or(Ok(None))
    }

    async fn validate_work(&self, work: WorkUnit) -> Result<WorkUnit> {
        if self.reject {
            Err(Error::MissingMeta(vec!["foo".to_string()]))
        } else {
            Ok(work)
        }
    }
}

/// Records the owner of every unit it consumes.
#[derive(Default)]
struct Collector {
    owners: Mutex<Vec<String>>,
    starts: AtomicUsize,
}

#[async_trait]
impl Consumer for Collector {
    fn name(&self) -> &str {
        "collector"
    }

    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn consume_work(&self, work: WorkUnit) -> Result<()> {
        let owner = work.meta_str("owner").unwrap_or_default().to_string();
        self.owners.lock().unwrap().push(owner);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn startup_retries_whole_phase_until_success() {
    let mut producer = Scripted::new("flaky", Vec::new());
    producer.start_failures = 2;
    let starts = Arc::clone(&producer.starts);
    let collector = Arc::new(Collector::default());

    let mut supervisor = Supervisor::new(
        boxed(vec![producer]),
        vec![collector.clone() as Arc<dyn Consumer>],
        fast(),
    );
    supervisor.start().await.unwrap();

    assert_eq!(starts.load(Ordering::SeqCst), 3);
    // Consumers only start once producers are up.
    assert_eq!(collector.starts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn startup_restarts_earlier_producers_when_a_later_one_fails() {
    let first = Scripted::new("first", Vec::new());
    let first_starts = Arc::clone(&first.starts);
    let mut second = Scripted::new("second", Vec::new());
    second.start_failures = 1;

    let mut supervisor = Supervisor::new(boxed(vec![first, second]), Vec::new(), fast());
    supervisor.start().await.unwrap();

    assert_eq!(first_starts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn startup_stops_on_configuration_error() {
    let mut producer = Scripted::new("misconfigured", Vec::new());
    producer.fatal = true;
    let starts = Arc::clone(&producer.starts);

    let mut supervisor = Supervisor::new(boxed(vec![producer]), Vec::new(), fast());
    let err = supervisor.start().await.unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(starts.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Poll-dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn poll_dispatches_one_unit_per_cycle() {
    let producer = Scripted::new("queue", vec![Ok(Some(unit("a"))), Ok(Some(unit("b")))]);
    let collector = Arc::new(Collector::default());
    let mut supervisor = Supervisor::new(
        boxed(vec![producer]),
        vec![collector.clone() as Arc<dyn Consumer>],
        fast(),
    );

    assert!(supervisor.poll_once().await);
    assert_eq!(*collector.owners.lock().unwrap(), ["a"]);
    assert!(supervisor.poll_once().await);
    assert!(!supervisor.poll_once().await);
    assert_eq!(*collector.owners.lock().unwrap(), ["a", "b"]);
}

#[tokio::test]
async fn poll_asks_producers_in_registration_order() {
    let first = Scripted::new("first", vec![Ok(None), Ok(Some(unit("first-late")))]);
    let second = Scripted::new("second", vec![Ok(Some(unit("second")))]);
    let collector = Arc::new(Collector::default());
    let mut supervisor = Supervisor::new(
        boxed(vec![first, second]),
        vec![collector.clone() as Arc<dyn Consumer>],
        fast(),
    );

    assert!(supervisor.poll_once().await);
    assert!(supervisor.poll_once().await);
    assert_eq!(*collector.owners.lock().unwrap(), ["second", "first-late"]);
}

#[tokio::test]
async fn poll_skips_failing_and_rejected_producers() {
    let broken = Scripted::new("broken", vec![Err(Error::Subscribe("gone".to_string()))]);
    let mut rejecting = Scripted::new("rejecting", vec![Ok(Some(unit("bad")))]);
    rejecting.reject = true;
    let healthy = Scripted::new("healthy", vec![Ok(Some(unit("good")))]);
    let collector = Arc::new(Collector::default());
    let mut supervisor = Supervisor::new(
        boxed(vec![broken, rejecting, healthy]),
        vec![collector.clone() as Arc<dyn Consumer>],
        fast(),
    );

    assert!(supervisor.poll_once().await);
    assert_eq!(*collector.owners.lock().unwrap(), ["good"]);
}

#[tokio::test]
async fn rejected_unit_is_not_dispatched() {
    let mut producer = Scripted::new("rejecting", vec![Ok(Some(unit("bad")))]);
    producer.reject = true;
    let collector = Arc::new(Collector::default());
    let mut supervisor = Supervisor::new(
        boxed(vec![producer]),
        vec![collector.clone() as Arc<dyn Consumer>],
        fast(),
    );

    assert!(!supervisor.poll_once().await);
    assert!(collector.owners.lock().unwrap().is_empty());
}
