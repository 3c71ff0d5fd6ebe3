//! Unit tests for the render dispatcher
//!
//! A scripted backend hands every job to the test, which answers it
//! explicitly, so completion order is fully controlled.

use super::*;
use crate::error::FailureKind;
use crate::model::DataSeries;
use crate::telemetry::RequestTelemetry;
use crate::config::TelemetryConfig;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::oneshot;

type Reply = oneshot::Sender<Result<RenderArtifact, RenderError>>;

struct ScriptedBackend {
    jobs: mpsc::UnboundedSender<(RenderRequest, Reply)>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl RenderBackend for ScriptedBackend {
    fn render(
        &self,
        request: RenderRequest,
    ) -> impl Future<Output = Result<RenderArtifact, RenderError>> + Send {
        let jobs = self.jobs.clone();
        let active = Arc::clone(&self.active);
        let peak = Arc::clone(&self.peak);
        async move {
            let running = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(running, Ordering::SeqCst);

            let (reply, answer) = oneshot::channel();
            let result = match jobs.send((request, reply)) {
                Ok(()) => answer
                    .await
                    .unwrap_or_else(|_| Err(RenderError::failed("job dropped by test"))),
                Err(_) => Err(RenderError::failed("test harness gone")),
            };

            active.fetch_sub(1, Ordering::SeqCst);
            result
        }
    }
}

struct Harness {
    dispatcher: RenderDispatcher<ScriptedBackend>,
    events: mpsc::UnboundedReceiver<RenderEvent>,
    jobs: mpsc::UnboundedReceiver<(RenderRequest, Reply)>,
    peak: Arc<AtomicUsize>,
}

fn harness_with(telemetry: Option<RequestTelemetry>) -> Harness {
    let (jobs_tx, jobs) = mpsc::unbounded_channel();
    let peak = Arc::new(AtomicUsize::new(0));
    let backend = ScriptedBackend {
        jobs: jobs_tx,
        active: Arc::new(AtomicUsize::new(0)),
        peak: Arc::clone(&peak),
    };

    let config = DispatcherConfig::default();
    let (dispatcher, events) = match telemetry {
        Some(telemetry) => RenderDispatcher::with_telemetry(backend, &config, telemetry),
        None => RenderDispatcher::new(backend, &config),
    };

    Harness {
        dispatcher,
        events,
        jobs,
        peak,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

fn temperature_chart() -> ChartSpec {
    ChartSpec::default().with_series(DataSeries::new(
        "temp",
        vec![(0.0, 20.0), (1.0, 21.0), (2.0, 19.0)],
    ))
}

fn element_a() -> ElementId {
    ElementId::from("A")
}

#[tokio::test(start_paused = true)]
async fn test_single_request_is_delivered() {
    let mut h = harness();

    let sequence = h.dispatcher.submit(element_a(), temperature_chart());
    assert_eq!(sequence, SequenceId(1));
    assert!(h.dispatcher.is_in_flight(&element_a()));

    let (request, reply) = h.jobs.recv().await.unwrap();
    assert_eq!(request.sequence(), SequenceId(1));
    assert_eq!(request.spec().series["temp"].y(), &[20.0, 21.0, 19.0]);
    reply.send(Ok(RenderArtifact::new("/tmp/x.png"))).unwrap();

    assert_eq!(
        h.events.recv().await.unwrap(),
        RenderEvent::Started {
            element: element_a(),
            sequence: SequenceId(1)
        }
    );
    assert_eq!(
        h.events.recv().await.unwrap(),
        RenderEvent::Delivered {
            element: element_a(),
            sequence: SequenceId(1),
            artifact: RenderArtifact::new("/tmp/x.png"),
        }
    );

    let status = h.dispatcher.status(&element_a()).unwrap();
    assert_eq!(status.in_flight, None);
    assert_eq!(status.last_delivered, SequenceId(1));
}

#[tokio::test(start_paused = true)]
async fn test_burst_runs_first_and_latest_only() {
    let mut h = harness();

    for _ in 0..3 {
        h.dispatcher.submit(element_a(), temperature_chart());
    }

    let (first, reply) = h.jobs.recv().await.unwrap();
    assert_eq!(first.sequence(), SequenceId(1));
    tokio::task::yield_now().await;
    assert!(h.jobs.try_recv().is_err(), "second job started while busy");

    let status = h.dispatcher.status(&element_a()).unwrap();
    assert_eq!(status.pending, Some(SequenceId(3)));

    reply.send(Ok(RenderArtifact::new("/tmp/1.png"))).unwrap();

    // Sequence 2 was replaced while queued and never runs
    let (latest, reply) = h.jobs.recv().await.unwrap();
    assert_eq!(latest.sequence(), SequenceId(3));
    reply.send(Ok(RenderArtifact::new("/tmp/3.png"))).unwrap();

    let mut outcomes = Vec::new();
    while outcomes.is_empty() {
        let event = h.events.recv().await.unwrap();
        if event.is_outcome() {
            outcomes.push(event);
        }
    }
    assert_eq!(
        outcomes,
        vec![RenderEvent::Delivered {
            element: element_a(),
            sequence: SequenceId(3),
            artifact: RenderArtifact::new("/tmp/3.png"),
        }]
    );
    assert_eq!(h.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_clears_in_flight_state() {
    let mut h = harness();

    h.dispatcher.submit(element_a(), temperature_chart());
    let (_, reply) = h.jobs.recv().await.unwrap();
    reply
        .send(Err(RenderError::RenderTimeout { timeout_ms: 8000 }))
        .unwrap();

    let failure = loop {
        let event = h.events.recv().await.unwrap();
        if event.is_outcome() {
            break event;
        }
    };
    match failure {
        RenderEvent::Failed {
            sequence, error, ..
        } => {
            assert_eq!(sequence, SequenceId(1));
            assert_eq!(error.kind(), FailureKind::RenderTimeout);
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert!(!h.dispatcher.is_in_flight(&element_a()));

    let sequence = h.dispatcher.submit(element_a(), temperature_chart());
    let (request, reply) = h.jobs.recv().await.unwrap();
    assert_eq!(request.sequence(), sequence);
    reply.send(Ok(RenderArtifact::new("/tmp/ok.png"))).unwrap();

    let delivered = loop {
        let event = h.events.recv().await.unwrap();
        if event.is_outcome() {
            break event;
        }
    };
    assert!(matches!(delivered, RenderEvent::Delivered { sequence, .. } if sequence == SequenceId(2)));
}

#[tokio::test(start_paused = true)]
async fn test_elements_do_not_block_each_other() {
    let mut h = harness();

    h.dispatcher.submit(ElementId::from("A"), temperature_chart());
    h.dispatcher.submit(ElementId::from("B"), temperature_chart());

    let (first, _reply_a) = h.jobs.recv().await.unwrap();
    let (second, _reply_b) = h.jobs.recv().await.unwrap();
    let mut elements = vec![first.element().clone(), second.element().clone()];
    elements.sort();
    assert_eq!(elements, vec![ElementId::from("A"), ElementId::from("B")]);
    assert_eq!(first.sequence(), SequenceId(1));
    assert_eq!(second.sequence(), SequenceId(1));
}

#[tokio::test(start_paused = true)]
async fn test_forgotten_element_discards_late_result() {
    let mut h = harness();

    h.dispatcher.submit(element_a(), temperature_chart());
    let (_, reply) = h.jobs.recv().await.unwrap();
    h.dispatcher.forget(&element_a());
    reply.send(Ok(RenderArtifact::new("/tmp/late.png"))).unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    while let Ok(event) = h.events.try_recv() {
        assert!(!event.is_outcome(), "late result delivered: {:?}", event);
    }
    assert!(!h.dispatcher.is_in_flight(&element_a()));
}

#[tokio::test(start_paused = true)]
async fn test_resubmit_after_forget_waits_for_running_job() {
    let mut h = harness();

    h.dispatcher.submit(element_a(), temperature_chart());
    let (old, reply) = h.jobs.recv().await.unwrap();
    h.dispatcher.forget(&element_a());

    let sequence = h.dispatcher.submit(element_a(), temperature_chart());
    assert_eq!(sequence, SequenceId(2));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.jobs.try_recv().is_err(), "new job started beside the old one");
    assert_eq!(h.dispatcher.status(&element_a()).unwrap().pending, Some(SequenceId(2)));

    reply.send(Ok(RenderArtifact::new("/tmp/old.png"))).unwrap();

    let (new, reply) = h.jobs.recv().await.unwrap();
    assert_eq!(old.sequence(), SequenceId(1));
    assert_eq!(new.sequence(), SequenceId(2));
    reply.send(Ok(RenderArtifact::new("/tmp/new.png"))).unwrap();

    let outcome = loop {
        let event = h.events.recv().await.unwrap();
        if event.is_outcome() {
            break event;
        }
    };
    assert_eq!(
        outcome,
        RenderEvent::Delivered {
            element: element_a(),
            sequence: SequenceId(2),
            artifact: RenderArtifact::new("/tmp/new.png"),
        }
    );
    assert_eq!(h.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_forget_during_settle_delay_skips_queued_job() {
    let mut h = harness();

    h.dispatcher.submit(element_a(), temperature_chart());
    h.dispatcher.submit(element_a(), temperature_chart());
    let (_, reply) = h.jobs.recv().await.unwrap();
    reply.send(Ok(RenderArtifact::new("/tmp/1.png"))).unwrap();

    // Sequence 2 is now waiting out the settle delay
    for _ in 0..10 {
        if h.dispatcher.status(&element_a()).unwrap().in_flight == Some(SequenceId(2)) {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(h.dispatcher.status(&element_a()).unwrap().in_flight, Some(SequenceId(2)));
    h.dispatcher.forget(&element_a());

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.jobs.try_recv().is_err(), "abandoned job reached the backend");
    assert!(!h.dispatcher.is_in_flight(&element_a()));
}

#[tokio::test(start_paused = true)]
async fn test_submissions_are_counted() {
    let telemetry = RequestTelemetry::new(&TelemetryConfig::default());
    let h = harness_with(Some(telemetry.clone()));

    h.dispatcher.submit(element_a(), temperature_chart());
    h.dispatcher.submit(element_a(), temperature_chart());
    h.dispatcher.submit(ElementId::from("B"), temperature_chart());

    assert_eq!(telemetry.element_count(&element_a()), 2);
    assert_eq!(telemetry.global_count(), 3);
}
