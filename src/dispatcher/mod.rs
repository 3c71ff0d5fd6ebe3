//! Render dispatch
//!
//! Keeps at most one job in flight per element. Requests arriving while
//! one is running are queued (latest wins), and results are handed to the
//! caller only when no newer request has been submitted since, so the
//! caller sees sequence ids in strictly increasing order.

mod state;

pub use state::{CompletionPlan, ElementRenderState, SubmitAction};

use crate::config::DispatcherConfig;
use crate::error::RenderError;
use crate::model::{ChartSpec, ElementId, RenderArtifact, RenderRequest, RenderResult, SequenceId};
use crate::telemetry::RequestTelemetry;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Something that turns a request into an artifact
pub trait RenderBackend: Send + Sync + 'static {
    fn render(
        &self,
        request: RenderRequest,
    ) -> impl Future<Output = Result<RenderArtifact, RenderError>> + Send;
}

/// Notifications sent to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    /// A job was handed to the backend
    Started {
        element: ElementId,
        sequence: SequenceId,
    },
    Delivered {
        element: ElementId,
        sequence: SequenceId,
        artifact: RenderArtifact,
    },
    Failed {
        element: ElementId,
        sequence: SequenceId,
        error: RenderError,
    },
}

impl RenderEvent {
    pub fn element(&self) -> &ElementId {
        match self {
            RenderEvent::Started { element, .. }
            | RenderEvent::Delivered { element, .. }
            | RenderEvent::Failed { element, .. } => element,
        }
    }

    pub fn sequence(&self) -> SequenceId {
        match self {
            RenderEvent::Started { sequence, .. }
            | RenderEvent::Delivered { sequence, .. }
            | RenderEvent::Failed { sequence, .. } => *sequence,
        }
    }

    /// Delivered or failed, as opposed to a progress notification
    pub fn is_outcome(&self) -> bool {
        !matches!(self, RenderEvent::Started { .. })
    }
}

/// Read-only view of one element's dispatch state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementStatus {
    pub last_issued: SequenceId,
    pub in_flight: Option<SequenceId>,
    pub pending: Option<SequenceId>,
    pub last_delivered: SequenceId,
}

struct DispatcherInner<B> {
    backend: B,
    settle_delay: Duration,
    elements: Mutex<HashMap<ElementId, ElementRenderState>>,
    events: mpsc::UnboundedSender<RenderEvent>,
    telemetry: Option<RequestTelemetry>,
}

/// Per-element render dispatcher
///
/// Spawns onto the ambient Tokio runtime, so `submit` must be called from
/// within one.
pub struct RenderDispatcher<B> {
    inner: Arc<DispatcherInner<B>>,
}

impl<B> Clone for RenderDispatcher<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: RenderBackend> RenderDispatcher<B> {
    pub fn new(
        backend: B,
        config: &DispatcherConfig,
    ) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        Self::build(backend, config, None)
    }

    /// Same as [`RenderDispatcher::new`], counting every submission
    pub fn with_telemetry(
        backend: B,
        config: &DispatcherConfig,
        telemetry: RequestTelemetry,
    ) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        Self::build(backend, config, Some(telemetry))
    }

    fn build(
        backend: B,
        config: &DispatcherConfig,
        telemetry: Option<RequestTelemetry>,
    ) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            inner: Arc::new(DispatcherInner {
                backend,
                settle_delay: config.settle_delay(),
                elements: Mutex::new(HashMap::new()),
                events,
                telemetry,
            }),
        };
        (dispatcher, receiver)
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Stamp and submit a render of `spec` for `element`; never blocks
    pub fn submit(&self, element: ElementId, spec: ChartSpec) -> SequenceId {
        if let Some(telemetry) = &self.inner.telemetry {
            telemetry.record_request(&element);
        }

        let (sequence, action) = {
            let mut elements = self.inner.elements.lock();
            elements.entry(element.clone()).or_default().submit(&element, spec)
        };

        match action {
            SubmitAction::Dispatch(request) => {
                debug!("📤 Dispatching {} for '{}'", sequence, element);
                Self::spawn_job(Arc::clone(&self.inner), request, None);
            }
            SubmitAction::Queued { superseded } => {
                match superseded {
                    Some(old) => debug!("Queued {} for '{}', replacing {}", sequence, element, old),
                    None => debug!("Queued {} for '{}' behind a running job", sequence, element),
                }
            }
        }
        sequence
    }

    /// Drop queued work for `element` and disown its running job
    ///
    /// The running job keeps the element's slot until the backend answers,
    /// so a request submitted in the meantime waits behind it and the late
    /// result is discarded. The element's entry is kept so sequence ids
    /// keep increasing if the same id comes back; each distinct id ever
    /// submitted costs one small entry for the dispatcher's lifetime.
    pub fn forget(&self, element: &ElementId) {
        if let Some(state) = self.inner.elements.lock().get_mut(element) {
            if let Some(sequence) = state.abandon() {
                debug!("Abandoning {} for '{}'", sequence, element);
            }
        }
    }

    pub fn status(&self, element: &ElementId) -> Option<ElementStatus> {
        self.inner.elements.lock().get(element).map(|state| ElementStatus {
            last_issued: state.last_issued(),
            in_flight: state.in_flight(),
            pending: state.pending(),
            last_delivered: state.last_delivered(),
        })
    }

    pub fn is_in_flight(&self, element: &ElementId) -> bool {
        self.status(element)
            .map_or(false, |status| status.in_flight.is_some())
    }

    fn spawn_job(inner: Arc<DispatcherInner<B>>, request: RenderRequest, delay: Option<Duration>) {
        tokio::spawn(async move {
            let element = request.element().clone();
            let sequence = request.sequence();

            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
                let (current, abandoned) = inner
                    .elements
                    .lock()
                    .get(&element)
                    .map_or((false, false), |state| {
                        (state.in_flight() == Some(sequence), state.is_abandoned())
                    });
                if !current {
                    debug!("Dropping queued {} for '{}', element was reset", sequence, element);
                    return;
                }
                if abandoned {
                    // Never reached the backend; settle the slot without rendering
                    let outcome = Err(RenderError::failed("abandoned before start"));
                    Self::finish(inner, element, RenderResult { sequence, outcome });
                    return;
                }
            }

            let _ = inner.events.send(RenderEvent::Started {
                element: element.clone(),
                sequence,
            });

            let outcome = inner.backend.render(request).await;
            Self::finish(inner, element, RenderResult { sequence, outcome });
        });
    }

    fn finish(
        inner: Arc<DispatcherInner<B>>,
        element: ElementId,
        result: RenderResult,
    ) {
        let RenderResult { sequence, outcome } = result;
        let plan = {
            let mut elements = inner.elements.lock();
            match elements.get_mut(&element) {
                Some(state) => state.complete(sequence),
                None => None,
            }
        };

        let Some(plan) = plan else {
            debug!("Ignoring result {} for '{}', not in flight", sequence, element);
            return;
        };

        if plan.deliver {
            let event = match outcome {
                Ok(artifact) => {
                    info!(
                        "🖼️ Chart {} for '{}' ready: {}",
                        sequence,
                        element,
                        artifact.path.display()
                    );
                    RenderEvent::Delivered {
                        element: element.clone(),
                        sequence,
                        artifact,
                    }
                }
                Err(error) => {
                    warn!("❌ Render {} for '{}' failed: {}", sequence, element, error);
                    RenderEvent::Failed {
                        element: element.clone(),
                        sequence,
                        error,
                    }
                }
            };
            if inner.events.send(event).is_err() {
                debug!("Render event receiver dropped");
            }
        } else {
            debug!("🗑️ Discarding superseded result {} for '{}'", sequence, element);
        }

        if let Some(next) = plan.next {
            debug!("📤 Dispatching queued {} for '{}'", next.sequence(), element);
            let delay = inner.settle_delay;
            Self::spawn_job(inner, next, Some(delay));
        }
    }
}

#[cfg(test)]
mod tests;
