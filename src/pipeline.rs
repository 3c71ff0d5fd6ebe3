//! The assembled render pipeline
//!
//! Element changes are debounced per element, submitted to the dispatcher
//! once they settle, and rendered by the shared worker. Outcomes come back
//! on the event receiver returned by [`RenderPipeline::new`].

use crate::coalescer::{RenderRequestCoalescer, Trigger};
use crate::config::PipelineConfig;
use crate::dispatcher::{RenderDispatcher, RenderEvent};
use crate::element::ChartElement;
use crate::error::RenderError;
use crate::model::{ChartSpec, ElementId, SequenceId};
use crate::telemetry::RequestTelemetry;
use crate::worker::WorkerProcessManager;
use log::{debug, info};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct RenderPipeline {
    worker: WorkerProcessManager,
    dispatcher: RenderDispatcher<WorkerProcessManager>,
    telemetry: RequestTelemetry,
    coalescer: RenderRequestCoalescer<ChartSpec>,
    elements: HashMap<ElementId, ChartElement>,
    forwarder: JoinHandle<()>,
}

impl RenderPipeline {
    /// Build the pipeline; must run inside a Tokio runtime
    pub fn new(config: &PipelineConfig) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let worker = WorkerProcessManager::new(config.worker.clone());
        Self::with_worker(config, worker)
    }

    pub fn with_worker(
        config: &PipelineConfig,
        worker: WorkerProcessManager,
    ) -> (Self, mpsc::UnboundedReceiver<RenderEvent>) {
        let telemetry = RequestTelemetry::new(&config.telemetry);
        let (dispatcher, events) =
            RenderDispatcher::with_telemetry(worker.clone(), &config.dispatcher, telemetry.clone());
        let (coalescer, mut triggers) = RenderRequestCoalescer::new(&config.coalescer);

        let submitter = dispatcher.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(Trigger { element, state }) = triggers.recv().await {
                submitter.submit(element, state);
            }
        });

        let pipeline = Self {
            worker,
            dispatcher,
            telemetry,
            coalescer,
            elements: HashMap::new(),
            forwarder,
        };
        (pipeline, events)
    }

    pub fn worker(&self) -> &WorkerProcessManager {
        &self.worker
    }

    pub fn dispatcher(&self) -> &RenderDispatcher<WorkerProcessManager> {
        &self.dispatcher
    }

    pub fn telemetry(&self) -> &RequestTelemetry {
        &self.telemetry
    }

    pub fn element(&self, id: &ElementId) -> Option<&ChartElement> {
        self.elements.get(id)
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    /// Register an element, acquiring the worker for it
    ///
    /// Re-adding a known id replaces its state without a second acquire.
    pub async fn add_element(&mut self, element: ChartElement) -> Result<(), RenderError> {
        let id = element.id().clone();
        if !self.elements.contains_key(&id) {
            self.worker.acquire().await?;
            info!("➕ Chart element '{}' added", id);
        }

        let spec = element.snapshot();
        self.elements.insert(id.clone(), element);
        self.schedule(id, spec);
        Ok(())
    }

    /// Mutate an element and schedule a debounced render; `false` if unknown
    pub fn update<F>(&mut self, id: &ElementId, change: F) -> bool
    where
        F: FnOnce(&mut ChartElement),
    {
        let Some(element) = self.elements.get_mut(id) else {
            return false;
        };

        let before = element.revision();
        change(element);
        if element.revision() != before {
            let spec = element.snapshot();
            self.schedule(id.clone(), spec);
        }
        true
    }

    /// Submit the element's current state right away, skipping the debounce
    pub fn render_now(&mut self, id: &ElementId) -> Option<SequenceId> {
        let spec = self.elements.get(id)?.snapshot()?;
        self.coalescer.cancel(id);
        Some(self.dispatcher.submit(id.clone(), spec))
    }

    /// Unregister an element and release its hold on the worker
    pub async fn remove_element(&mut self, id: &ElementId) -> bool {
        if self.elements.remove(id).is_none() {
            return false;
        }

        self.coalescer.cancel(id);
        self.dispatcher.forget(id);
        self.telemetry.forget(id);
        self.worker.release().await;
        info!("➖ Chart element '{}' removed", id);
        true
    }

    /// Remove every element and stop the worker
    pub async fn shutdown(&mut self) {
        let ids: Vec<ElementId> = self.elements.keys().cloned().collect();
        for id in &ids {
            self.remove_element(id).await;
        }
        self.forwarder.abort();
        self.worker.shutdown().await;
        info!("👋 Render pipeline stopped");
    }

    fn schedule(&mut self, id: ElementId, spec: Option<ChartSpec>) {
        match spec {
            Some(spec) => self.coalescer.notify_changed(id, spec),
            None => {
                debug!("Nothing visible on '{}', not rendering", id);
                self.coalescer.cancel(&id);
            }
        }
    }
}
