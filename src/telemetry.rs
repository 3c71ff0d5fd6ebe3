//! Request storm observation
//!
//! Counts render requests per element and globally. The global counter and
//! its clock start on the first request after a reset and are reset once
//! the observation window has elapsed. Nothing here throttles; callers
//! decide what to do with [`RequestTelemetry::global_request_rate`].

use crate::config::TelemetryConfig;
use crate::model::ElementId;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct TelemetryState {
    per_element: HashMap<ElementId, u64>,
    global_count: u64,
    window_start: Option<Instant>,
}

/// Read-only copy of the counters
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub global_count: u64,
    pub global_elapsed: Duration,
    pub per_element: BTreeMap<ElementId, u64>,
}

/// Shared request counters; clones observe the same state
#[derive(Debug, Clone)]
pub struct RequestTelemetry {
    state: Arc<Mutex<TelemetryState>>,
    window: Duration,
}

impl RequestTelemetry {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(TelemetryState::default())),
            window: config.observation_window(),
        }
    }

    /// Count one request for `element`; returns the global count
    pub fn record_request(&self, element: &ElementId) -> u64 {
        let now = Instant::now();
        let mut state = self.state.lock();

        match state.window_start {
            Some(start) if now.duration_since(start) >= self.window => {
                info!(
                    "📊 {} render requests in the last {:?}, resetting counters",
                    state.global_count, self.window
                );
                state.global_count = 0;
                state.window_start = Some(now);
            }
            Some(_) => {}
            None => state.window_start = Some(now),
        }

        state.global_count += 1;
        let element_count = {
            let count = state.per_element.entry(element.clone()).or_insert(0);
            *count += 1;
            *count
        };
        debug!(
            "Render request for '{}' (element: {}, global: {})",
            element, element_count, state.global_count
        );
        state.global_count
    }

    pub fn element_count(&self, element: &ElementId) -> u64 {
        self.state
            .lock()
            .per_element
            .get(element)
            .copied()
            .unwrap_or(0)
    }

    pub fn global_count(&self) -> u64 {
        self.state.lock().global_count
    }

    /// Time since the current observation window started
    pub fn global_elapsed(&self) -> Duration {
        self.state
            .lock()
            .window_start
            .map_or(Duration::ZERO, |start| start.elapsed())
    }

    /// Requests per second in the current window, elapsed time floored at one second
    pub fn global_request_rate(&self) -> f64 {
        let state = self.state.lock();
        let elapsed = state
            .window_start
            .map_or(Duration::ZERO, |start| start.elapsed());
        state.global_count as f64 / elapsed.as_secs_f64().max(1.0)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let state = self.state.lock();
        TelemetrySnapshot {
            global_count: state.global_count,
            global_elapsed: state
                .window_start
                .map_or(Duration::ZERO, |start| start.elapsed()),
            per_element: state
                .per_element
                .iter()
                .map(|(element, count)| (element.clone(), *count))
                .collect(),
        }
    }

    /// Stop tracking an element that went away
    pub fn forget(&self, element: &ElementId) {
        self.state.lock().per_element.remove(element);
    }

    pub fn reset(&self) {
        *self.state.lock() = TelemetryState::default();
    }
}
