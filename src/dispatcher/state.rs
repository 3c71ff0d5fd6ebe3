//! Per-element in-flight bookkeeping, kept free of I/O

use crate::model::{ChartSpec, ElementId, RenderRequest, SequenceId};

/// What `submit` decided for a freshly stamped request
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitAction {
    /// Nothing in flight, run this now
    Dispatch(RenderRequest),
    /// Something is in flight; the request waits, replacing `superseded`
    Queued { superseded: Option<SequenceId> },
}

/// What a completion means for the element
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionPlan {
    /// Hand the result to the caller; otherwise it is stale and dropped
    pub deliver: bool,
    /// Queued request to run after the settle delay, already marked in flight
    pub next: Option<RenderRequest>,
}

/// Render bookkeeping for one element
///
/// An abandoned job still occupies the in-flight slot until the backend
/// answers; its result is then dropped and any queued request runs.
#[derive(Debug, Clone, Default)]
pub struct ElementRenderState {
    last_issued: SequenceId,
    in_flight: Option<SequenceId>,
    abandoned: bool,
    pending: Option<RenderRequest>,
    last_delivered: SequenceId,
}

impl ElementRenderState {
    /// Stamp `spec` with the next sequence id and decide whether it runs now
    pub fn submit(&mut self, element: &ElementId, spec: ChartSpec) -> (SequenceId, SubmitAction) {
        self.last_issued = self.last_issued.next();
        let request = RenderRequest::new(element.clone(), self.last_issued, spec);

        if self.in_flight.is_some() {
            let superseded = self
                .pending
                .replace(request)
                .map(|previous| previous.sequence());
            return (self.last_issued, SubmitAction::Queued { superseded });
        }

        self.in_flight = Some(self.last_issued);
        (self.last_issued, SubmitAction::Dispatch(request))
    }

    /// Account for the result of `sequence`; `None` if it was not in flight
    pub fn complete(&mut self, sequence: SequenceId) -> Option<CompletionPlan> {
        if self.in_flight != Some(sequence) {
            return None;
        }

        // Latest wins: anything older than the newest submission is stale
        let deliver = !std::mem::take(&mut self.abandoned)
            && sequence > self.last_delivered
            && sequence == self.last_issued;
        if deliver {
            self.last_delivered = sequence;
        }

        let next = self.pending.take();
        self.in_flight = next.as_ref().map(RenderRequest::sequence);

        Some(CompletionPlan { deliver, next })
    }

    /// Drop queued work and disown the running job; numbering carries on
    ///
    /// Returns the running sequence, which keeps the slot until it completes.
    pub fn abandon(&mut self) -> Option<SequenceId> {
        self.pending = None;
        if self.in_flight.is_some() {
            self.abandoned = true;
        }
        self.in_flight
    }

    /// Whether the in-flight job's result will be thrown away
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn in_flight(&self) -> Option<SequenceId> {
        self.in_flight
    }

    pub fn pending(&self) -> Option<SequenceId> {
        self.pending.as_ref().map(RenderRequest::sequence)
    }

    pub fn last_issued(&self) -> SequenceId {
        self.last_issued
    }

    pub fn last_delivered(&self) -> SequenceId {
        self.last_delivered
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_none()
    }
}
