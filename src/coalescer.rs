//! Change-notification debouncing
//!
//! Every `notify_changed` for an element restarts that element's quiet
//! window. When a window runs out, exactly one [`Trigger`] carrying the
//! most recent state is emitted.

use crate::config::CoalescerConfig;
use crate::model::ElementId;
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// "Render now" signal for one element
#[derive(Debug, Clone, PartialEq)]
pub struct Trigger<T> {
    pub element: ElementId,
    pub state: T,
}

/// Per-element debounce timers; owned by a single writer
pub struct RenderRequestCoalescer<T> {
    window: Duration,
    timers: HashMap<ElementId, JoinHandle<()>>,
    triggers: mpsc::UnboundedSender<Trigger<T>>,
}

impl<T: Send + 'static> RenderRequestCoalescer<T> {
    pub fn new(config: &CoalescerConfig) -> (Self, mpsc::UnboundedReceiver<Trigger<T>>) {
        Self::with_window(config.debounce())
    }

    pub fn with_window(window: Duration) -> (Self, mpsc::UnboundedReceiver<Trigger<T>>) {
        let (triggers, receiver) = mpsc::unbounded_channel();
        let coalescer = Self {
            window,
            timers: HashMap::new(),
            triggers,
        };
        (coalescer, receiver)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Restart the element's window with `state` as the value to emit
    pub fn notify_changed(&mut self, element: ElementId, state: T) {
        self.timers.retain(|_, timer| !timer.is_finished());

        if let Some(previous) = self.timers.remove(&element) {
            previous.abort();
        }

        // Deadline fixed now, not when the task first runs
        let expiry = tokio::time::sleep(self.window);
        let triggers = self.triggers.clone();
        let key = element.clone();
        let timer = tokio::spawn(async move {
            expiry.await;
            debug!("⏱️ Debounce window elapsed for '{}'", key);
            let _ = triggers.send(Trigger {
                element: key,
                state,
            });
        });

        self.timers.insert(element, timer);
    }

    /// Drop the element's window without emitting anything
    pub fn cancel(&mut self, element: &ElementId) -> bool {
        match self.timers.remove(element) {
            Some(timer) => {
                let running = !timer.is_finished();
                timer.abort();
                running
            }
            None => false,
        }
    }

    pub fn is_pending(&self, element: &ElementId) -> bool {
        self.timers
            .get(element)
            .map_or(false, |timer| !timer.is_finished())
    }
}

impl<T> Drop for RenderRequestCoalescer<T> {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_burst_collapses_to_one_trigger_with_last_state() {
        let (mut coalescer, mut triggers) =
            RenderRequestCoalescer::with_window(Duration::from_millis(500));
        let a = ElementId::from("A");
        let start = Instant::now();

        for size in 0..10u32 {
            coalescer.notify_changed(a.clone(), size);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let trigger = triggers.recv().await.unwrap();
        assert_eq!(trigger, Trigger { element: a, state: 9 });
        // last notification at 900 ms plus the window
        assert_eq!(start.elapsed(), Duration::from_millis(1400));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(triggers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_fires_before_window() {
        let (mut coalescer, mut triggers) =
            RenderRequestCoalescer::with_window(Duration::from_millis(500));
        coalescer.notify_changed(ElementId::from("A"), ());

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(triggers.try_recv().is_err());
        assert!(coalescer.is_pending(&ElementId::from("A")));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(triggers.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_elements_debounce_independently() {
        let (mut coalescer, mut triggers) =
            RenderRequestCoalescer::with_window(Duration::from_millis(500));
        coalescer.notify_changed(ElementId::from("A"), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        coalescer.notify_changed(ElementId::from("B"), 2);

        let first = triggers.recv().await.unwrap();
        let second = triggers.recv().await.unwrap();
        assert_eq!(first.element, ElementId::from("A"));
        assert_eq!(second.element, ElementId::from("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_suppresses_trigger() {
        let (mut coalescer, mut triggers) =
            RenderRequestCoalescer::with_window(Duration::from_millis(500));
        let a = ElementId::from("A");
        coalescer.notify_changed(a.clone(), "resize");

        assert!(coalescer.cancel(&a));
        assert!(!coalescer.cancel(&a));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(triggers.try_recv().is_err());
    }
}
