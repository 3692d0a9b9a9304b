//! Last-write-wins hand-off between processing and delivery.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::mapping::{DemoDisplay, Dispatch, FixtureBridge};
use crate::Result;

/// Single-slot mailbox. Publishing replaces any value not yet taken.
#[derive(Debug)]
pub struct LatestValue<T> {
    state: Mutex<Slot<T>>,
    ready: Condvar,
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    superseded: u64,
    closed: bool,
}

impl<T> Default for LatestValue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestValue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(Slot {
                value: None,
                superseded: 0,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Stores `value`, dropping whatever was still pending.
    pub fn publish(&self, value: T) {
        let mut slot = self.state.lock();
        if slot.value.replace(value).is_some() {
            slot.superseded += 1;
        }
        drop(slot);
        self.ready.notify_one();
    }

    /// Takes the pending value without waiting.
    pub fn take(&self) -> Option<T> {
        self.state.lock().value.take()
    }

    /// Waits for a value. Returns `None` once the slot is closed and drained.
    pub fn wait(&self) -> Option<T> {
        let mut slot = self.state.lock();
        loop {
            if let Some(value) = slot.value.take() {
                return Some(value);
            }
            if slot.closed {
                return None;
            }
            self.ready.wait(&mut slot);
        }
    }

    /// Number of values that were replaced before anyone took them.
    pub fn superseded(&self) -> u64 {
        self.state.lock().superseded
    }

    /// Wakes all waiters; a pending value can still be taken.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn reopen(&self) {
        self.state.lock().closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

/// Applies dispatches to the bridge or the demo display on its own thread.
pub struct DeliveryWorker {
    handle: JoinHandle<()>,
}

impl DeliveryWorker {
    /// Runs until `dispatches` is closed.
    pub fn spawn(
        dispatches: Arc<LatestValue<Dispatch>>,
        bridge: Option<Arc<dyn FixtureBridge>>,
        display: Option<Box<dyn DemoDisplay>>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("bulbdj-delivery".into())
            .spawn(move || delivery_loop(&dispatches, bridge, display))?;
        Ok(Self { handle })
    }

    pub fn join(self) {
        let _ = self.handle.join();
    }
}

fn delivery_loop(
    dispatches: &LatestValue<Dispatch>,
    bridge: Option<Arc<dyn FixtureBridge>>,
    mut display: Option<Box<dyn DemoDisplay>>,
) {
    while let Some(dispatch) = dispatches.wait() {
        let display = display
            .as_mut()
            .map(|display| &mut **display as &mut dyn DemoDisplay);
        deliver(dispatch, bridge.as_deref(), display);
    }
    tracing::debug!(
        superseded = dispatches.superseded(),
        "delivery worker finished"
    );
}

/// Delivers one dispatch. Failures are logged; the next frame supersedes them.
pub fn deliver(
    dispatch: Dispatch,
    bridge: Option<&dyn FixtureBridge>,
    display: Option<&mut dyn DemoDisplay>,
) {
    match dispatch {
        Dispatch::Simulated(color) => {
            if let Some(display) = display {
                display.show(color);
            }
        }
        Dispatch::Fixtures(batch) => {
            let Some(bridge) = bridge else {
                tracing::trace!("no bridge for fixture batch");
                return;
            };
            if let Err(err) = bridge.apply(&batch) {
                tracing::warn!(error = %err, fixtures = batch.len(), "fixture batch dropped");
            }
        }
        Dispatch::Stopped(_) => {
            if let Some(display) = display {
                display.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{FixtureCommand, FixtureState};
    use crate::{BulbError, RenderedColor};

    #[derive(Default, Clone)]
    struct RecordingDisplay {
        shown: Arc<Mutex<Vec<RenderedColor>>>,
        stopped: Arc<Mutex<usize>>,
    }

    impl DemoDisplay for RecordingDisplay {
        fn show(&mut self, color: RenderedColor) {
            self.shown.lock().push(color);
        }

        fn stop(&mut self) {
            *self.stopped.lock() += 1;
        }
    }

    struct FlakyBridge {
        applied: Mutex<Vec<Vec<FixtureCommand>>>,
        fail: bool,
    }

    impl FixtureBridge for FlakyBridge {
        fn is_connected(&self) -> bool {
            true
        }

        fn fixtures(&self) -> Vec<FixtureState> {
            Vec::new()
        }

        fn apply(&self, batch: &[FixtureCommand]) -> Result<()> {
            if self.fail {
                return Err(BulbError::DeliveryFailure("bridge timed out".into()));
            }
            self.applied.lock().push(batch.to_vec());
            Ok(())
        }
    }

    #[test]
    fn publish_supersedes_pending_value() {
        let slot = LatestValue::new();
        slot.publish(1);
        slot.publish(2);
        slot.publish(3);

        assert_eq!(slot.take(), Some(3));
        assert_eq!(slot.take(), None);
        assert_eq!(slot.superseded(), 2);
    }

    #[test]
    fn close_wakes_waiters_after_draining() {
        let slot = Arc::new(LatestValue::new());
        slot.publish("last");
        slot.close();

        assert_eq!(slot.wait(), Some("last"));
        assert_eq!(slot.wait(), None);
    }

    #[test]
    fn worker_routes_simulated_frames_and_stop_to_display() {
        let display = RecordingDisplay::default();
        let shown = display.shown.clone();
        let stopped = display.stopped.clone();
        let slot = Arc::new(LatestValue::new());

        let worker = DeliveryWorker::spawn(slot.clone(), None, Some(Box::new(display))).unwrap();
        slot.publish(Dispatch::Simulated(RenderedColor::OFF));
        while shown.lock().is_empty() {
            thread::yield_now();
        }
        slot.publish(Dispatch::Stopped(RenderedColor::OFF));
        slot.close();
        worker.join();

        assert_eq!(shown.lock().len(), 1);
        assert_eq!(*stopped.lock(), 1);
    }

    #[test]
    fn delivery_failure_is_swallowed() {
        let bridge = FlakyBridge {
            applied: Mutex::new(Vec::new()),
            fail: true,
        };
        let batch = vec![FixtureCommand {
            fixture: 0,
            hue: 1,
            brightness: 2,
        }];

        deliver(Dispatch::Fixtures(batch.clone()), Some(&bridge), None);
        assert!(bridge.applied.lock().is_empty());

        let bridge = FlakyBridge {
            applied: Mutex::new(Vec::new()),
            fail: false,
        };
        deliver(Dispatch::Fixtures(batch.clone()), Some(&bridge), None);
        assert_eq!(bridge.applied.lock().as_slice(), &[batch]);
    }
}
