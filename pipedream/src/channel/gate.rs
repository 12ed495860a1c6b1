//! Fan-in gate: a bounded channel plus a count of producers not yet finished.

use super::GateMetrics;
use crate::channel::GateMetricsSnapshot;
use crate::context::RunContext;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};

/// Largest capacity a bounded gate can hold.
///
/// Bounded gates sit on a tokio channel, whose permit count is limited to
/// [`Semaphore::MAX_PERMITS`](tokio::sync::Semaphore::MAX_PERMITS).
pub const MAX_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// What travels through a gate's channel. `Done` is the completion marker.
#[derive(Debug)]
pub(crate) enum Envelope<T> {
    Item(T),
    Done,
}

/// Result of a non-blocking read from a gate.
#[derive(Debug, PartialEq, Eq)]
pub enum GateRead<T> {
    /// The next item.
    Item(T),
    /// Nothing available right now; try again later.
    Continue,
    /// Every producer has finished and the channel is drained.
    Done,
}

/// Returned by `put`/`close` when the run stopped while the caller waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pipeline halted")]
pub struct Halted;

enum GateSender<T> {
    Bounded(mpsc::Sender<Envelope<T>>),
    Unbounded(mpsc::UnboundedSender<Envelope<T>>),
}

enum SendAttempt<T> {
    Sent,
    Full(Envelope<T>),
    Closed,
}

impl<T> GateSender<T> {
    fn try_send(&self, envelope: Envelope<T>) -> SendAttempt<T> {
        match self {
            Self::Bounded(tx) => match tx.try_send(envelope) {
                Ok(()) => SendAttempt::Sent,
                Err(TrySendError::Full(envelope)) => SendAttempt::Full(envelope),
                Err(TrySendError::Closed(_)) => SendAttempt::Closed,
            },
            Self::Unbounded(tx) => match tx.send(envelope) {
                Ok(()) => SendAttempt::Sent,
                Err(_) => SendAttempt::Closed,
            },
        }
    }
}

enum GateReceiver<T> {
    Bounded(mpsc::Receiver<Envelope<T>>),
    Unbounded(mpsc::UnboundedReceiver<Envelope<T>>),
}

impl<T> GateReceiver<T> {
    fn try_recv(&mut self) -> Result<Envelope<T>, TryRecvError> {
        match self {
            Self::Bounded(rx) => rx.try_recv(),
            Self::Unbounded(rx) => rx.try_recv(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Bounded(rx) => rx.is_empty(),
            Self::Unbounded(rx) => rx.is_empty(),
        }
    }
}

/// Receiver and producer count, guarded together so a reader that absorbs
/// the last marker also sees the drained channel.
struct GateState<T> {
    receiver: GateReceiver<T>,
    remaining: usize,
}

impl<T> GateState<T> {
    fn is_exhausted(&self) -> bool {
        self.remaining == 0 && self.receiver.is_empty()
    }
}

/// The consumer side of a stage: one channel fed by every producer worker
/// of every upstream stage.
///
/// The gate is exhausted once `remaining` (producers that have not sent
/// their completion marker yet) reaches zero and the channel is empty.
/// Completion markers are absorbed by [`try_get`](Self::try_get); readers
/// only ever observe items, `Continue` and the final `Done`.
pub struct FanInGate<T> {
    label: String,
    capacity: usize,
    required_producers: usize,
    sender: GateSender<T>,
    state: Mutex<GateState<T>>,
    metrics: GateMetrics,
    ctx: Arc<RunContext>,
}

impl<T: Send + 'static> FanInGate<T> {
    /// Creates a gate.
    ///
    /// `capacity == 0` means unbounded; capacities above [`MAX_CAPACITY`] are
    /// clamped to it. `required_producers` is the number of completion
    /// markers the gate waits for.
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        capacity: usize,
        required_producers: usize,
        ctx: Arc<RunContext>,
    ) -> Self {
        let capacity = capacity.min(MAX_CAPACITY);
        let (sender, receiver) = if capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (GateSender::Unbounded(tx), GateReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(capacity);
            (GateSender::Bounded(tx), GateReceiver::Bounded(rx))
        };

        Self {
            label: label.into(),
            capacity,
            required_producers,
            sender,
            state: Mutex::new(GateState {
                receiver,
                remaining: required_producers,
            }),
            metrics: GateMetrics::default(),
            ctx,
        }
    }

    /// Enqueues an item, waiting while the gate is full.
    ///
    /// # Errors
    ///
    /// Returns [`Halted`] if the run was cancelled or faulted before the item
    /// could be enqueued.
    pub fn put(&self, item: T) -> Result<(), Halted> {
        self.send(Envelope::Item(item))?;
        self.metrics.record_put();
        Ok(())
    }

    /// Enqueues one completion marker. Each producer worker calls this once.
    ///
    /// # Errors
    ///
    /// Returns [`Halted`] if the run stopped while waiting for capacity.
    pub fn close(&self) -> Result<(), Halted> {
        self.send(Envelope::Done)
    }

    fn send(&self, envelope: Envelope<T>) -> Result<(), Halted> {
        if self.ctx.should_halt() {
            return Err(Halted);
        }

        let mut pending = envelope;
        let mut blocked_since: Option<Instant> = None;
        loop {
            match self.sender.try_send(pending) {
                SendAttempt::Sent => {
                    if let Some(since) = blocked_since {
                        self.metrics.record_blocked(since.elapsed());
                    }
                    return Ok(());
                }
                SendAttempt::Full(envelope) => {
                    if self.ctx.should_halt() {
                        return Err(Halted);
                    }
                    blocked_since.get_or_insert_with(Instant::now);
                    pending = envelope;
                    thread::sleep(self.ctx.config().put_retry_interval());
                }
                SendAttempt::Closed => return Err(Halted),
            }
        }
    }

    /// Non-blocking read.
    ///
    /// A completion marker decrements `remaining` under the gate lock and is
    /// reported as `Continue` (or `Done` if it was the last one and the
    /// channel is drained).
    pub fn try_get(&self) -> GateRead<T> {
        let mut state = self.state.lock();
        match state.receiver.try_recv() {
            Ok(Envelope::Item(item)) => GateRead::Item(item),
            Ok(Envelope::Done) => {
                state.remaining = state.remaining.saturating_sub(1);
                self.metrics.record_marker();
                if state.is_exhausted() {
                    GateRead::Done
                } else {
                    GateRead::Continue
                }
            }
            Err(TryRecvError::Empty) => {
                if state.remaining == 0 {
                    GateRead::Done
                } else {
                    GateRead::Continue
                }
            }
            Err(TryRecvError::Disconnected) => GateRead::Done,
        }
    }
}

impl<T> FanInGate<T> {
    /// Returns true once every producer finished and the channel is drained.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.state.lock().is_exhausted()
    }

    /// Producers that have not delivered their completion marker yet.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.state.lock().remaining
    }

    /// Number of completion markers this gate waits for.
    #[must_use]
    pub fn required_producers(&self) -> usize {
        self.required_producers
    }

    /// Channel capacity (0 = unbounded).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Name of the consuming stage.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the gate's counters.
    #[must_use]
    pub fn metrics(&self) -> &GateMetrics {
        &self.metrics
    }
}

impl<T> std::fmt::Debug for FanInGate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanInGate")
            .field("label", &self.label)
            .field("capacity", &self.capacity)
            .field("required_producers", &self.required_producers)
            .finish_non_exhaustive()
    }
}

/// Type-independent control surface of a gate, used by the driver.
pub(crate) trait GateControl: Send + Sync {
    /// Pushes a completion marker without waiting; dropped if the gate is full.
    fn force_close(&self);
    fn label(&self) -> &str;
    fn metrics_snapshot(&self) -> GateMetricsSnapshot;
}

impl<T: Send + 'static> GateControl for FanInGate<T> {
    fn force_close(&self) {
        let _ = self.sender.try_send(Envelope::Done);
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn metrics_snapshot(&self) -> GateMetricsSnapshot {
        self.metrics.snapshot()
    }
}

/// A gate with its item type erased, as stored in the wired graph.
#[derive(Clone)]
pub(crate) struct GateHandle {
    typed: Arc<dyn Any + Send + Sync>,
    control: Arc<dyn GateControl>,
}

impl GateHandle {
    pub(crate) fn new<T: Send + 'static>(gate: Arc<FanInGate<T>>) -> Self {
        Self {
            typed: gate.clone(),
            control: gate,
        }
    }

    /// Recovers the typed gate; `None` if `T` is not the gate's item type.
    pub(crate) fn downcast<T: Send + 'static>(&self) -> Option<Arc<FanInGate<T>>> {
        self.typed.clone().downcast::<FanInGate<T>>().ok()
    }

    pub(crate) fn control(&self) -> &dyn GateControl {
        self.control.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::events::NoOpEventSink;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn ctx() -> Arc<RunContext> {
        Arc::new(RunContext::new(PipelineConfig::default(), Arc::new(NoOpEventSink)))
    }

    #[test]
    fn test_items_then_done() {
        let gate = FanInGate::new("consumer", 0, 1, ctx());
        gate.put(1).unwrap();
        gate.put(2).unwrap();
        gate.close().unwrap();

        assert_eq!(gate.try_get(), GateRead::Item(1));
        assert_eq!(gate.try_get(), GateRead::Item(2));
        assert_eq!(gate.try_get(), GateRead::Done);
        assert_eq!(gate.try_get(), GateRead::Done);
        assert!(gate.is_exhausted());
    }

    #[test]
    fn test_marker_is_absorbed_until_last_producer() {
        let gate = FanInGate::new("consumer", 0, 2, ctx());
        gate.put("a").unwrap();
        gate.close().unwrap();
        gate.put("b").unwrap();
        gate.close().unwrap();

        assert_eq!(gate.try_get(), GateRead::Item("a"));
        assert_eq!(gate.try_get(), GateRead::Continue);
        assert_eq!(gate.remaining(), 1);
        assert!(!gate.is_exhausted());
        assert_eq!(gate.try_get(), GateRead::Item("b"));
        assert_eq!(gate.try_get(), GateRead::Done);
        assert_eq!(gate.remaining(), 0);
        assert_eq!(gate.metrics().snapshot().markers_received, 2);
    }

    #[test]
    fn test_empty_gate_with_live_producers_continues() {
        let gate: FanInGate<u8> = FanInGate::new("consumer", 4, 3, ctx());
        assert_eq!(gate.try_get(), GateRead::Continue);
        assert_eq!(gate.required_producers(), 3);
        assert_eq!(gate.capacity(), 4);
    }

    #[test]
    fn test_full_gate_blocks_put_until_drained() {
        let gate = Arc::new(FanInGate::new("slow", 1, 1, ctx()));
        gate.put(1).unwrap();

        let producer = {
            let gate = gate.clone();
            thread::spawn(move || gate.put(2))
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!producer.is_finished());

        assert_eq!(gate.try_get(), GateRead::Item(1));
        assert_eq!(producer.join().unwrap(), Ok(()));
        assert_eq!(gate.try_get(), GateRead::Item(2));

        let metrics = gate.metrics().snapshot();
        assert_eq!(metrics.blocked_puts, 1);
        assert!(metrics.blocked_ms >= 40.0);
    }

    #[test]
    fn test_cancel_releases_blocked_put() {
        let ctx = ctx();
        let gate = Arc::new(FanInGate::new("stuck", 1, 1, ctx.clone()));
        gate.put(1).unwrap();

        let producer = {
            let gate = gate.clone();
            thread::spawn(move || gate.put(2))
        };
        thread::sleep(Duration::from_millis(20));

        ctx.cancel_token().cancel("abandoned");
        assert_eq!(producer.join().unwrap(), Err(Halted));
        assert_eq!(gate.put(3), Err(Halted));
    }

    #[test]
    fn test_force_close_never_blocks() {
        let gate = FanInGate::new("full", 1, 1, ctx());
        gate.put(7).unwrap();

        gate.force_close();

        assert_eq!(gate.try_get(), GateRead::Item(7));
        assert_eq!(gate.try_get(), GateRead::Continue);
    }

    #[test]
    fn test_force_close_counts_as_marker() {
        let gate: FanInGate<u8> = FanInGate::new("consumer", 0, 1, ctx());
        gate.force_close();
        assert_eq!(gate.try_get(), GateRead::Done);
    }

    #[test]
    fn test_handle_downcast() {
        let gate = Arc::new(FanInGate::<u32>::new("typed", 0, 1, ctx()));
        let handle = GateHandle::new(gate);

        assert!(handle.downcast::<u32>().is_some());
        assert!(handle.downcast::<String>().is_none());
        assert_eq!(handle.control().label(), "typed");
    }

    #[test]
    fn test_oversized_capacity_is_clamped() {
        let gate = FanInGate::new("huge", usize::MAX, 1, ctx());
        assert_eq!(gate.capacity(), MAX_CAPACITY);

        gate.put("a").unwrap();
        gate.close().unwrap();
        assert_eq!(gate.try_get(), GateRead::Item("a"));
        assert_eq!(gate.try_get(), GateRead::Done);
    }
}
