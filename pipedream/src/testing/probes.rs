//! Probes for observing items as they pass through a stage.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Records every item passed through [`Recorder::tap`].
///
/// Clones share the same record, so a recorder can be moved into a stage
/// closure and inspected afterwards.
#[derive(Debug)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            seen: Arc::clone(&self.seen),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an identity function that records each item it sees.
    pub fn tap(&self) -> impl Fn(T) -> T + Send + Sync + 'static {
        let seen = Arc::clone(&self.seen);
        move |item| {
            seen.lock().push(item.clone());
            item
        }
    }

    /// Returns the recorded items, in recording order.
    #[must_use]
    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    /// Returns the number of recorded items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.lock().is_empty()
    }
}

/// Returns an identity function that sleeps for `delay` on every item.
pub fn slow<T: 'static>(delay: Duration) -> impl Fn(T) -> T + Send + Sync + 'static {
    move |item| {
        std::thread::sleep(delay);
        item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_shares_record_across_clones() {
        let recorder = Recorder::new();
        let tap = recorder.clone().tap();

        assert_eq!(tap(1), 1);
        assert_eq!(tap(2), 2);
        assert_eq!(recorder.seen(), vec![1, 2]);
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn test_slow_is_identity() {
        let delay = slow(Duration::from_millis(1));
        assert_eq!(delay("x"), "x");
    }
}
