//! Fan-out broadcaster: the producer side of a stage.

use super::{FanInGate, Halted};
use std::sync::Arc;

/// Replicates a stage's output into the input gate of every downstream
/// consumer.
///
/// Each consumer receives the full stream, not a partition of it.
pub struct Broadcaster<T> {
    targets: Vec<Arc<FanInGate<T>>>,
}

impl<T> Default for Broadcaster<T> {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
        }
    }
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            targets: self.targets.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Creates a broadcaster with no targets.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a downstream gate.
    pub fn register(&mut self, gate: Arc<FanInGate<T>>) {
        self.targets.push(gate);
    }

    /// Forwards one item to every target.
    ///
    /// # Errors
    ///
    /// Returns [`Halted`] if the run stopped while a target was full.
    pub fn put(&self, item: T) -> Result<(), Halted> {
        if let Some((last, rest)) = self.targets.split_last() {
            for gate in rest {
                gate.put(item.clone())?;
            }
            last.put(item)?;
        }
        Ok(())
    }

    /// Sends one completion marker to every target.
    ///
    /// # Errors
    ///
    /// Returns [`Halted`] if the run stopped while a target was full.
    pub fn close(&self) -> Result<(), Halted> {
        for gate in &self.targets {
            gate.close()?;
        }
        Ok(())
    }

    /// Number of downstream gates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if nothing consumes this output.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<T> std::fmt::Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.targets.iter().map(|gate| gate.label()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::GateRead;
    use crate::config::PipelineConfig;
    use crate::context::RunContext;
    use crate::events::NoOpEventSink;
    use pretty_assertions::assert_eq;

    fn gate(label: &str, ctx: &Arc<RunContext>) -> Arc<FanInGate<String>> {
        Arc::new(FanInGate::new(label, 0, 1, ctx.clone()))
    }

    fn drain(gate: &FanInGate<String>) -> Vec<String> {
        let mut items = Vec::new();
        loop {
            match gate.try_get() {
                GateRead::Item(item) => items.push(item),
                GateRead::Continue => continue,
                GateRead::Done => return items,
            }
        }
    }

    #[test]
    fn test_every_target_gets_full_stream() {
        let ctx = Arc::new(RunContext::new(PipelineConfig::default(), Arc::new(NoOpEventSink)));
        let left = gate("left", &ctx);
        let right = gate("right", &ctx);

        let mut broadcaster = Broadcaster::new();
        broadcaster.register(left.clone());
        broadcaster.register(right.clone());
        assert_eq!(broadcaster.len(), 2);

        broadcaster.put("x".to_string()).unwrap();
        broadcaster.put("y".to_string()).unwrap();
        broadcaster.close().unwrap();

        assert_eq!(drain(&left), vec!["x", "y"]);
        assert_eq!(drain(&right), vec!["x", "y"]);
    }

    #[test]
    fn test_empty_broadcaster_discards() {
        let broadcaster: Broadcaster<String> = Broadcaster::new();
        assert!(broadcaster.is_empty());
        assert_eq!(broadcaster.put("dropped".to_string()), Ok(()));
        assert_eq!(broadcaster.close(), Ok(()));
    }

    #[test]
    fn test_halted_run_rejects_put() {
        let ctx = Arc::new(RunContext::new(PipelineConfig::default(), Arc::new(NoOpEventSink)));
        let mut broadcaster = Broadcaster::new();
        broadcaster.register(gate("target", &ctx));

        ctx.cancel_token().cancel("abandoned");
        assert_eq!(broadcaster.put("late".to_string()), Err(Halted));
    }
}
