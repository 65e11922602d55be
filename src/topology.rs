//! The directed graph of arrows a [`crate::controller::Controller`] hands
//! to the scheduler (§3, §4.G).
//!
//! Construction is append-only through [`TopologyBuilder`]: callers wire a
//! source, any number of stages, and one or more sinks by sharing
//! [`crate::mailbox::Mailbox`] handles between adjacent arrows, the same
//! way the original wires `JMailbox` instances between `JArrow`s.

use std::sync::Arc;

use crate::arrow::{Arrow, ArrowKind};
use crate::error::{JanaError, JanaResult};

/// A built, validated topology: an ordered arrow list plus the indices of
/// its sources and sinks, used for finished-propagation bookkeeping and
/// completion checks.
pub struct Topology {
    arrows: Vec<Arc<dyn Arrow>>,
    source_indices: Vec<usize>,
    sink_indices: Vec<usize>,
}

impl Topology {
    pub fn arrows(&self) -> &[Arc<dyn Arrow>] {
        &self.arrows
    }

    pub fn initialize(&self) -> JanaResult<()> {
        for arrow in &self.arrows {
            arrow.initialize().map_err(|e| {
                JanaError::component_init("topology", arrow.name().to_string(), anyhow::anyhow!(e.to_string()))
            })?;
            tracing::info!(arrow = arrow.name(), kind = ?arrow.kind(), "arrow initialized");
        }
        Ok(())
    }

    pub fn finalize(&self) -> JanaResult<()> {
        for arrow in &self.arrows {
            arrow.finalize()?;
            tracing::info!(arrow = arrow.name(), "arrow finalized");
        }
        Ok(())
    }

    /// The topology is complete once every sink has observed all of its
    /// upstreams finished and drained its inbox — the monotonic
    /// finished-propagation invariant from §3.
    pub fn is_complete(&self) -> bool {
        self.sink_indices.iter().all(|&idx| self.arrows[idx].is_finished())
    }

    pub fn source_count(&self) -> usize {
        self.source_indices.len()
    }

    pub fn sink_count(&self) -> usize {
        self.sink_indices.len()
    }

    pub fn all_sources_finished(&self) -> bool {
        self.source_indices.iter().all(|&idx| self.arrows[idx].is_upstream_finished())
    }
}

/// Accumulates arrows before validation. `push` order becomes the
/// scheduler's initial round-robin order.
#[derive(Default)]
pub struct TopologyBuilder {
    arrows: Vec<Arc<dyn Arrow>>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        TopologyBuilder::default()
    }

    pub fn add(mut self, arrow: Arc<dyn Arrow>) -> Self {
        self.arrows.push(arrow);
        self
    }

    /// Validates that at least one Source and one Sink are present
    /// (`TopologyMisconfigured` otherwise, per §7) and freezes the graph.
    pub fn build(self) -> JanaResult<Topology> {
        let mut source_indices = Vec::new();
        let mut sink_indices = Vec::new();
        for (idx, arrow) in self.arrows.iter().enumerate() {
            match arrow.kind() {
                ArrowKind::Source => source_indices.push(idx),
                ArrowKind::Sink => sink_indices.push(idx),
                ArrowKind::Stage => {}
            }
        }
        if source_indices.is_empty() {
            return Err(JanaError::TopologyMisconfigured("topology has no Source arrow".into()));
        }
        if sink_indices.is_empty() {
            return Err(JanaError::TopologyMisconfigured("topology has no Sink arrow".into()));
        }
        Ok(Topology { arrows: self.arrows, source_indices, sink_indices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrow::SourceArrow;
    use crate::contracts::{EventSource, NextOutcome, SourceStatus};
    use crate::event::{Event, EventPool};
    use crate::mailbox::Mailbox;

    struct EmptySource;
    impl EventSource for EmptySource {
        fn name(&self) -> &str {
            "empty"
        }
        fn open(&self) -> JanaResult<()> {
            Ok(())
        }
        fn next(&self, _event: &Event) -> JanaResult<NextOutcome> {
            Ok(NextOutcome::Finished)
        }
        fn status(&self) -> SourceStatus {
            SourceStatus::Finished
        }
    }

    #[test]
    fn build_rejects_missing_sink() {
        let pool = Arc::new(EventPool::new(2, 1));
        let outbox = Arc::new(Mailbox::new(2, 1));
        let source = Arc::new(SourceArrow::new("src", Arc::new(EmptySource), pool, outbox, 1, 1));
        let result = TopologyBuilder::new().add(source).build();
        assert!(matches!(result, Err(JanaError::TopologyMisconfigured(_))));
    }
}
