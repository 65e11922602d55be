//! The narrow traits concrete sources, processors, and factory generators
//! implement. The engine sees user components only through these seams
//! (§6 of the design doc) — plugin discovery, calibration/geometry
//! lookup, and on-disk/network serialization all live on the far side of
//! them, out of scope for this crate.

use crate::error::JanaResult;
use crate::event::Event;
use crate::factory_set::FactorySet;

/// Where an [`EventSource`] currently stands in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Unopened,
    Opened,
    Finished,
}

/// Outcome of one [`EventSource::next`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextOutcome {
    /// `event` was populated; include it in the current chunk.
    Success,
    /// No record available right now; stop collecting for this round
    /// without marking the source finished.
    TryAgain,
    /// The source is exhausted; stop collecting and propagate finished
    /// downstream.
    Finished,
}

/// A concrete source of events: a file reader, a socket listener, a
/// synthetic generator. The Source arrow (§4.E) drives this through
/// `open`/`next`/`status`.
pub trait EventSource: Send + Sync {
    fn name(&self) -> &str;

    /// Acquires the underlying input (opens a file, connects a socket).
    /// Called once, before the first `next`.
    fn open(&self) -> JanaResult<()>;

    /// Fills in `event`'s run/event numbers. Implementations must not
    /// touch `event`'s factory set; that's `factory_generator`'s job.
    fn next(&self, event: &Event) -> JanaResult<NextOutcome>;

    fn status(&self) -> SourceStatus;

    /// Optional per-source factory generator, invoked once per `Event`
    /// the first time it's bound to this source.
    fn factory_generator(&self) -> Option<&dyn FactoryGenerator> {
        None
    }
}

/// Installs source-specific factories into a fresh event the first time
/// it's bound to a source (§6, §4.C `FactorySet::Merge`).
pub trait FactoryGenerator: Send + Sync {
    fn generate(&self, factory_set: &mut FactorySet);
}

/// A terminal consumer. `is_thread_safe` determines whether this
/// processor may run inside a parallel Sink arrow or must be grouped into
/// a sequential one (§4.E).
pub trait EventProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn is_thread_safe(&self) -> bool {
        true
    }

    fn init(&self) -> JanaResult<()> {
        Ok(())
    }

    fn brun(&self, _event: &Event) -> JanaResult<()> {
        Ok(())
    }

    fn erun(&self) -> JanaResult<()> {
        Ok(())
    }

    fn process(&self, event: &Event) -> JanaResult<()>;

    fn finish(&self) -> JanaResult<()> {
        Ok(())
    }
}
