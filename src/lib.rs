//! JANA core: the parallel event-processing engine described in the
//! design doc — arrow topology, work-conserving round-robin scheduler,
//! per-event factory cache, and the mailbox/pool plumbing that connects
//! them.
//!
//! Concrete event sources, processors, and factories are supplied by the
//! caller through the traits in [`contracts`]; this crate owns only the
//! dataflow engine (§1 PURPOSE & SCOPE).

pub mod arrow;
pub mod config;
pub mod contracts;
pub mod controller;
pub mod demo;
pub mod error;
pub mod event;
pub mod factory;
pub mod factory_set;
pub mod mailbox;
pub mod metrics;
pub mod scheduler;
pub mod topology;
pub mod types;
pub mod worker;

pub use config::Config;
pub use controller::{AnyController, Controller, Report};
pub use error::{JanaError, JanaResult};
pub use event::{Event, EventPool};
pub use factory::{Factory, FactoryFlags, FactoryLogic, FactoryStatus, FactoryT};
pub use scheduler::Scheduler;
pub use topology::{Topology, TopologyBuilder};
pub use worker::Worker;
