//! Lifecycle façade: builds workers on top of a [`Topology`], drives the
//! run loop, and detects drain/timeout conditions (§4.H).
//!
//! This is the "arrow engine" of the dual-engine design (§9 Design
//! Notes); [`DebugController`] is the single-threaded bring-up
//! alternative, both behind the same [`ControllerLike`] shape so a caller
//! can pick one via `Config::engine`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::arrow::{ArrowKind, ArrowStatus};
use crate::config::{Affinity, Config, EngineKind};
use crate::error::JanaResult;
use crate::scheduler::Scheduler;
use crate::topology::Topology;
use crate::worker::Worker;

/// Snapshot produced when a run completes: throughput and health for the
/// final status line / test assertions.
#[derive(Debug, Clone)]
pub struct Report {
    pub elapsed: Duration,
    pub events_processed: u64,
    pub worker_count: usize,
    pub any_timed_out: bool,
}

struct WorkerSlot {
    worker: Arc<Worker>,
    thread: Option<JoinHandle<()>>,
    active: bool,
}

/// The real, multi-threaded controller (`jana:engine = 0`).
pub struct Controller {
    config: Config,
    topology: Arc<Topology>,
    scheduler: Arc<Scheduler>,
    workers: Mutex<Vec<WorkerSlot>>,
    started_at: Mutex<Instant>,
    draining: AtomicBool,
    poll_interval: Duration,
}

impl Controller {
    pub fn new(config: Config, topology: Topology) -> JanaResult<Self> {
        let topology = Arc::new(topology);
        let scheduler = Arc::new(Scheduler::new(topology.arrows().to_vec()));
        Ok(Controller {
            config,
            topology,
            scheduler,
            workers: Mutex::new(Vec::new()),
            started_at: Mutex::new(Instant::now()),
            draining: AtomicBool::new(false),
            poll_interval: Duration::from_millis(50),
        })
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn location_for(&self, id: u32) -> usize {
        match self.config.affinity {
            Affinity::None => 0,
            Affinity::Cpu | Affinity::Numa => id as usize,
        }
    }

    /// Scales the live worker pool to exactly `n` threads. Workers
    /// removed by a scale-down are retained (not dropped) so a later
    /// scale-up reuses their ids deterministically (§4.H, `original_source/`
    /// worker-vector semantics).
    pub fn scale(&self, n: usize) -> JanaResult<()> {
        let mut workers = self.workers.lock();

        for idx in n..workers.len() {
            let slot = &mut workers[idx];
            if slot.active {
                slot.worker.request_stop();
                if let Some(handle) = slot.thread.take() {
                    let _ = handle.join();
                }
                slot.active = false;
            }
        }

        for idx in 0..n {
            if idx < workers.len() {
                let slot = &mut workers[idx];
                if !slot.active {
                    slot.worker.reset_for_restart();
                    let worker = slot.worker.clone();
                    slot.thread = Some(std::thread::spawn(move || worker.run()));
                    slot.active = true;
                }
            } else {
                let location_id = self.location_for(idx as u32);
                let worker = Worker::new(
                    idx as u32,
                    Some(idx),
                    location_id,
                    self.config.affinity != Affinity::None,
                    self.scheduler.clone(),
                );
                let thread_handle = {
                    let worker = worker.clone();
                    std::thread::spawn(move || worker.run())
                };
                workers.push(WorkerSlot { worker, thread: Some(thread_handle), active: true });
            }
        }
        tracing::info!(nthreads = n, "scaled worker pool");
        Ok(())
    }

    fn active_worker_count(&self) -> usize {
        self.workers.lock().iter().filter(|s| s.active).count()
    }

    fn check_drain(&self) {
        if self.topology.all_sources_finished() && !self.draining.swap(true, Ordering::AcqRel) {
            tracing::info!("all sources finished, draining queues");
        }
    }

    fn timeout_threshold(&self) -> Duration {
        if self.config.timeout_secs == 0 {
            return Duration::MAX;
        }
        let elapsed = self.started_at.lock().elapsed();
        let nthreads = self.active_worker_count().max(1) as f64;
        let warmup_window = Duration::from_secs_f64(self.config.warmup_timeout_secs as f64 * self.config.event_pool_size as f64 / nthreads);
        if elapsed < warmup_window {
            Duration::from_secs(self.config.warmup_timeout_secs)
        } else {
            Duration::from_secs(self.config.timeout_secs)
        }
    }

    fn check_timeouts(&self) {
        if self.config.timeout_secs == 0 {
            return;
        }
        let threshold = self.timeout_threshold();
        for slot in self.workers.lock().iter() {
            if slot.active && slot.worker.metrics().heartbeat_age() > threshold {
                slot.worker.declare_timeout();
            }
        }
    }

    pub fn is_timed_out(&self) -> bool {
        self.workers.lock().iter().any(|s| s.worker.is_timed_out())
    }

    fn report(&self) -> Report {
        // Every arrow's metrics count events it handled, so a source and
        // its downstream sink both tally the same event; only sinks are
        // terminal, so only sinks are counted here (§8 scenario 1).
        let events_processed: u64 = self
            .topology
            .arrows()
            .iter()
            .filter(|a| a.kind() == ArrowKind::Sink)
            .map(|a| a.metrics().events_processed.load(Ordering::Relaxed))
            .sum();
        Report {
            elapsed: self.started_at.lock().elapsed(),
            events_processed,
            worker_count: self.active_worker_count(),
            any_timed_out: self.is_timed_out(),
        }
    }

    /// Runs the topology to completion: initializes, scales up to
    /// `config.nthreads`, polls for drain/timeout until every sink is
    /// finished, then scales to zero and finalizes.
    pub fn run(&self) -> JanaResult<Report> {
        self.topology.initialize()?;
        *self.started_at.lock() = Instant::now();
        self.scale(self.config.nthreads)?;

        loop {
            if self.topology.is_complete() {
                break;
            }
            self.check_drain();
            self.check_timeouts();
            if self.is_timed_out() {
                tracing::error!("worker watchdog tripped, stopping run");
                break;
            }
            std::thread::sleep(self.poll_interval);
        }

        self.scale(0)?;
        self.topology.finalize()?;
        Ok(self.report())
    }

    /// Cooperative shutdown: stop every worker at its next arrow
    /// boundary. Idempotent — calling `stop()` twice is equivalent to
    /// calling it once.
    pub fn stop(&self) -> JanaResult<()> {
        self.scale(0)
    }
}

/// The single-threaded bring-up engine (`jana:engine = 1`): runs every
/// arrow in topological order on the calling thread until the topology
/// completes. Useful for deterministic single-step debugging; never
/// schedules two arrows concurrently.
pub struct DebugController {
    topology: Topology,
}

impl DebugController {
    pub fn new(topology: Topology) -> Self {
        DebugController { topology }
    }

    pub fn run(&self) -> JanaResult<Report> {
        self.topology.initialize()?;
        let start = Instant::now();
        loop {
            if self.topology.is_complete() {
                break;
            }
            let mut made_progress = false;
            for arrow in self.topology.arrows() {
                if arrow.is_finished() || arrow.is_upstream_finished() {
                    continue;
                }
                arrow.inc_thread_count();
                let status = arrow.execute(0)?;
                arrow.dec_thread_count();
                if status == ArrowStatus::Finished {
                    arrow.mark_finished();
                }
                if arrow.is_upstream_finished() && arrow.thread_count() == 0 && !arrow.is_finished() {
                    arrow.mark_finished();
                }
                if arrow.is_finished() {
                    arrow.propagate_finished();
                }
                if status != ArrowStatus::ComeBackLater {
                    made_progress = true;
                }
            }
            if !made_progress {
                std::thread::sleep(Duration::from_millis(1));
            }
        }
        self.topology.finalize()?;
        let events_processed: u64 = self
            .topology
            .arrows()
            .iter()
            .filter(|a| a.kind() == ArrowKind::Sink)
            .map(|a| a.metrics().events_processed.load(Ordering::Relaxed))
            .sum();
        Ok(Report { elapsed: start.elapsed(), events_processed, worker_count: 1, any_timed_out: false })
    }
}

/// Picks the controller implementation named by `config.engine`. Both
/// variants implement the same `run()`/`Report` shape; only the
/// concurrency strategy differs.
pub enum AnyController {
    Arrow(Controller),
    Debug(DebugController),
}

impl AnyController {
    pub fn build(config: Config, topology: Topology) -> JanaResult<Self> {
        match config.engine {
            EngineKind::Arrow => Ok(AnyController::Arrow(Controller::new(config, topology)?)),
            EngineKind::Debug => Ok(AnyController::Debug(DebugController::new(topology))),
        }
    }

    pub fn run(&self) -> JanaResult<Report> {
        match self {
            AnyController::Arrow(c) => c.run(),
            AnyController::Debug(d) => d.run(),
        }
    }
}
