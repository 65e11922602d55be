//! `jana` CLI: builds a small demonstration topology on top of
//! `jana_core` and runs it to completion, printing the final [`Report`].
//!
//! This binary exists to exercise the engine end to end; it is not part
//! of the core contract (§1 Non-goals: CLI argument parsing for a full
//! application is out of scope for the crate itself). Real deployments
//! wire their own sources/processors/factories through `jana_core`'s
//! traits and own their own CLI.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use jana_core::arrow::{Arrow, SinkArrow, SourceArrow};
use jana_core::config::{Affinity, Config, EngineKind};
use jana_core::demo::{InMemorySource, RecordingProcessor, RunSegment};
use jana_core::event::{Event, EventPool};
use jana_core::mailbox::Mailbox;
use jana_core::topology::TopologyBuilder;
use jana_core::{AnyController, JanaResult};

#[derive(Parser)]
#[command(name = "jana")]
#[command(about = "JANA parallel event-processing engine demonstrator")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional TOML config file; see `Config` for the `jana:*` surface.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a single-run, single-sink demonstration topology.
    Run {
        /// Number of events to emit.
        #[arg(long, default_value = "1000")]
        events: u64,

        /// Run number all emitted events carry.
        #[arg(long, default_value = "1")]
        run_number: i32,

        /// Overrides `nthreads` from the loaded config.
        #[arg(long)]
        workers: Option<usize>,

        /// Simulated per-event sink latency, in milliseconds.
        #[arg(long, default_value = "0")]
        sink_delay_ms: u64,

        /// Run the single-threaded debug engine instead of the arrow engine.
        #[arg(long)]
        debug_engine: bool,
    },

    /// Runs a two-run-segment demonstration to exercise brun/erun crossing.
    RunChange {
        #[arg(long, default_value = "500")]
        events_per_run: u64,

        #[arg(long)]
        workers: Option<usize>,
    },
}

fn install_tracing() {
    let filter = EnvFilter::try_from_env("JANA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_config(cli_config: Option<&PathBuf>, workers: Option<usize>, debug_engine: bool) -> JanaResult<Config> {
    let mut config = Config::load(cli_config.map(|p| p.as_path()))?;
    if let Some(n) = workers {
        config.nthreads = n;
    }
    if debug_engine {
        config.engine = EngineKind::Debug;
    }
    Ok(config)
}

fn location_count(config: &Config) -> usize {
    match config.affinity {
        Affinity::None => 1,
        Affinity::Cpu | Affinity::Numa => config.nthreads.max(1),
    }
}

fn run_single_segment(cli: &Cli, events: u64, run_number: i32, workers: Option<usize>, sink_delay_ms: u64, debug_engine: bool) -> anyhow::Result<()> {
    let config = build_config(cli.config.as_ref(), workers, debug_engine)?;
    let locs = location_count(&config);
    let pool = Arc::new(EventPool::from_config(&config, locs));

    let source_to_sink: Arc<Mailbox<Arc<Event>>> = Arc::new(Mailbox::new(config.mailbox_capacity, locs));

    let source = Arc::new(InMemorySource::single_run("demo-source", events, run_number));
    let processor = Arc::new(RecordingProcessor::new("demo-sink", true).with_delay(Duration::from_millis(sink_delay_ms)));

    let source_arrow: Arc<dyn Arrow> =
        Arc::new(SourceArrow::new("source", source, pool.clone(), source_to_sink.clone(), config.chunksize, locs));
    let sink_arrow: Arc<dyn Arrow> =
        Arc::new(SinkArrow::new("sink", source_to_sink, pool, vec![processor.clone()], config.chunksize, true));

    let topology = TopologyBuilder::new().add(source_arrow).add(sink_arrow).build()?;
    let controller = AnyController::build(config, topology)?;
    let report = controller.run()?;

    println!(
        "processed {} events in {:?} ({} workers, timed_out={})",
        report.events_processed, report.elapsed, report.worker_count, report.any_timed_out
    );
    println!("sink observed {} process() calls", processor.process_count());
    Ok(())
}

fn run_change_demo(cli: &Cli, events_per_run: u64, workers: Option<usize>) -> anyhow::Result<()> {
    let config = build_config(cli.config.as_ref(), workers, false)?;
    let locs = location_count(&config);
    let pool = Arc::new(EventPool::from_config(&config, locs));
    let source_to_sink: Arc<Mailbox<Arc<Event>>> = Arc::new(Mailbox::new(config.mailbox_capacity, locs));

    let source = Arc::new(InMemorySource::new(
        "demo-source",
        vec![
            RunSegment { event_count: events_per_run, run_number: 1 },
            RunSegment { event_count: events_per_run, run_number: 2 },
        ],
    ));
    let processor = Arc::new(RecordingProcessor::new("demo-sink", false));

    let source_arrow: Arc<dyn Arrow> =
        Arc::new(SourceArrow::new("source", source, pool.clone(), source_to_sink.clone(), config.chunksize, locs));
    let sink_arrow: Arc<dyn Arrow> =
        Arc::new(SinkArrow::new("sink", source_to_sink, pool, vec![processor.clone()], config.chunksize, false));

    let topology = TopologyBuilder::new().add(source_arrow).add(sink_arrow).build()?;
    let controller = AnyController::build(config, topology)?;
    let report = controller.run()?;

    println!("processed {} events across 2 run segments in {:?}", report.events_processed, report.elapsed);
    println!("run-boundary sequence tail: {:?}", &processor.events()[..processor.events().len().min(6)]);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    install_tracing();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Run { events, run_number, workers, sink_delay_ms, debug_engine } => {
            run_single_segment(&cli, *events, *run_number, *workers, *sink_delay_ms, *debug_engine)
        }
        Commands::RunChange { events_per_run, workers } => run_change_demo(&cli, *events_per_run, *workers),
    }
}
