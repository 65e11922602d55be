//! Minimal end-to-end example: one source, one stage, one sink, wired by
//! hand instead of through the `jana` CLI, to show what the engine's
//! public API looks like from a caller's perspective.
//!
//! Run with `cargo run --example run_pipeline`.

use std::sync::Arc;

use jana_core::arrow::{Arrow, SinkArrow, SourceArrow, StageArrow};
use jana_core::config::Config;
use jana_core::demo::{InMemorySource, RecordingProcessor};
use jana_core::event::{Event, EventPool};
use jana_core::mailbox::Mailbox;
use jana_core::topology::TopologyBuilder;
use jana_core::AnyController;

fn main() -> anyhow::Result<()> {
    let config = Config { nthreads: 4, mailbox_capacity: 32, event_pool_size: 16, chunksize: 4, ..Config::default() };

    let pool = Arc::new(EventPool::from_config(&config, 1));
    let source_to_stage: Arc<Mailbox<Arc<Event>>> = Arc::new(Mailbox::new(config.mailbox_capacity, 1));
    let stage_to_sink: Arc<Mailbox<Arc<Event>>> = Arc::new(Mailbox::new(config.mailbox_capacity, 1));

    let source = Arc::new(InMemorySource::single_run("generator", 200, 7));
    let processor = Arc::new(RecordingProcessor::new("counter", true));

    // A parallel stage that just touches every event; a real pipeline
    // would call out to a user-supplied reconstruction step here.
    let stage_transform = Arc::new(|event: &Event| -> jana_core::JanaResult<()> {
        let _ = event.run_number();
        Ok(())
    });

    let source_arrow: Arc<dyn Arrow> =
        Arc::new(SourceArrow::new("source", source, pool.clone(), source_to_stage.clone(), config.chunksize, 1));
    let stage_arrow: Arc<dyn Arrow> = Arc::new(StageArrow::new(
        "stage",
        source_to_stage,
        stage_to_sink.clone(),
        stage_transform,
        config.chunksize,
        true,
    ));
    let sink_arrow: Arc<dyn Arrow> =
        Arc::new(SinkArrow::new("sink", stage_to_sink, pool, vec![processor.clone()], config.chunksize, true));

    let topology = TopologyBuilder::new().add(source_arrow).add(stage_arrow).add(sink_arrow).build()?;
    let controller = AnyController::build(config, topology)?;
    let report = controller.run()?;

    println!("{} events processed in {:?}", report.events_processed, report.elapsed);
    assert_eq!(processor.process_count(), 200);
    Ok(())
}
