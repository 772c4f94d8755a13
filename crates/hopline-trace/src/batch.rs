use crate::command::TraceOptions;
use crate::error::TraceError;
use crate::session::Traceroute;
use crate::source::TracerouteRunner;
use hopline_model::{AddressFamily, HopRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use tracing::debug;

#[derive(Debug)]
pub struct TraceJobResult {
    pub target: String,
    pub family: Option<AddressFamily>,
    pub outcome: Result<Vec<HopRecord>, TraceError>,
}

/// Traces every target, at most `concurrency` at a time.
///
/// Each target gets its own session. Results come back in input order no
/// matter which trace finishes first.
pub fn run_traces(
    targets: &[String],
    options: &TraceOptions,
    concurrency: usize,
    runner: Arc<dyn TracerouteRunner>,
) -> Vec<TraceJobResult> {
    let workers = concurrency.clamp(1, targets.len().max(1));
    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();

    debug!(jobs = targets.len(), workers, "running traces");

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let cursor = &cursor;
            let runner = Arc::clone(&runner);
            scope.spawn(move || loop {
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                let Some(target) = targets.get(index) else {
                    break;
                };
                let result = run_one(target, options, Arc::clone(&runner));
                if tx.send((index, result)).is_err() {
                    break;
                }
            });
        }
    });
    drop(tx);

    let mut results: Vec<(usize, TraceJobResult)> = rx.into_iter().collect();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

fn run_one(
    target: &str,
    options: &TraceOptions,
    runner: Arc<dyn TracerouteRunner>,
) -> TraceJobResult {
    let family = AddressFamily::of_target(target);
    let outcome = Traceroute::new(target, options.clone())
        .and_then(|trace| trace.with_runner(runner).traceroute().collect_hops());

    TraceJobResult {
        target: target.to_string(),
        family,
        outcome,
    }
}
