use crate::command::{Invocation, TraceOptions};
use crate::error::TraceError;
use crate::parser::parse_line;
use crate::source::{ExitOutcome, SourceEvent, SystemTracerouteRunner, TracerouteRunner};
use hopline_model::{AddressFamily, HopRecord};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    Hop(HopRecord),
    End,
    Error { message: String },
}

impl TraceEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Hop(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Running,
    Completed,
    Failed,
}

/// A single trace request against one validated target.
pub struct Traceroute {
    invocation: Invocation,
    runner: Arc<dyn TracerouteRunner>,
}

impl std::fmt::Debug for Traceroute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Traceroute")
            .field("invocation", &self.invocation)
            .finish_non_exhaustive()
    }
}

impl Traceroute {
    /// Fails with [`TraceError::InvalidTarget`] unless `target` is an IPv4
    /// or IPv6 address. Nothing is spawned here.
    pub fn new(target: &str, options: TraceOptions) -> Result<Self, TraceError> {
        let family = AddressFamily::of_target(target)
            .ok_or_else(|| TraceError::InvalidTarget(target.to_string()))?;

        Ok(Self {
            invocation: Invocation {
                family,
                target: target.to_string(),
                options,
            },
            runner: Arc::new(SystemTracerouteRunner::default()),
        })
    }

    pub fn with_runner(mut self, runner: Arc<dyn TracerouteRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn target(&self) -> &str {
        &self.invocation.target
    }

    pub fn family(&self) -> AddressFamily {
        self.invocation.family
    }

    pub fn options(&self) -> &TraceOptions {
        &self.invocation.options
    }

    /// Returns the event stream. The tool starts on the first `next()`.
    pub fn traceroute(self) -> TraceStream {
        TraceStream {
            invocation: self.invocation,
            runner: self.runner,
            state: SessionState::Created,
            events: None,
            pending: VecDeque::new(),
        }
    }
}

/// Ordered hop events for one run, ending in exactly one `End` or `Error`.
pub struct TraceStream {
    invocation: Invocation,
    runner: Arc<dyn TracerouteRunner>,
    state: SessionState,
    events: Option<Receiver<SourceEvent>>,
    pending: VecDeque<HopRecord>,
}

impl TraceStream {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the stream on a background thread. Events queue up in the
    /// channel until the receiver reads them.
    pub fn into_receiver(self) -> Receiver<TraceEvent> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for event in self {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        rx
    }

    /// Drains the stream, returning every hop or the terminal error.
    pub fn collect_hops(self) -> Result<Vec<HopRecord>, TraceError> {
        let mut hops = Vec::new();
        for event in self {
            match event {
                TraceEvent::Hop(hop) => hops.push(hop),
                TraceEvent::End => break,
                TraceEvent::Error { message } => return Err(TraceError::Failed(message)),
            }
        }
        Ok(hops)
    }

    fn start(&mut self) -> Result<(), TraceError> {
        let (tx, rx) = mpsc::channel();
        self.runner.spawn(&self.invocation, tx)?;
        self.events = Some(rx);
        self.state = SessionState::Running;
        debug!(dest = %self.invocation.target, family = %self.invocation.family, "trace started");
        Ok(())
    }

    fn fail(&mut self, diagnostics: &str) -> TraceEvent {
        warn!(dest = %self.invocation.target, "trace failed: {}", diagnostics.trim_end());
        self.finish(SessionState::Failed);
        TraceEvent::Error {
            message: format!("Error: {diagnostics}"),
        }
    }

    fn finish(&mut self, state: SessionState) {
        self.state = state;
        self.events = None;
        self.pending.clear();
    }
}

impl Iterator for TraceStream {
    type Item = TraceEvent;

    fn next(&mut self) -> Option<TraceEvent> {
        loop {
            if let Some(hop) = self.pending.pop_front() {
                return Some(TraceEvent::Hop(hop));
            }

            match self.state {
                SessionState::Created => {
                    if let Err(err) = self.start() {
                        return Some(self.fail(&err.to_string()));
                    }
                }
                SessionState::Running => {}
                SessionState::Completed | SessionState::Failed => return None,
            }

            let received = match &self.events {
                Some(events) => events.recv().ok(),
                None => None,
            };

            match received {
                Some(SourceEvent::Line(line)) => {
                    let line = line.trim();
                    match parse_line(self.invocation.family, line) {
                        Some(hops) => self.pending.extend(hops),
                        None => trace!(line, "skipping line without hop data"),
                    }
                }
                Some(SourceEvent::Exit(ExitOutcome::Success)) => {
                    info!(dest = %self.invocation.target, "trace completed");
                    self.finish(SessionState::Completed);
                    return Some(TraceEvent::End);
                }
                Some(SourceEvent::Exit(ExitOutcome::Failure(diagnostics))) => {
                    return Some(self.fail(&diagnostics));
                }
                None => {
                    return Some(self.fail("traceroute exited without reporting a status"));
                }
            }
        }
    }
}

impl FusedIterator for TraceStream {}
