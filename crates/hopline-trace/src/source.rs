use crate::command::Invocation;
use crate::error::TraceError;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::Sender;
use std::thread;
use tracing::debug;

/// What a line source reports while a traceroute runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    Line(String),
    Exit(ExitOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// Non-zero exit, with everything written to stderr.
    Failure(String),
}

/// Starts traceroute for an invocation and reports its output.
///
/// Implementations send every `Line` before exactly one `Exit`. Sending may
/// happen on any thread; `spawn` itself must not block on the run.
pub trait TracerouteRunner: Send + Sync {
    fn spawn(&self, invocation: &Invocation, events: Sender<SourceEvent>) -> Result<(), TraceError>;
}

/// Runs the real `traceroute` binary.
#[derive(Debug, Clone)]
pub struct SystemTracerouteRunner {
    pub program: PathBuf,
}

impl Default for SystemTracerouteRunner {
    fn default() -> Self {
        Self {
            program: PathBuf::from("traceroute"),
        }
    }
}

impl SystemTracerouteRunner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TracerouteRunner for SystemTracerouteRunner {
    fn spawn(
        &self,
        invocation: &Invocation,
        events: Sender<SourceEvent>,
    ) -> Result<(), TraceError> {
        let args = invocation.args();
        debug!(program = %self.program.display(), ?args, "spawning traceroute");

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| TraceError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(TraceError::MissingPipe("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(TraceError::MissingPipe("stderr"))?;

        let tx_out = events.clone();
        let stdout_reader = thread::spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            // Keep draining until EOF, even after the receiver is gone, so
            // traceroute never blocks on a full pipe.
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let _ = tx_out.send(SourceEvent::Line(decode_line(&buf)));
                    }
                }
            }
        });

        let stderr_reader = thread::spawn(move || {
            let mut raw = Vec::new();
            let _ = BufReader::new(stderr).read_to_end(&mut raw);
            String::from_utf8_lossy(&raw).into_owned()
        });

        thread::spawn(move || {
            let _ = stdout_reader.join();
            let diagnostics = stderr_reader.join().unwrap_or_default();
            let outcome = match child.wait() {
                Ok(status) if status.success() => ExitOutcome::Success,
                Ok(status) => {
                    debug!(%status, "traceroute exited unsuccessfully");
                    ExitOutcome::Failure(diagnostics)
                }
                Err(err) => ExitOutcome::Failure(format!("failed to wait for traceroute: {err}")),
            };
            let _ = events.send(SourceEvent::Exit(outcome));
        });

        Ok(())
    }
}

/// One line of raw output without its terminator. Bytes that are not
/// UTF-8 become U+FFFD, which the parser then drops as noise.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Replays captured traceroute output instead of running the tool.
#[derive(Debug, Clone, Default)]
pub struct ReplayRunner {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl ReplayRunner {
    pub fn succeeding(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            success: true,
        }
    }

    pub fn failing(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

impl TracerouteRunner for ReplayRunner {
    fn spawn(
        &self,
        invocation: &Invocation,
        events: Sender<SourceEvent>,
    ) -> Result<(), TraceError> {
        debug!(dest = %invocation.target, "replaying captured traceroute output");

        let lines: Vec<String> = self.stdout.lines().map(str::to_string).collect();
        let outcome = if self.success {
            ExitOutcome::Success
        } else {
            ExitOutcome::Failure(self.stderr.clone())
        };

        thread::spawn(move || {
            for line in lines {
                if events.send(SourceEvent::Line(line)).is_err() {
                    return;
                }
            }
            let _ = events.send(SourceEvent::Exit(outcome));
        });

        Ok(())
    }
}
