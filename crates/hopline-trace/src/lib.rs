//! Streaming traceroute: runs the tool, parses its numeric output line by
//! line and hands back hop records as they arrive.

pub mod batch;
pub mod command;
pub mod error;
pub mod parser;
pub mod session;
pub mod source;

pub use batch::{run_traces, TraceJobResult};
pub use command::{Invocation, TraceOptions};
pub use error::TraceError;
pub use parser::{is_address, parse_line, parse_output};
pub use session::{SessionState, TraceEvent, TraceStream, Traceroute};
pub use source::{ExitOutcome, ReplayRunner, SourceEvent, SystemTracerouteRunner, TracerouteRunner};
