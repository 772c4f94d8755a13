use hopline_model::InvalidFamily;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("target is not a valid IPv4 or IPv6 address: {0}")]
    InvalidTarget(String),

    #[error(transparent)]
    InvalidFamily(#[from] InvalidFamily),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("missing traceroute {0}")]
    MissingPipe(&'static str),

    /// The trace ended with an error event; carries its message.
    #[error("{0}")]
    Failed(String),
}
