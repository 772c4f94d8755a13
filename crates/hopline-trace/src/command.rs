use hopline_model::AddressFamily;
use serde::{Deserialize, Serialize};

/// Pass-through settings for the external traceroute tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceOptions {
    pub packet_len: u32,
    pub max_hops: u32,
    /// Per-probe wait, in seconds. Enforced by traceroute itself.
    pub wait_secs: u32,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            packet_len: 60,
            max_hops: 30,
            wait_secs: 5,
        }
    }
}

/// A fully validated request to run traceroute once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub family: AddressFamily,
    pub target: String,
    pub options: TraceOptions,
}

impl Invocation {
    /// Command-line arguments, in the order traceroute expects them.
    /// `-n` is always passed: the parser only understands numeric output.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.family.flag().to_string(),
            "-n".to_string(),
            "-m".to_string(),
            self.options.max_hops.to_string(),
            "-w".to_string(),
            self.options.wait_secs.to_string(),
            self.target.clone(),
            self.options.packet_len.to_string(),
        ]
    }
}
