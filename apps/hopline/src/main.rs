use anyhow::{anyhow, Result};
use chrono::{SecondsFormat, Utc};
use clap::{Args, Parser, Subcommand};
use hopline_model::{AddressFamily, HopRecord, TraceFile, TraceRun};
use hopline_trace::{
    parse_output, run_traces, ReplayRunner, SystemTracerouteRunner, TraceEvent, TraceOptions,
    Traceroute, TracerouteRunner,
};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hopline", version, about = "Streaming numeric traceroute")]
struct Cli {
    /// Log filter (overrides RUST_LOG), e.g. `debug` or `hopline_trace=trace`
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Trace(TraceArgs),
    Batch(BatchArgs),
    Replay(ReplayArgs),
    Parse(ParseArgs),
}

#[derive(Args, Clone)]
struct ProbeArgs {
    #[arg(long, default_value_t = 60)]
    packet_len: u32,

    #[arg(long, default_value_t = 30)]
    max_hops: u32,

    /// Per-probe wait in seconds
    #[arg(long = "wait", default_value_t = 5)]
    wait_secs: u32,

    #[arg(long = "traceroute", env = "HOPLINE_TRACEROUTE", default_value = "traceroute")]
    program: PathBuf,
}

impl ProbeArgs {
    fn options(&self) -> TraceOptions {
        TraceOptions {
            packet_len: self.packet_len,
            max_hops: self.max_hops,
            wait_secs: self.wait_secs,
        }
    }
}

/// Trace one IPv4/IPv6 address, printing hops as they arrive.
///
/// Only target networks you own or have permission to test.
#[derive(Args)]
struct TraceArgs {
    target: String,

    #[command(flatten)]
    probe: ProbeArgs,

    /// Print one JSON object per hop
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
#[command(about = "Trace many targets and write a JSON trace file")]
struct BatchArgs {
    #[arg(long)]
    targets: Option<PathBuf>,

    #[arg(long = "target")]
    target_list: Vec<String>,

    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 4)]
    concurrency: usize,

    #[command(flatten)]
    probe: ProbeArgs,
}

#[derive(Args)]
#[command(about = "Run captured traceroute output through a full trace session")]
struct ReplayArgs {
    stdout: PathBuf,

    #[arg(long)]
    target: String,

    /// Captured stderr, reported if --fail is set
    #[arg(long)]
    stderr: Option<PathBuf>,

    /// Treat the capture as a non-zero exit
    #[arg(long)]
    fail: bool,

    #[arg(long)]
    json: bool,
}

#[derive(Args)]
#[command(about = "Parse captured traceroute output offline")]
struct ParseArgs {
    input: PathBuf,

    #[arg(long, default_value = "ipv4")]
    family: String,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    match run(cli.command) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(1);
        }
    }
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// Returns `Ok(false)` when a trace ended with an error event.
fn run(command: Commands) -> Result<bool> {
    match command {
        Commands::Trace(args) => run_trace(args),
        Commands::Batch(args) => run_batch(args).map(|()| true),
        Commands::Replay(args) => run_replay(args),
        Commands::Parse(args) => run_parse(args).map(|()| true),
    }
}

fn run_trace(args: TraceArgs) -> Result<bool> {
    let runner = Arc::new(SystemTracerouteRunner::new(&args.probe.program));
    let trace = Traceroute::new(&args.target, args.probe.options())?.with_runner(runner);
    print_events(trace, args.json)
}

fn run_replay(args: ReplayArgs) -> Result<bool> {
    let stdout = read_text(&args.stdout)?;
    let stderr = match &args.stderr {
        Some(path) => read_text(path)?,
        None => String::new(),
    };

    let runner = ReplayRunner {
        stdout,
        stderr,
        success: !args.fail,
    };
    let trace =
        Traceroute::new(&args.target, TraceOptions::default())?.with_runner(Arc::new(runner));
    print_events(trace, args.json)
}

fn print_events(trace: Traceroute, json: bool) -> Result<bool> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if !json {
        writeln!(out, "hopline to {} ({})", trace.target(), trace.family())?;
    }

    for event in trace.traceroute() {
        match event {
            TraceEvent::Hop(hop) => {
                if json {
                    serde_json::to_writer(&mut out, &hop)?;
                    writeln!(out)?;
                } else {
                    writeln!(out, "{}", format_hop(&hop))?;
                }
                out.flush()?;
            }
            TraceEvent::End => return Ok(true),
            TraceEvent::Error { message } => {
                eprintln!("{}", message.trim_end());
                return Ok(false);
            }
        }
    }

    Ok(true)
}

fn format_hop(hop: &HopRecord) -> String {
    let rtts: Vec<String> = hop.rtts.iter().map(|rtt| format!("{rtt:.3} ms")).collect();
    if rtts.is_empty() {
        format!("{:>2}  {}", hop.number, hop.address)
    } else {
        format!("{:>2}  {}  {}", hop.number, hop.address, rtts.join("  "))
    }
}

fn run_batch(args: BatchArgs) -> Result<()> {
    let mut targets = match &args.targets {
        Some(path) => targets_from_list(&read_text(path)?),
        None => Vec::new(),
    };
    targets.extend(args.target_list);

    if targets.is_empty() {
        return Err(anyhow!("no targets provided (use --targets or --target)"));
    }

    let runner: Arc<dyn TracerouteRunner> =
        Arc::new(SystemTracerouteRunner::new(&args.probe.program));
    let timestamp_utc = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let results = run_traces(&targets, &args.probe.options(), args.concurrency, runner);

    let runs: Vec<TraceRun> = results
        .into_iter()
        .map(|job| {
            let (hops, error) = match job.outcome {
                Ok(hops) => (hops, None),
                Err(err) => {
                    eprintln!("traceroute failed for {}: {}", job.target, err);
                    (Vec::new(), Some(err.to_string()))
                }
            };
            TraceRun {
                target: job.target,
                family: job.family,
                timestamp_utc: timestamp_utc.clone(),
                hops,
                error,
            }
        })
        .collect();

    info!(runs = runs.len(), out = %args.out.display(), "writing trace file");
    write_json(&args.out, &TraceFile { version: 1, runs })
}

/// One target per line; blank lines and `#` comments are skipped.
fn targets_from_list(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn run_parse(args: ParseArgs) -> Result<()> {
    let family: AddressFamily = args.family.parse()?;
    let text = read_text(&args.input)?;
    let hops = parse_output(family, &text);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &hops)?;
    writeln!(out)?;
    Ok(())
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|err| anyhow!("failed to read {:?}: {}", path, err))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .map_err(|err| anyhow!("failed to create output directory {:?}: {}", parent, err))?;
    }

    let tmp_path = temp_path(path);
    let mut file = fs::File::create(&tmp_path)
        .map_err(|err| anyhow!("failed to create temp file {:?}: {}", tmp_path, err))?;
    file.write_all(data)
        .map_err(|err| anyhow!("failed to write temp file {:?}: {}", tmp_path, err))?;
    file.sync_all()
        .map_err(|err| anyhow!("failed to sync temp file {:?}: {}", tmp_path, err))?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(anyhow!("failed to replace output {:?}: {}", path, err));
    }

    // Persist the rename itself.
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("traces.json");
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let tmp_name = format!(".{}.part-{}-{}", file_name, std::process::id(), stamp);
    parent.join(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_hop_prints_rtts_with_units() {
        let hop = HopRecord {
            number: 3,
            address: "10.0.0.3".to_string(),
            rtts: vec![1.5, 2.25],
        };
        assert_eq!(format_hop(&hop), " 3  10.0.0.3  1.500 ms  2.250 ms");
    }

    #[test]
    fn format_hop_without_replies() {
        assert_eq!(format_hop(&HopRecord::new(12, "*")), "12  *");
    }

    #[test]
    fn targets_file_skips_comments_and_blanks() {
        let contents = "# lab routers\n193.2.1.87\n\n  2001:db8::1  \n#10.0.0.1\n";
        assert_eq!(
            targets_from_list(contents),
            vec!["193.2.1.87".to_string(), "2001:db8::1".to_string()]
        );
    }

    #[test]
    fn temp_path_stays_next_to_output() {
        let tmp = temp_path(Path::new("out/traces.json"));
        assert_eq!(tmp.parent(), Some(Path::new("out")));
        assert!(tmp
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(".traces.json.part-")));
    }
}
