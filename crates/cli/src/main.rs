use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing::{info, warn};
use vigil_api::{InProcHub, StreamApi};
use vigil_core::{EngineConfig, Limit, RawFrame};
use vigil_series::{StreamConfig, WindowTarget};
use vigil_store::{spawn_pipeline, Command, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "vigilctl", version, about = "Vigil replay CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a frame log (one frame per line) into a collection
    Replay {
        file: PathBuf,
        /// Positive keeps the newest N at the back, negative at the front, 0 unbounded
        #[arg(long = "limit", env = "VIGIL_LIMIT", allow_hyphen_values = true)]
        limit: Option<i64>,
        /// Severity-ordered alert collection
        #[arg(long = "alert", action = ArgAction::SetTrue)]
        alert: bool,
        /// Treat the first line as a full snapshot
        #[arg(long = "snapshot-first", action = ArgAction::SetTrue)]
        snapshot_first: bool,
        /// Coalescing interval in milliseconds
        #[arg(long = "batch-ms", env = "VIGIL_BATCH_MS")]
        batch_ms: Option<u64>,
    },
    /// Replay a point log (object or array per line) into one series stream
    Series {
        file: PathBuf,
        #[arg(long = "stream", default_value = "replay")]
        stream: String,
        /// Series window size
        #[arg(long = "window", env = "VIGIL_WINDOW")]
        window: Option<usize>,
        /// Disable the window before printing, restoring archived items
        #[arg(long = "restore", action = ArgAction::SetTrue)]
        restore: bool,
    },
}

fn init_tracing() {
    let env = std::env::var("VIGIL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VIGIL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VIGIL_METRICS_ADDR; expected host:port");
        }
    }
}

fn read_lines(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(text.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect())
}

fn frames_from_lines(lines: Vec<String>, snapshot_first: bool) -> Vec<RawFrame> {
    lines
        .into_iter()
        .enumerate()
        .map(|(i, l)| if i == 0 && snapshot_first { RawFrame::Snapshot(l) } else { RawFrame::Incremental(l) })
        .collect()
}

/// Unparseable lines are skipped with a warning, like undecodable frames.
fn points_from_lines(lines: Vec<String>) -> Vec<Value> {
    let mut out = Vec::new();
    for (n, line) in lines.into_iter().enumerate() {
        match serde_json::from_str::<Value>(&line) {
            Ok(Value::Array(items)) => out.extend(items),
            Ok(v) => out.push(v),
            Err(e) => warn!(line = n + 1, error = %e, "skipping unparseable point line"),
        }
    }
    out
}

async fn replay(cfg: &EngineConfig, file: &Path, limit: Limit, alert: bool, snapshot_first: bool, output: Output) -> Result<()> {
    let frames = frames_from_lines(read_lines(file)?, snapshot_first);
    info!(file = %file.display(), frames = frames.len(), limit = limit.0, alert, "replay invoked");
    let pcfg = PipelineConfig::from_engine("replay", cfg).limit(limit).alert(alert);
    let (tx, handle) = spawn_pipeline(pcfg);
    let mut rx = handle.subscribe_epoch();
    for frame in frames {
        tx.send(Command::Frames(vec![frame])).await.context("pipeline stopped early")?;
    }
    // Closing the channel makes the pipeline drain and publish a closed snapshot.
    drop(tx);
    while !handle.current().closed {
        if rx.changed().await.is_err() {
            break;
        }
    }
    let snap = handle.current();
    match output {
        Output::Human => {
            println!("epoch {} • {} items", snap.epoch, snap.items.len());
            for item in snap.items.iter() {
                let sev = if alert { format!("{:<9} ", item.severity().name()) } else { String::new() };
                println!("{}{:<12} {}", sev, item.id().to_string(), serde_json::to_string(item.fields())?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&snap.items)?),
    }
    Ok(())
}

async fn series(cfg: EngineConfig, file: &Path, stream: &str, window: Option<usize>, restore: bool, output: Output) -> Result<()> {
    let points = points_from_lines(read_lines(file)?);
    info!(file = %file.display(), points = points.len(), stream = %stream, window = ?window, restore, "series invoked");
    let hub = InProcHub::new(cfg);
    hub.register_stream(stream, StreamConfig { window, ..Default::default() }).await?;
    hub.push_points(stream, points).await?;
    if restore {
        hub.set_window(WindowTarget::Stream(stream.to_string()), None).await?;
    }
    hub.flush_series().await?;
    let view = hub.series(stream)?;
    match output {
        Output::Human => {
            let w = view.window.map(|w| w.to_string()).unwrap_or_else(|| "-".to_string());
            println!("{} • {} points • window {} • {} archived", view.key, view.points.len(), w, view.archived);
            for p in view.points.iter() {
                println!("{}", serde_json::to_string(p)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(view.as_ref())?),
    }
    hub.unregister_stream(stream).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let mut cfg = EngineConfig::from_env();

    match cli.command {
        Commands::Replay { file, limit, alert, snapshot_first, batch_ms } => {
            if let Some(ms) = batch_ms {
                cfg.batch_interval = Duration::from_millis(ms);
            }
            let limit = limit.map(Limit).unwrap_or(cfg.limit);
            replay(&cfg, &file, limit, alert, snapshot_first, cli.output).await?;
        }
        Commands::Series { file, stream, window, restore } => {
            series(cfg, &file, &stream, window, restore, cli.output).await?;
        }
    }
    Ok(())
}
