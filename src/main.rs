//! `checkin`: run a check-in station against an RFID reader

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

use checkin_rs::directory::MemoryDirectory;
use checkin_rs::scan::ScanSource;
use checkin_rs::server::config::DEFAULT_PORT;
use checkin_rs::{CheckinServer, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "checkin", version, about = "Gym check-in station")]
struct Args {
    /// RFID reader device or file; stdin when absent
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// HTTP port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// JSON file of members per datastore
    #[arg(long)]
    members: Option<PathBuf>,

    /// Bind a member sheet to an account, as `topic=sheet-id` (repeatable)
    #[arg(long = "sheet", value_parser = parse_binding)]
    sheets: Vec<(String, String)>,

    /// Maximum concurrent WebSocket subscribers (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    max_connections: usize,
}

fn parse_binding(raw: &str) -> anyhow::Result<(String, String)> {
    let Some((topic, sheet)) = raw.split_once('=') else {
        bail!("expected topic=sheet-id, got {raw:?}");
    };
    if topic.is_empty() || sheet.is_empty() {
        bail!("topic and sheet id must not be empty");
    }
    Ok((topic.to_string(), sheet.to_string()))
}

/// How long a stopped runtime waits for blocking-pool work. Reads on stdin
/// or a device node sit there until the next line arrives and cannot be
/// cancelled.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn build_runtime() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread().enable_all().build()
}

/// Stop the runtime without waiting on a scanner read that will never return
fn shutdown_runtime(runtime: Runtime) {
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = build_runtime().context("starting tokio runtime")?;
    let result = runtime.block_on(serve(args));
    shutdown_runtime(runtime);

    result
}

async fn serve(args: Args) -> anyhow::Result<()> {
    let directory = match &args.members {
        Some(path) => MemoryDirectory::load(path)
            .await
            .with_context(|| format!("loading members from {}", path.display()))?,
        None => MemoryDirectory::new(),
    };

    let config = ServerConfig::with_addr(SocketAddr::new(args.bind, args.port))
        .max_connections(args.max_connections);
    let server = CheckinServer::new(config, directory);

    for (topic, sheet) in args.sheets {
        server.bindings().bind(topic, sheet);
    }

    match args.file {
        Some(path) => {
            let source = ScanSource::open(&path)
                .await
                .with_context(|| format!("opening RFID reader {}", path.display()))?;
            tracing::info!(path = %path.display(), "Reading scans from file");
            server.run(source).await?;
        }
        None => {
            tracing::info!("Reading scans from stdin");
            server.run(ScanSource::stdin()).await?;
        }
    }

    Ok(())
}
