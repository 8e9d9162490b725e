//! Standalone DH Support bridge serving a superflat demo world

#![expect(
    unused_crate_dependencies,
    reason = "the library pulls in the rest of the stack"
)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use anyhow::Context as _;
use clap::Parser;
use dhs_server::BridgeServer;
use dhs_server::config::BridgeConfig;
use dhs_server::config::config_file::ConfigFile;
use dhs_server::world::WorldDataProvider;
use dhs_server::world::builder::LodBuilder;
use dhs_server::world::flat::FlatColumns;
use log::LevelFilter;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (ip:port), overrides the configuration
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Seconds between statistics log lines, 0 disables them
    #[arg(long, default_value_t = 60)]
    stats_interval: u64,

    /// Verbosity level (up to -vvv)
    #[arg(short, long, default_value_t = 0, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // tokio::main makes rust-analyzer fragile,
    // so put the code in a separate place.
    real_main().await
}

async fn real_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let mut config = match &args.config {
        Some(path) => {
            let file = ConfigFile::load(path)?;
            BridgeConfig::from_config(file.config())
                .with_context(|| format!("invalid configuration in {}", path.display()))?
        }
        None => BridgeConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    // -vv and up also dump frames
    config.frame_verbosity = config
        .frame_verbosity
        .max(args.verbose.saturating_sub(1));

    let now = SystemTime::now().duration_since(UNIX_EPOCH)?;
    let timestamp = i64::try_from(now.as_secs())?;
    let provider: Arc<dyn WorldDataProvider> =
        Arc::new(LodBuilder::new(FlatColumns::demo(timestamp)));

    let bind = config.bind;
    let mut server = BridgeServer::new(config, provider)?;
    server.start().await?;
    info!("listening on {bind}");

    let stats = server.stats();
    let reporter = (args.stats_interval > 0).then(|| {
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // the first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                info!("{}", stats.snapshot());
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    server.stop();
    info!("final statistics: {}", server.stats().snapshot());
    Ok(())
}
