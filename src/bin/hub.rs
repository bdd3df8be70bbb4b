use clap::Parser;
use health_sentinel::{
    config::read_config_file,
    monitor::Monitor,
    probes::ProbeRegistry,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,

    /// Log level for the sentinel's own targets
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,

    /// Do not start the snapshot API
    #[arg(long)]
    no_api: bool,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("health_sentinel", level),
        ("sentinel_hub", level),
        ("health_sentinel::notifications", LevelFilter::INFO.max(level)),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.log_level);
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;
    let config = config.resolve(&ProbeRegistry::new())?;

    let monitor = Monitor::start(config)?;

    #[cfg(feature = "api")]
    if !args.no_api {
        use health_sentinel::api::{ApiConfig, ApiState, spawn_api_server};
        use health_sentinel::util::{get_api_addr, get_api_token};

        let api_config = ApiConfig {
            bind_addr: get_api_addr(),
            auth_token: get_api_token(),
            ..ApiConfig::default()
        };
        spawn_api_server(api_config, ApiState::new(monitor.clone())).await?;
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }

    info!("shutting down");
    monitor.shutdown().await
}
