mod check_commands;
mod status_commands;

use std::{path::PathBuf, sync::Arc};

use {
    clap::{Parser, Subcommand},
    dirmon_config::{DirmonConfig, loader::ENV_DIR},
    dirmon_monitor::{
        filter::FileFilter,
        processor::{Processor, ProcessorRegistry},
        processor_shell::ShellProcessorConfig,
        service::{DirectoryMonitor, MonitorOptions},
        store_sqlite::SqliteStore,
    },
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "dirmon", version, about = "dirmon: polling directory monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of searching ./ and ~/.config/dirmon/.
    #[arg(long, global = true, env = "DIRMON_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor the configured directory until interrupted (default).
    Run,
    /// Show how many records the store holds per status.
    Status,
    /// Validate the configuration and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` file, or the discovered one, with env overrides.
fn load_config(cli: &Cli) -> anyhow::Result<DirmonConfig> {
    let config = match &cli.config {
        Some(path) => dirmon_config::load_config(path)?,
        None => dirmon_config::discover_and_load(),
    };
    Ok(dirmon_config::apply_env_overrides(config))
}

pub(crate) async fn open_store(config: &DirmonConfig) -> anyhow::Result<SqliteStore> {
    if config.store.database_url.is_none() {
        std::fs::create_dir_all(dirmon_config::data_dir())?;
    }
    Ok(SqliteStore::new(&config.database_url()).await?)
}

fn monitor_options(config: &DirmonConfig) -> anyhow::Result<MonitorOptions> {
    let Some(dir) = &config.monitor.dir else {
        anyhow::bail!("no directory to monitor; set monitor.dir or {ENV_DIR}");
    };
    Ok(MonitorOptions {
        root: dir.clone(),
        filter: FileFilter::new(config.monitor.file_regex())?,
        poll_interval: config.monitor.check_period(),
        stability: config.monitor.stability_period(),
        startup_delay: config.reconcile.startup_delay(),
        retry_interval: config.reconcile.retry_interval(),
        shutdown_grace: config.shutdown_grace(),
    })
}

fn resolve_processor(config: &DirmonConfig) -> Arc<dyn Processor> {
    let shell = config
        .processor
        .command
        .clone()
        .filter(|c| !c.is_empty())
        .map(|command| ShellProcessorConfig {
            command,
            timeout: config.processor.timeout(),
        });
    ProcessorRegistry::with_builtins(shell).resolve(&config.processor.id)
}

async fn run(config: DirmonConfig) -> anyhow::Result<()> {
    let options = monitor_options(&config)?;
    let processor = resolve_processor(&config);
    let store = Arc::new(open_store(&config).await?);

    let monitor = DirectoryMonitor::start(options, store, processor).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    monitor.stop().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => {
            info!(version = env!("CARGO_PKG_VERSION"), "dirmon starting");
            run(load_config(&cli)?).await
        },
        Some(Commands::Status) => status_commands::handle_status(&load_config(&cli)?).await,
        Some(Commands::Check { verbose }) => check_commands::check(cli.config.as_deref(), verbose),
    }
}
