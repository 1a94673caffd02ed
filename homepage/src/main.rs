use clap::{Args, Parser};
use config::{Config, ConfigError, LoggingConfig, MetricsConfig};
use media_mirror::MirrorError;
use metrics_exporter_statsd::{StatsdBuilder, StatsdError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

#[derive(Parser)]
#[command(name = "homepage", version)]
enum CliCommand {
    /// Serve the cached third-party profile API.
    MediaMirror(ServiceArgs),
}

#[derive(Args)]
struct ServiceArgs {
    #[arg(long)]
    config_file_path: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("config has no `{0}` section")]
    MissingSection(&'static str),
    #[error("could not build statsd recorder: {0}")]
    Statsd(#[from] StatsdError),
    #[error("could not install metrics recorder: {0}")]
    Recorder(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error(transparent)]
    MediaMirror(#[from] MirrorError),
}

fn init_logging(config: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let guard = config.sentry_dsn.as_deref().map(|dsn| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });
    let sentry_layer = guard
        .as_ref()
        .map(|_| sentry::integrations::tracing::layer());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .with(sentry_layer)
        .init();

    guard
}

fn init_metrics(config: &MetricsConfig) -> Result<(), StartupError> {
    let recorder = StatsdBuilder::from(config.statsd_host.as_str(), config.statsd_port)
        .build(Some(&config.prefix))?;
    metrics::set_global_recorder(recorder)
        .map_err(|e| StartupError::Recorder(e.to_string()))?;
    shared::metrics_defs::describe_all(media_mirror::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.statsd_host,
        port = config.statsd_port,
        "statsd metrics enabled"
    );
    Ok(())
}

fn run_media_mirror(args: &ServiceArgs) -> Result<(), StartupError> {
    let config = Config::from_file(&args.config_file_path)?;

    let logging = config.common.logging.unwrap_or_default();
    let _sentry = init_logging(&logging);

    if let Some(metrics) = &config.common.metrics {
        init_metrics(metrics)?;
    }

    let mirror_config = config
        .media_mirror
        .ok_or(StartupError::MissingSection("media_mirror"))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    tracing::info!("starting media mirror");
    runtime.block_on(media_mirror::run(mirror_config))?;
    Ok(())
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    let result = match &cli {
        CliCommand::MediaMirror(args) => run_media_mirror(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be up yet when the config fails to load.
            tracing::error!(error = %e, "media mirror exited");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
