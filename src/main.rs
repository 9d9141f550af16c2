//! collectord - event collection daemon
//!
//! # Usage
//!
//! ```bash
//! collectord --conf /etc/collectord.json
//! COLLECTORD_CONFIG_PATH=/etc/collectord.json collectord --log-level debug
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use collectord::config::{ConfigError, PipelineConfig, CONFIG_PATH_ENV};
use collectord::pipeline::Pipeline;
use collectord::registry::Registry;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long running tasks get to finish after a shutdown signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Event collection daemon
#[derive(Parser, Debug)]
#[command(name = "collectord")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long = "conf", env = CONFIG_PATH_ENV)]
    conf: Option<PathBuf>,

    /// Log level or filter directive (trace, debug, info, warn, error);
    /// `RUST_LOG` takes precedence when set
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let path = args.conf.ok_or(ConfigError::NoLocation)?;
    let config = PipelineConfig::load(&path)?;
    tracing::info!(
        version = collectord::VERSION,
        config = %path.display(),
        "starting collectord"
    );

    let registry = Registry::with_builtins();
    let mut pipeline = Pipeline::build(&config, &registry)?;
    pipeline.start()?;

    let shutdown = pipeline.shutdown_token();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        on_signal.cancel();
    })?;

    shutdown.cancelled().await;
    pipeline.stop(SHUTDOWN_GRACE).await;
    Ok(())
}

/// Initialize the tracing subscriber for logging
fn init_logging(level: &str) -> Result<(), Box<dyn Error + Send + Sync>> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = log_filter(level, env.as_deref())?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// `RUST_LOG` wins over `--log-level`; an unparsable value falls through
/// to the next candidate and finally to `info`
fn log_filter(
    level: &str,
    env: Option<&str>,
) -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    env.filter(|directives| !directives.trim().is_empty())
        .map_or_else(
            || EnvFilter::try_new(level),
            |directives| EnvFilter::try_new(directives).or_else(|_| EnvFilter::try_new(level)),
        )
        .or_else(|_| EnvFilter::try_new("info"))
}
