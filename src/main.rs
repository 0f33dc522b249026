use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use weread_pacer::config::{Config, LoggingConfig, StartupMode};
use weread_pacer::scheduler::{install_signal_handler, Application};

#[derive(Parser)]
#[command(
    name = "weread-pacer",
    version,
    about = "Paced reading-progress reporter for WeRead",
    long_about = None
)]
struct Cli {
    /// Startup mode (immediate, scheduled, daemon); overrides the config file
    #[arg(short, long)]
    mode: Option<StartupMode>,

    /// Configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            setup_tracing(&LoggingConfig::default(), cli.verbose)?;
            tracing::error!(path = %cli.config.display(), error = %e, "Invalid configuration");
            return Err(e).context("failed to load configuration");
        }
    };
    if let Some(mode) = cli.mode {
        config.app.startup_mode = mode;
    }

    setup_tracing(&config.logging, cli.verbose)?;
    tracing::info!("\n{}", config.startup_summary());

    let app = Application::new(config);
    install_signal_handler(app.shutdown(), app.cancellation_policy());

    app.run().await.context("reading run failed")?;

    tracing::info!("weread-pacer finished");
    Ok(())
}

fn setup_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let directive = if verbose {
        String::from("weread_pacer=debug,info")
    } else {
        format!("weread_pacer={level},warn", level = logging.level)
    };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&directive))
        .with_context(|| format!("invalid log level `{}`", logging.level))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    match logging.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        "pretty" => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
    }
    .context("failed to install tracing subscriber")?;

    Ok(())
}
