use clap::Parser;
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "enrolsync", about = "Form-system to registry enrolment bridge")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, short, value_name = "FILE", default_value = "enrolsync.yml")]
    config: std::path::PathBuf,
}

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Failed to load config from {}: {err}", cli.config.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Keep the guard alive for the lifetime of the process.
    let _sentry_guard = config
        .logging
        .as_ref()
        .and_then(|logging| logging.sentry_dsn.as_deref())
        .map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ))
        });

    if let Some(metrics_config) = &config.metrics {
        let recorder = StatsdBuilder::from(
            metrics_config.statsd_host.as_str(),
            metrics_config.statsd_port,
        )
        .build(Some("enrolsync"));
        match recorder {
            Ok(recorder) => {
                if let Err(err) = metrics::set_global_recorder(recorder) {
                    tracing::warn!(error = %err, "Could not install metrics recorder");
                }
            }
            Err(err) => tracing::warn!(error = %err, "Could not set up statsd exporter"),
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start runtime: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        listener = %format!("{}:{}", config.service.listener.host, config.service.listener.port),
        projects = config.service.projects.len(),
        "Starting enrolsync"
    );

    if let Err(err) = runtime.block_on(engine::run(config.service)) {
        tracing::error!(error = %err, "Service exited with error");
        std::process::exit(1);
    }
}
