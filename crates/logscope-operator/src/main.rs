//! LoggingScope operator - keeps logging sidecars converged with their scopes

mod controller_runner;

use std::time::Duration;

use clap::Parser;
use kube::{Client, CustomResourceExt};

use logscope_common::config::{ScopeDefaults, DEFAULT_FLUENTD_IMAGE_ENV};
use logscope_common::crd::LoggingScope;
use logscope_common::telemetry::{init_telemetry, TelemetryConfig};
use logscope_engine::controller::DEFAULT_REQUEUE;

/// LoggingScope operator - injects and removes log collector sidecars
#[derive(Parser, Debug)]
#[command(name = "logscope-operator", version, about, long_about = None)]
struct Cli {
    /// Print the LoggingScope CRD manifest and exit
    #[arg(long)]
    crd: bool,

    /// Seconds before a failed or partially removed scope is retried
    #[arg(long, env = "LOGSCOPE_REQUEUE_SECS", default_value_t = DEFAULT_REQUEUE.as_secs())]
    requeue_secs: u64,

    /// Do not install the LoggingScope CRD on startup
    #[arg(long)]
    skip_crd_install: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&LoggingScope::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    // kube's TLS stack needs a process-wide crypto provider
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install the rustls crypto provider");
    }

    init_telemetry(TelemetryConfig::default())?;

    let client = Client::try_default().await?;
    if !cli.skip_crd_install {
        controller_runner::ensure_crd_installed(&client).await?;
    }

    let defaults = ScopeDefaults::default();
    tracing::info!(
        fluentd_image = %defaults.fluentd_image,
        elasticsearch_url = %defaults.elastic_search_url,
        secret = %defaults.secret_name,
        "starting LoggingScope controller"
    );
    if !defaults.has_fluentd_image() {
        tracing::warn!(
            env = DEFAULT_FLUENTD_IMAGE_ENV,
            "no default fluentd image configured; scopes without an image will be rejected"
        );
    }

    controller_runner::run(client, defaults, Duration::from_secs(cli.requeue_secs)).await;

    tracing::info!("LoggingScope controller stopped");
    Ok(())
}
