//! Command-line entry point: serve a service definition's functions locally.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use localdev_engine::{LocalDevServer, ServerOptions, ServiceConfig};
use tokio::net::TcpListener;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "localdev", version, about = "Run event-triggered functions locally")]
struct Cli {
    /// Service definition (YAML, or JSON by extension).
    #[arg(short, long, default_value = "serverless.yml")]
    config: PathBuf,

    /// Port to listen on. Overrides `custom.localDevPort`.
    #[arg(short, long, env = "LOCALDEV_PORT")]
    port: Option<u16>,

    /// Extra environment for every handler, as KEY=VALUE. Repeatable.
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Answer cross-origin preflight on every route.
    #[arg(long)]
    cors: bool,

    /// Run a consumer loop for every sqs trigger. Requires the `sqs` feature.
    #[arg(long)]
    poll_queues: bool,

    /// Fire schedule triggers on their own cadence.
    #[arg(long)]
    auto_fire_schedules: bool,

    /// Folder served read-only at /static, relative to the service directory.
    #[arg(long)]
    static_folder: Option<PathBuf>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("localdev=info,localdev_engine=info,tower_http=info")
        }))
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();

    let service = ServiceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let service_dir = match cli.config.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let mut options = ServerOptions::from_service(&service, &service_dir);
    if let Some(port) = cli.port {
        options.port = port;
    }
    options.cors |= cli.cors;
    options.poll_queues |= cli.poll_queues;
    options.auto_fire_schedules |= cli.auto_fire_schedules;
    if let Some(folder) = &cli.static_folder {
        options.static_folder = Some(service_dir.join(folder));
    }
    options.environment.extend(cli.env.iter().cloned());

    if let Some(name) = service.service_name() {
        tracing::info!(service = %name, "starting local server");
    }

    #[cfg(feature = "sqs")]
    let queue_client = localdev_engine::SqsQueueClient::from_profile(
        service.provider.profile.as_deref(),
        service.provider.region.as_deref(),
    )
    .await;

    let port = options.port;
    let builder = LocalDevServer::builder()
        .service(service)
        .service_dir(&service_dir)
        .options(options);
    #[cfg(feature = "sqs")]
    let builder = builder.queue_client(queue_client);
    let server = builder.build()?;
    if server.records().is_empty() {
        tracing::warn!(config = %cli.config.display(), "no functions with compatible triggers found");
        return Ok(());
    }

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;

    server.serve(listener, shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("received ctrl-c, stopping");
}
