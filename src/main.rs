use anyhow::{Context, Result};
use clap::Parser;
use orchestrator::audit::AuditLog;
use orchestrator::config::ConfigLoader;
use orchestrator::http;
use orchestrator::logging::{LogConfig, LoggerImpl};
use orchestrator::metrics::Metrics;
use orchestrator::orchestrator::Orchestrator;
use orchestrator::registry::ServerRegistry;

use orchestrator::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => run_validate(),
        Commands::Run => run_daemon().await,
        Commands::Status { url } => run_status(&url).await,
    }
}

fn run_validate() -> Result<()> {
    let config = ConfigLoader::load().context("configuration is invalid")?;
    println!(
        "configuration OK: {} server(s) declared, {} enabled",
        config.servers.len(),
        config.servers.values().filter(|s| s.enabled).count()
    );
    Ok(())
}

async fn run_daemon() -> Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;

    let log_config = LogConfig::from(&config.observability);
    let _logger = LoggerImpl::init(&log_config).context("failed to initialize logger")?;

    let audit_path = config
        .observability
        .log_dir
        .as_ref()
        .map_or_else(|| "audit.log".to_string(), |dir| format!("{dir}/audit.log"));
    let audit = AuditLog::open(&audit_path).await.context("failed to open audit log")?;
    let metrics = Metrics::new().context("failed to initialize metrics")?;

    let registry = ServerRegistry::from_config(&config);
    let mut orchestrator = Orchestrator::new(registry, audit, metrics, config.network.outbound_allowlist.clone());
    orchestrator.start();

    let app = http::router(orchestrator.handle());
    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP control surface on {addr}"))?;

    tracing::info!(%addr, "http control surface listening");

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!(error = %e, "http server exited with error");
            }
        }
        () = wait_for_shutdown_signal() => {
            tracing::info!("shutdown signal received");
        }
    }

    orchestrator.stop().await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

async fn run_status(base_url: &str) -> Result<()> {
    let client = reqwest::Client::new();
    let url = format!("{base_url}/servers");
    let body: serde_json::Value = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach orchestrator at {url}"))?
        .json()
        .await
        .context("failed to parse orchestrator response")?;

    let mut table = comfy_table::Table::new();
    table.set_header(vec!["server", "state", "pid", "uptime_s", "restarts"]);

    if let Some(servers) = body.get("servers").and_then(|v| v.as_array()) {
        for server in servers {
            table.add_row(vec![
                server.get("name").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
                server.get("state").and_then(|v| v.as_str()).unwrap_or("?").to_string(),
                server
                    .get("pid")
                    .and_then(serde_json::Value::as_u64)
                    .map_or_else(|| "-".to_string(), |v| v.to_string()),
                server
                    .get("uptime_seconds")
                    .and_then(serde_json::Value::as_u64)
                    .map_or_else(|| "-".to_string(), |v| v.to_string()),
                server
                    .get("restart_count")
                    .and_then(serde_json::Value::as_u64)
                    .map_or_else(|| "-".to_string(), |v| v.to_string()),
            ]);
        }
    }

    println!("{table}");
    Ok(())
}
