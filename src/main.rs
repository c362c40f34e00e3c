// float_cmp: only in tests where assert_eq! on f64 is intentional.
#![cfg_attr(test, allow(clippy::float_cmp))]

use anyhow::Result;
use rmcp::ServiceExt;
use tracing_subscriber::{self, EnvFilter};

use backtest_optimizer_mcp::{config::AppConfig, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load a local .env if present; silently ignored if absent, since all
    // configuration also has environment-variable defaults.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env();
    tracing::info!(events_dir = %config.events_dir.display(), "loaded configuration");

    if let Ok(port) = std::env::var("PORT") {
        // HTTP mode — used by cloud platforms that front the process with a proxy.
        let app = server::http_router(config.events_dir);

        let addr = format!("0.0.0.0:{port}");
        tracing::info!("Starting backtest-optimizer-mcp HTTP server on {addr}");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await?;
    } else {
        // stdio mode — used for local development with an MCP-speaking agent client.
        tracing::info!("Starting backtest-optimizer-mcp MCP server (stdio)");

        let server = server::EventStoreServer::new(config.events_dir);
        let service = server.serve(rmcp::transport::stdio()).await?;
        service.waiting().await?;
    }

    Ok(())
}
