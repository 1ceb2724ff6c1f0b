//! PDF Template MCP Server - Entry point
//!
//! Serves `list_pdf_fields` and `set_pdf_fields` over stdio.

use pdf_template_mcp::{run_server_with_config, ServerConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pdf_template_mcp=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting PDF Template MCP Server");

    let config = ServerConfig::from_env()?;
    run_server_with_config(config).await
}
