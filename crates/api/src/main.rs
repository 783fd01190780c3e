use std::env;

use anyhow::Result;
use techai_api::build_app;
use techai_observability::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("techai_api");

    let bind = env::var("TECHAI_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    let app = build_app().await?;

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, "tech-ai support api started");

    axum::serve(listener, app).await?;
    Ok(())
}
