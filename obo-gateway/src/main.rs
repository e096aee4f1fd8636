//! OBO Gateway Binary
//!
//! HTTP server that runs tools on behalf of the authenticated caller.

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Result;
use obo_auth::{JwksKeyResolver, JwtTokenValidator, OboExchanger};
use obo_gateway::{routes, tools, GatewayConfig, ToolOrchestrator};
use std::sync::Arc;
use tracing::{info, warn};

/// Main entry point
#[actix_web::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting OBO Gateway...");

    // Load configuration
    let config = Arc::new(GatewayConfig::load()?);
    info!(
        tenant = %config.provider.tenant_id,
        client = %config.provider.client_id,
        jwks_uri = %config.provider.jwks_uri(),
        "Configuration loaded"
    );

    if config.provider.client_secret.is_none() {
        warn!("No client secret configured; every tool call will fail delegation");
    }

    // Signing keys
    let keys = JwksKeyResolver::from_config(&config.provider)?;
    match keys.warm_up().await {
        Ok(count) => info!(count, "Signing keys loaded"),
        Err(e) => warn!(error = %e, "Signing keys unavailable at startup; will retry on first request"),
    }

    // Initialize services
    let validator = JwtTokenValidator::from_config(Arc::new(keys), &config.provider)?;
    let exchanger = OboExchanger::from_config(&config.provider)?;

    let orchestrator = ToolOrchestrator::builder(
        Arc::new(validator),
        Arc::new(exchanger),
        config.provider.requirements(),
    )
    .http_client(config.downstream_client()?)
    .operations(tools::default_operations(&config))
    .build();

    for op in orchestrator.operations() {
        info!(tool = %op.name, scopes = ?op.scopes, "Tool registered");
    }

    let orchestrator = web::Data::new(orchestrator);

    // Start HTTP server
    let bind_addr = config.bind_addr();
    info!("Starting server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(orchestrator.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
