use anyhow::Context;
use conveyor_orchestrator::{api, config::Config, db::Database, engine};
use conveyor_orchestrator::engine::local::{DirectorySource, LocalChangeSetEngine, LocalCredentialIssuer, ShellCommandRunner};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_orchestrator=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Conveyor Orchestrator...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    tracing::info!(
        account = %config.account,
        region = %config.region,
        branch = %config.source_branch,
        "Configuration loaded"
    );

    let collaborators = engine::Collaborators::new(
        Arc::new(DirectorySource::new(config.source_dir.clone())),
        Arc::new(ShellCommandRunner::new(Default::default())),
        Arc::new(LocalCredentialIssuer::new(
            config.account.clone(),
            config.allowed_role_tags.clone(),
        )),
        Arc::new(LocalChangeSetEngine::new()),
    );

    let addr = config.bind_addr.clone();
    let engine = engine::Engine::new(Database::new(), config, collaborators);

    // Build router with all API endpoints
    let app = api::create_router(engine);

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
