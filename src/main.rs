//! Examdesk - exam-prep quiz backend

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use examdesk::{
    config::Args,
    db::MongoClient,
    logging::UsageLogger,
    server::{self, AppState, Stores, Upstreams},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("examdesk={},info", log_level).into()),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Examdesk - quiz generation backend");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.redacted_mongodb_uri(), args.mongodb_db);
    info!("Generator: {}", args.generator_url);
    info!("Catalog: {}", args.catalog_url);
    info!("======================================");

    // MongoDB is optional in dev mode; without it every store is in memory
    let mongo = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => Some(client),
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, continuing in memory): {}", e);
                None
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let stores = match &mongo {
        Some(client) => Stores::mongo(client).await?,
        None => Stores::in_memory(),
    };

    let usage = UsageLogger::new();
    if let Some(path) = &args.usage_log_path {
        if let Err(e) = usage.init_file(path.clone()).await {
            warn!("Usage log disabled, cannot open {}: {}", path.display(), e);
        }
    }

    let upstreams = Upstreams::from_args(&args);
    let state = Arc::new(AppState::new(
        args,
        mongo.clone(),
        stores,
        upstreams,
        usage,
    )?);

    server::run(state).await?;

    if let Some(client) = mongo {
        client.shutdown().await;
    }
    Ok(())
}
