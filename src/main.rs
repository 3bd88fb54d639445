mod engine;
mod entities;
mod errors;
mod settings;
mod storage;
mod web;

use clap::Parser;
use migration::MigratorTrait;
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "palisade", version, about = "Access decision engine")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage (database) and apply migrations, including the idempotent
    // permission-catalog seed
    let db = storage::init(&settings.database).await?;
    migration::Migrator::up(&db, None).await.into_diagnostic()?;

    // build the decision engine and warm its snapshots
    let engine = engine::DecisionEngine::new();
    engine.warm(&db).await?;

    // start web server
    web::serve(settings, db, engine).await?;
    Ok(())
}
