//! Process entry point: load configuration, open the store, run the
//! coordinator until `Ctrl-C`.
use magnetico::config::{Config, DEFAULT_CONFIG_PATH};
use magnetico::error::StartupError;
use magnetico::store::Store;
use magnetico::{coordinator, logging};

#[tokio::main]
async fn main() {
    logging::init();

    if let Err(source) = run().await {
        tracing::error!(%source, "magnetico failed to start");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), StartupError> {
    let config_path = std::env::var("MAGNETICO_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load(&config_path)?;

    tracing::info!(database_path = %config.database_path, "starting magnetico");

    let store = Store::open(&config.database_path)?;

    coordinator::run(&store, &config, shutdown_signal()).await;

    tracing::info!("magnetico stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
