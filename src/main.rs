//! `boltd`: a Bolt server backed by the in-memory database.

use std::path::PathBuf;
use std::sync::Arc;

use bolt_server::server::{BoltServer, InMemoryDatabase, ServerConfig, ServerError};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bolt protocol server")]
struct Args {
    /// TOML config file
    #[arg(long, env = "BOLTD_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(long)]
    listen: Option<String>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) -> Result<(), Error> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| ServerError::InvalidConfig(format!("Invalid log level: {e}")))?,
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_toml_file(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config = config.with_listen_address(listen);
    }

    let auth = config.authentication();
    let database = Arc::new(InMemoryDatabase::new([config.default_database.as_str(), "system"]));
    let server = BoltServer::bind(config, auth, database).await?;

    let result = server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("ctrl-c received"),
                Err(e) => {
                    error!(error = %e, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await
                }
            }
        })
        .await;
    if let Err(e) = &result {
        error!(error = %e, "server failed");
    }
    Ok(result?)
}
