#![cfg(not(tarpaulin_include))]

use dashboard::DashboardConfig;
use dashboard::app;
use std::env;
use std::path::PathBuf;

/// Entry point of the web host
///
/// # Arguments
/// * Optional path to a TOML configuration file; defaults apply without one
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Configuration, bind or serve failure
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args().nth(1).map(PathBuf::from);
    let config = DashboardConfig::load_or_default(config_path.as_deref())?;

    log::info!(
        "starting dashboard web host on {} with data from {}",
        config.server.bind,
        config.data.local_path
    );
    app::run(config).await
}
