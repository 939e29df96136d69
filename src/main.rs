//! threadbank server binary.

use threadbank::config::Config;
use threadbank::server::Bank;
use threadbank::shutdown::SystemShutdownSignal;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        desks = config.desks,
        ledger = %config.ledger_path.display(),
        journal = %config.journal_path.display(),
        "Starting threadbank server"
    );

    let bank = Bank::start(&config)?;
    bank.serve_until(&SystemShutdownSignal)?;
    Ok(())
}
