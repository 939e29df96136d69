//! Interactive client: forwards stdin lines to a desk and prints replies.

use clap::Parser;
use std::io::{self, BufRead, Write};
use threadbank::client::BankClient;
use threadbank::protocol::{Response, READY};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for the bank client
#[derive(Parser, Debug)]
#[command(name = "bank-client")]
#[command(version = "0.1.0")]
#[command(about = "Talk to a threadbank server", long_about = None)]
struct ClientArgs {
    /// Dispatcher address
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    connect: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ClientArgs::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let mut client = BankClient::connect(args.connect.as_str())?;
    let quit = Response::Quit.to_string();

    let mut out = io::stdout().lock();
    writeln!(out, "{READY}")?;
    out.flush()?;

    for line in io::stdin().lock().lines() {
        let line = line?;
        let reply = client.send(&line)?;
        writeln!(out, "{reply}")?;
        out.flush()?;

        if reply == quit {
            break;
        }
    }

    Ok(())
}
