use clap::Parser;

use ot_prometheus::{Cli, run_server};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run_server(cli).await {
        eprintln!("Failed to start server: {:#}", e);
        std::process::exit(1);
    }
}
