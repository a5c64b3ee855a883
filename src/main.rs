//! Inkwell POS server binary.

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "inkwell-pos", version, about = "Order and payment backend for a print shop")]
struct Cli {
    /// Port to listen on
    #[arg(long, default_value_t = 8080, env = "POS_PORT")]
    port: u16,

    /// Data directory (database, uploads, logs)
    #[arg(long, default_value = "./data", env = "POS_DATA_DIR")]
    data_dir: PathBuf,

    /// Disable the background WhatsApp notification worker
    #[arg(long)]
    no_notifier: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap resolves env-backed defaults
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    inkwell_pos_lib::run(inkwell_pos_lib::Config {
        port: cli.port,
        data_dir: cli.data_dir,
        no_notifier: cli.no_notifier,
    })
    .await
}
