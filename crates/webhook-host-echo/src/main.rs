use clap::Parser;
use webhook_host_echo::{run, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Logging may not be initialised yet when configuration fails.
        eprintln!("webhook-host-echo: {e}");
        std::process::exit(e.exit_code());
    }
}
