use clap::Parser;
use drawdown::api::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = drawdown::api::run(Cli::parse()).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}
