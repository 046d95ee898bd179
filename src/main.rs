use anyhow::Result;
use clap::Parser;
use semindex::cli::{self, Cli};
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON on stdout stays parseable
    let default_filter = if cli.verbose {
        "semindex=debug"
    } else if cli.quiet {
        "semindex=warn"
    } else {
        "semindex=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    debug!("Starting semindex v{}", env!("CARGO_PKG_VERSION"));

    cli::run(cli).await
}
