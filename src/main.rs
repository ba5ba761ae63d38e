use clap::Parser;
use steadydns::cli::{self, Cli};
use steadydns::config::{setup_logging, ConfigFile};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = ConfigFile::try_from(cli.config.as_ref()).unwrap_or_default();
    let _logger = setup_logging(&config, false);

    if let Err(err) = cli::run(cli).await {
        cli::report_error(&err);
        std::process::exit(1);
    }
}
