use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

use mbtool::cli::{self, MbtoolCli};

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    // default to info level logging, override with MBTOOL_LOG env var
    let filter = EnvFilter::try_from_env("MBTOOL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let fmtlyr = fmt::layer().with_filter(filter);
    let subscriber = Registry::default().with(tracing_error::ErrorLayer::default()).with(fmtlyr);
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let cli = MbtoolCli::parse();
    cli::run(cli)
}
