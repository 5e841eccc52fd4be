use clap::Parser;

use suite_core::cli::{Cli, run_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    suite_core::tracing_fmt::init(cli.verbose);

    run_command(cli.command).await
}
