use clap::Parser;
use tracing_subscriber::EnvFilter;
use triekv::cli::Command;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let cmd = Command::parse();

    // Execute command
    triekv::cli::execute_command(cmd)?;

    Ok(())
}
