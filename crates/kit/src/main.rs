use clap::{Parser, Subcommand};
use color_eyre::{Report, Result};

mod arp;
mod dhcpd;
mod error;
mod hostexec;
mod run_vm;
mod ssh;
mod variant;
mod vm;

/// Run a CI workload inside an ephemeral xhyve VM.
///
/// xvk boots a BSD guest from a raw disk image, discovers its IP
/// address on the host ARP table, waits for its SSH service to come
/// up, runs commands inside the guest, and shuts it down from the
/// inside. Disk images, boot loaders, and SSH keys are provisioned by
/// the surrounding CI job.
#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available xvk commands.
#[derive(Subcommand)]
enum Commands {
    /// Boot the VM, run commands over SSH, then shut it down
    Run(run_vm::RunOpts),

    /// Print the MAC address the launcher assigns to the VM and exit
    Mac(run_vm::MacOpts),
}

/// Install and configure the tracing/logging system.
///
/// Structured logging with environment-based filtering, error layer
/// integration, and stderr output. Filtered by the RUST_LOG
/// environment variable, defaulting to 'info'.
fn install_tracing() {
    use tracing_error::ErrorLayer;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let fmt_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let filter_layer = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .with(ErrorLayer::default())
        .init();
}

fn main() -> Result<(), Report> {
    install_tracing();
    color_eyre::install()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(opts) => run_vm::run(opts),
        Commands::Mac(opts) => run_vm::mac(opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_structure() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
