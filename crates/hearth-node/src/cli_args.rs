use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "hearth",
    about = "Bootstrap and runtime controller for a Hearth node",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "HEARTH_CONFIG",
        global = true,
        help = "Settings file merged over the user and workspace settings layers."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long = "project-root",
        env = "HEARTH_PROJECT_ROOT",
        global = true,
        help = "Project root used for workspace settings and relative paths. Defaults to the current directory."
    )]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Run the preboot HTTP service and discovery responder.
    Preboot(PrebootArgs),
    /// Start the runtime controller inside a committed runtime directory.
    RuntimeController,
    /// Discover peer nodes on the LAN and print them as JSON.
    Discover(DiscoverArgs),
    /// Collect host facts and print the resource policy evaluation.
    Verify,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PrebootArgs {
    #[arg(long, env = "HEARTH_PREBOOT_PORT", help = "Preboot HTTP port.")]
    pub port: Option<u16>,

    #[arg(long = "bind-host", env = "HEARTH_BIND_HOST", help = "Preboot bind address.")]
    pub bind_host: Option<String>,

    #[arg(
        long = "no-responder",
        help = "Do not answer discovery datagrams from peers."
    )]
    pub no_responder: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct DiscoverArgs {
    #[arg(
        long = "timeout-ms",
        env = "HEARTH_DISCOVERY_TIMEOUT_MS",
        value_parser = parse_positive_u64,
        help = "How long to collect announce responses."
    )]
    pub timeout_ms: Option<u64>,

    #[arg(
        long,
        help = "Use the budgeted subnet sweep instead of the UDP exchange."
    )]
    pub sweep: bool,
}
