mod bootstrap_helpers;
mod cli_args;
mod preboot_command;
mod probe_commands;
mod runtime_command;

use anyhow::Result;
use clap::Parser;

use crate::bootstrap_helpers::{
    controller_global_args, init_tracing, load_config, resolve_config_path, resolve_project_root,
};
use crate::cli_args::{Cli, CliCommand};
use crate::preboot_command::run_preboot;
use crate::probe_commands::{run_discover, run_verify};
use crate::runtime_command::run_runtime_controller;

async fn run_cli(cli: Cli) -> Result<()> {
    let project_root = resolve_project_root(cli.project_root.as_deref())?;
    let config_path = resolve_config_path(cli.config.as_deref())?;
    let config = load_config(&project_root, config_path.as_deref())?;
    match cli.command {
        CliCommand::Preboot(args) => {
            let controller_args = controller_global_args(&project_root, config_path.as_deref());
            run_preboot(config, args, controller_args).await
        }
        CliCommand::RuntimeController => run_runtime_controller(config).await,
        CliCommand::Discover(args) => run_discover(config, args).await,
        CliCommand::Verify => run_verify().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run_cli(cli).await
}
