use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use hearth_core::{HearthConfig, LaunchContext, LogRotationPolicy};
use hearth_discovery::{local_identity, start_responder};
use hearth_policy::{FactsProvider, HostFactsProvider};
use hearth_preboot::{
    create_launch_dir_in, run_preboot_server, CommitProtocol, PrebootLock, PrebootServerConfig,
    PrebootServerState, ProcessControllerLauncher,
};
use hearth_trust::{FileTrustStore, TrustStore};

use crate::bootstrap_helpers::shutdown_signal;
use crate::cli_args::PrebootArgs;

pub(crate) fn preboot_bind_addr(
    config: &HearthConfig,
    args: &PrebootArgs,
) -> Result<SocketAddr> {
    let host = args.bind_host.as_deref().unwrap_or(&config.node.bind_host);
    let port = args.port.unwrap_or(config.node.preboot_port);
    format!("{host}:{port}")
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid preboot bind address {host}:{port}"))
}

pub(crate) async fn run_preboot(
    config: HearthConfig,
    args: PrebootArgs,
    controller_args: Vec<String>,
) -> Result<()> {
    let node = &config.node;
    let _lock = PrebootLock::acquire(&node.preboot_lock_path)
        .with_context(|| format!("failed to acquire {}", node.preboot_lock_path.display()))?;

    let (launch_dir, launch_id) = create_launch_dir_in(&node.launches_dir)?;
    tracing::info!(launch_dir = %launch_dir.display(), %launch_id, "launch directory created");
    let launch = LaunchContext::for_preboot(launch_dir, launch_id);

    let bind = preboot_bind_addr(&config, &args)?;
    std::fs::create_dir_all(&node.data_dir)
        .with_context(|| format!("failed to create {}", node.data_dir.display()))?;
    let identity = local_identity(&node.data_dir, bind.port(), node.daemon_port)?;

    let mut responder = None;
    if config.discovery.responder_enabled && !args.no_responder {
        let responder_bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.discovery.port));
        match start_responder(identity.clone(), responder_bind).await {
            Ok(handle) => responder = Some(handle),
            Err(error) => {
                tracing::warn!(%error, "discovery responder unavailable; peers cannot find this node")
            }
        }
    }

    let launcher = Arc::new(ProcessControllerLauncher::current_exe(controller_args)?);
    let trust: Arc<dyn TrustStore> = Arc::new(FileTrustStore::for_data_dir(&node.data_dir));
    let facts: Arc<dyn FactsProvider> = Arc::new(HostFactsProvider::default());
    let server_config = PrebootServerConfig {
        bind,
        identity,
        discovery: config.discovery.clone(),
        daemon_port: node.daemon_port,
    };
    let state = Arc::new(PrebootServerState::new(
        server_config,
        launch,
        CommitProtocol::new(launcher).with_log_policy(LogRotationPolicy::from_env()),
        trust,
        facts,
    )?);

    let result = run_preboot_server(state, shutdown_signal()).await;
    if let Some(mut responder) = responder {
        responder.shutdown().await;
    }
    result
}
