use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hearth_core::HearthConfig;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

pub(crate) fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub(crate) fn resolve_project_root(explicit: Option<&Path>) -> Result<PathBuf> {
    let root = match explicit {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().context("failed to resolve current directory")?,
    };
    std::fs::canonicalize(&root)
        .with_context(|| format!("failed to resolve project root {}", root.display()))
}

pub(crate) fn load_config(project_root: &Path, explicit: Option<&Path>) -> Result<HearthConfig> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    HearthConfig::load_layered(project_root, home.as_deref(), explicit)
}

/// An explicit settings file must exist; it is made absolute so a re-launched
/// controller resolves it regardless of working directory.
pub(crate) fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    explicit
        .map(|path| {
            std::fs::canonicalize(path)
                .with_context(|| format!("failed to resolve settings file {}", path.display()))
        })
        .transpose()
}

/// Global flags re-passed to the runtime controller so it resolves the same
/// settings as the preboot process.
pub(crate) fn controller_global_args(project_root: &Path, config: Option<&Path>) -> Vec<String> {
    let mut args = vec![
        "--project-root".to_string(),
        project_root.display().to_string(),
    ];
    if let Some(config) = config {
        args.push("--config".to_string());
        args.push(config.display().to_string());
    }
    args
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
pub(crate) async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
                return;
            }
            Err(error) => tracing::warn!(%error, "failed to install SIGTERM handler"),
        }
    }
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "failed to listen for ctrl-c");
    }
}
