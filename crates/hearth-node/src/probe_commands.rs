use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use hearth_core::HearthConfig;
use hearth_discovery::{
    discover, local_identity, DiscoveredHost, DiscoveryRequest, SweepDiscovery, SystemProber,
};
use hearth_policy::{evaluate, FactsProvider, HostFactsProvider, SystemFacts};
use hearth_trust::{FileTrustStore, TrustStore};
use serde_json::{json, Value};

use crate::cli_args::DiscoverArgs;

pub(crate) async fn run_discover(config: HearthConfig, args: DiscoverArgs) -> Result<()> {
    let node = &config.node;
    std::fs::create_dir_all(&node.data_dir)
        .with_context(|| format!("failed to create {}", node.data_dir.display()))?;
    let identity = local_identity(&node.data_dir, node.preboot_port, node.daemon_port)?;
    let trust = FileTrustStore::for_data_dir(&node.data_dir);

    let report = if args.sweep {
        let snapshot = trust.snapshot()?;
        let client = reqwest::Client::builder()
            .build()
            .context("failed to build sweep http client")?;
        let self_ip = identity
            .ip
            .as_deref()
            .and_then(|ip| ip.parse::<Ipv4Addr>().ok());
        let sweep = SweepDiscovery::new(
            SystemProber::new(client, node.preboot_port),
            snapshot,
            self_ip,
        );
        let found = |host: &DiscoveredHost| host.is_node;
        serde_json::to_value(sweep.run_until(&found).await)
            .context("failed to render sweep report")?
    } else {
        let mut discovery = config.discovery.clone();
        if let Some(timeout_ms) = args.timeout_ms {
            discovery.timeout_ms = timeout_ms;
        }
        let request = DiscoveryRequest::broadcast(&discovery)
            .excluding_self(identity.ip.as_deref(), &identity.node_id);
        let hosts = discover(&request, &trust, None).await;
        discovery_report(&hosts)
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn discovery_report(hosts: &[DiscoveredHost]) -> Value {
    json!({
        "hosts": hosts,
        "count": hosts.len(),
        "scope": "lan",
    })
}

pub(crate) async fn run_verify() -> Result<()> {
    let facts = tokio::task::spawn_blocking(|| HostFactsProvider::default().collect())
        .await
        .context("host fact collection task failed")?;
    println!("{}", serde_json::to_string_pretty(&verify_report(&facts))?);
    Ok(())
}

fn verify_report(facts: &SystemFacts) -> Value {
    json!({
        "facts": facts,
        "policy": evaluate(facts),
    })
}

#[cfg(test)]
mod tests {
    use hearth_policy::{GpuFacts, MemoryFacts};

    use super::*;

    #[test]
    fn unit_verify_report_pairs_facts_with_evaluation() {
        let facts = SystemFacts {
            memory: MemoryFacts {
                total_gb: Some(32.0),
                free_gb: Some(24.0),
                used_pct: Some(25.0),
            },
            gpu: GpuFacts {
                present: true,
                name: Some("test gpu".to_string()),
                vram_total_gb: Some(12.0),
                vram_free_gb: Some(10.0),
                load_pct: Some(5),
            },
            ..SystemFacts::default()
        };
        let report = verify_report(&facts);
        assert_eq!(report["facts"]["gpu"]["name"], "test gpu");
        assert_eq!(report["policy"]["status"], "APPROVED");
    }

    #[test]
    fn unit_empty_facts_are_blocked_by_policy() {
        let report = verify_report(&SystemFacts::default());
        assert_eq!(report["policy"]["status"], "BLOCKED");
    }

    #[test]
    fn unit_discovery_report_counts_hosts() {
        let report = discovery_report(&[]);
        assert_eq!(report["count"], 0);
        assert_eq!(report["scope"], "lan");
    }
}
