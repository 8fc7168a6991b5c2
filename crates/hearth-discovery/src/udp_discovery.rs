use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use hearth_core::short_hex_id;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::datagram::{
    Announcement, DiscoveryDatagram, DISCOVERY_PROTOCOL_VERSION, DISCOVERY_SERVICE,
    MAX_DATAGRAM_BYTES,
};
use crate::identity::NodeIdentity;

/// An announcement plus the address it arrived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedAnnouncement {
    pub sender: SocketAddr,
    pub announcement: Announcement,
}

/// Sends one probe to every target and gathers announcements until `timeout`.
///
/// The announcement `ip` is always the sender address. At most one response
/// per sender ip is kept, in arrival order. Socket failures yield whatever was
/// collected so far.
pub async fn collect_announcements(
    targets: &[SocketAddr],
    timeout: Duration,
    sender_id: Option<String>,
) -> Vec<ReceivedAnnouncement> {
    let socket = match UdpSocket::bind(("0.0.0.0", 0)).await {
        Ok(socket) => socket,
        Err(error) => {
            tracing::warn!(%error, "discovery socket bind failed");
            return Vec::new();
        }
    };
    if let Err(error) = socket.set_broadcast(true) {
        tracing::debug!(%error, "discovery socket broadcast unavailable");
    }

    let nonce = short_hex_id();
    let probe = DiscoveryDatagram::probe(nonce.clone(), sender_id).encode();
    for target in targets {
        if let Err(error) = socket.send_to(&probe, target).await {
            tracing::debug!(%target, %error, "discovery probe send failed");
        }
    }

    let deadline = tokio::time::Instant::now() + timeout;
    let mut seen_ips: HashSet<IpAddr> = HashSet::new();
    let mut received = Vec::new();
    let mut buffer = vec![0_u8; MAX_DATAGRAM_BYTES];
    loop {
        let (len, sender) =
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buffer)).await {
                Err(_) => break,
                Ok(Err(error)) => {
                    tracing::debug!(%error, "discovery receive failed");
                    break;
                }
                Ok(Ok(frame)) => frame,
            };
        let Some(DiscoveryDatagram::Announce(mut announcement)) =
            DiscoveryDatagram::decode(&buffer[..len])
        else {
            continue;
        };
        if announcement
            .nonce
            .as_deref()
            .is_some_and(|value| value != nonce)
        {
            continue;
        }
        if !seen_ips.insert(sender.ip()) {
            continue;
        }
        announcement.ip = Some(sender.ip().to_string());
        received.push(ReceivedAnnouncement {
            sender,
            announcement,
        });
    }
    received
}

/// Background task answering discovery probes with the local identity.
#[derive(Debug)]
pub struct ResponderHandle {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ResponderHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub async fn start_responder(identity: NodeIdentity, bind: SocketAddr) -> Result<ResponderHandle> {
    let socket = UdpSocket::bind(bind)
        .await
        .with_context(|| format!("failed to bind discovery responder on {bind}"))?;
    let local_addr = socket
        .local_addr()
        .context("failed to resolve discovery responder address")?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        run_responder_loop(socket, identity, shutdown_rx).await;
    });
    tracing::info!(%local_addr, "discovery responder started");
    Ok(ResponderHandle {
        local_addr,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_responder_loop(
    socket: UdpSocket,
    identity: NodeIdentity,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut buffer = vec![0_u8; MAX_DATAGRAM_BYTES];
    let mut recv_failures: u32 = 0;
    loop {
        if recv_failures > 0 {
            tokio::select! {
                _ = tokio::time::sleep(recv_error_backoff(recv_failures)) => {}
                _ = &mut shutdown_rx => {
                    tracing::debug!("discovery responder stopped");
                    break;
                }
            }
        }
        tokio::select! {
            received = socket.recv_from(&mut buffer) => {
                let (len, sender) = match received {
                    Ok(frame) => {
                        recv_failures = 0;
                        frame
                    }
                    Err(error) => {
                        recv_failures = recv_failures.saturating_add(1);
                        tracing::debug!(%error, recv_failures, "discovery responder receive failed");
                        continue;
                    }
                };
                let Some(DiscoveryDatagram::Probe { nonce, sender_id, .. }) =
                    DiscoveryDatagram::decode(&buffer[..len])
                else {
                    continue;
                };
                if sender_id.as_deref() == Some(identity.node_id.as_str()) {
                    continue;
                }
                let reply = DiscoveryDatagram::Announce(announcement_for(&identity, nonce)).encode();
                if let Err(error) = socket.send_to(&reply, sender).await {
                    tracing::debug!(%sender, %error, "discovery announce send failed");
                }
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("discovery responder stopped");
                break;
            }
        }
    }
}

/// Delay before the next receive after `failures` consecutive errors.
fn recv_error_backoff(failures: u32) -> Duration {
    const BASE: Duration = Duration::from_millis(10);
    const CAP: Duration = Duration::from_secs(1);
    BASE.saturating_mul(1_u32 << failures.saturating_sub(1).min(7)).min(CAP)
}

fn announcement_for(identity: &NodeIdentity, nonce: String) -> Announcement {
    Announcement {
        service: DISCOVERY_SERVICE.to_string(),
        version: DISCOVERY_PROTOCOL_VERSION,
        nonce: Some(nonce),
        node_id: Some(identity.node_id.clone()),
        hostname: Some(identity.hostname.clone()),
        ip: identity.ip.clone(),
        preboot_port: Some(identity.preboot_port),
        daemon_port: Some(identity.daemon_port),
    }
}
