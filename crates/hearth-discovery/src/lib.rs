//! Peer discovery for Hearth nodes on the local network.
//!
//! The primary path is a UDP announce/response exchange ([`discover`]); the
//! deadline-budgeted subnet sweep in [`sweep_discovery`] is an alternate
//! backend for networks where no responder is running.

pub mod datagram;
pub mod identity;
pub mod peer_discovery;
pub mod probes;
pub mod sweep_discovery;
pub mod udp_discovery;

pub use datagram::{Announcement, DiscoveryDatagram};
pub use identity::{local_identity, NodeIdentity};
pub use peer_discovery::*;
pub use probes::{probe_remote_target, trusted_hosts_online, OnlineHost};
pub use sweep_discovery::{
    HostProber, SweepBudget, SweepDiscovery, SweepPhase, SweepReport, SystemProber,
};
pub use udp_discovery::{collect_announcements, start_responder, ReceivedAnnouncement, ResponderHandle};
