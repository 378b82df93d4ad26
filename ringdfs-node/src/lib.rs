//! # ringdfs node
//! The membership layer of a ringdfs cluster.
//!
//! Every node keeps a [MembershipRing] of the live members ordered by id.
//! Nodes join through an introducer found among the seeds, push heartbeats to
//! their successors and watch their predecessors, a predecessor which stays
//! silent is removed cluster wide. Every applied change is published as a
//! [MembershipChange] which [RingExtension]s like the file store build on.
#[macro_use]
extern crate tracing;

mod clock;
mod error;
mod extension;
mod hashing;
mod membership;
mod packet;
mod ring;
mod rpc;
mod statistics;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use clock::{timestamp_millis, Clock};
pub use error::{NodeError, RingError};
pub use extension::RingExtension;
pub use hashing::{hash_id, in_circle_range, in_ownership_range, RING_CAPACITY};
pub use membership::MembershipConfig;
pub use packet::{Packet, PacketKind};
pub use ring::{MembershipRing, Node, NodeId};
use ringdfs_rpc::{RpcService, Server};
pub use rpc::network::RpcNetwork;
pub use rpc::{GetMembers, MembersReply, MembershipService};
pub use statistics::NodeStatistics;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::membership::Membership;

/// Build a ring node using provided settings.
pub struct RingNodeBuilder {
    node_id: Option<NodeId>,
    connection_cfg: ConnectionConfig,
    membership_cfg: MembershipConfig,
}

impl RingNodeBuilder {
    /// Create a new node builder.
    pub fn new(connection_cfg: ConnectionConfig) -> Self {
        Self {
            node_id: None,
            connection_cfg,
            membership_cfg: MembershipConfig::default(),
        }
    }

    /// Overrides the ring position of the node.
    ///
    /// By default the id is the hash of the public gossip address.
    pub fn with_node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// Set the timings of the membership protocol.
    pub fn with_membership_config(mut self, config: MembershipConfig) -> Self {
        self.membership_cfg = config;
        self
    }

    /// Starts the node and joins the cluster reachable through the seeds.
    ///
    /// If none of the seeds answer the node starts a new cluster of its own,
    /// start-up only fails when no seed could be contacted at all, when the
    /// introducer never admits the node or when the node id is already taken.
    pub async fn connect(self) -> Result<RingNode, NodeError> {
        let cfg = self.connection_cfg;
        let node_id = self
            .node_id
            .unwrap_or_else(|| Node::default_id(cfg.gossip_public_addr));
        let me = Node::new(
            node_id,
            cfg.gossip_public_addr,
            cfg.rpc_public_addr.port(),
            cfg.hostname.clone(),
        );

        let statistics = NodeStatistics::default();
        let network = RpcNetwork::default();

        let rpc_server = Server::listen(cfg.rpc_listen_addr).await?;
        let (membership, replies) = Membership::start(
            me.clone(),
            cfg.gossip_listen_addr,
            self.membership_cfg,
            network.clone(),
            statistics.clone(),
        )
        .await?;

        rpc_server.add_service(MembershipService::new(membership.ring().clone()));

        if let Err(e) = membership.bootstrap(&cfg.seed_nodes, replies).await {
            membership.shutdown();
            return Err(e);
        }

        info!(
            node_id = me.id,
            gossip_addr = %cfg.gossip_listen_addr,
            rpc_addr = %cfg.rpc_listen_addr,
            num_members = membership.ring().size(),
            "Ring node connected."
        );

        Ok(RingNode {
            me,
            membership,
            rpc_server,
            network,
            statistics,
            clock: Clock::default(),
        })
    }
}

#[derive(Debug, Clone)]
/// Configuration for the cluster network.
pub struct ConnectionConfig {
    /// The binding address of the UDP membership socket.
    pub gossip_listen_addr: SocketAddr,

    /// The membership address to be broadcast to other cluster members.
    pub gossip_public_addr: SocketAddr,

    /// The binding address for the RPC server to bind and listen on.
    ///
    /// This is often `0.0.0.0` + your chosen port.
    pub rpc_listen_addr: SocketAddr,

    /// The public address of the RPC server.
    ///
    /// Only the port is broadcast, peers reach the RPC server on the
    /// IP of the gossip address.
    pub rpc_public_addr: SocketAddr,

    pub hostname: String,

    /// The membership addresses of nodes which may introduce this node
    /// to an existing cluster.
    pub seed_nodes: Vec<String>,
}

impl ConnectionConfig {
    /// Creates a new connection config where the listen and public addresses match.
    pub fn new(
        gossip_addr: SocketAddr,
        rpc_addr: SocketAddr,
        seeds: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        Self {
            gossip_listen_addr: gossip_addr,
            gossip_public_addr: gossip_addr,
            rpc_listen_addr: rpc_addr,
            rpc_public_addr: rpc_addr,
            hostname: gossip_addr.ip().to_string(),
            seed_nodes: seeds
                .into_iter()
                .map(|seed| seed.as_ref().to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// A change applied to the ring.
pub struct MembershipChange {
    pub joined: Vec<Node>,
    pub left: Vec<Node>,
}

/// A live member of the cluster.
///
/// Dropping the node stops it without telling the rest of the cluster,
/// which then detects it as failed. Use [RingNode::leave] to leave cleanly.
pub struct RingNode {
    me: Node,
    membership: Arc<Membership>,
    rpc_server: Server,
    network: RpcNetwork,
    statistics: NodeStatistics,
    clock: Clock,
}

impl std::fmt::Debug for RingNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingNode")
            .field("me", &self.me)
            .finish_non_exhaustive()
    }
}

impl RingNode {
    /// Leaves the cluster, telling every other member.
    pub async fn leave(self) {
        self.membership.leave().await;
    }

    /// Add a RPC service to the existing RPC system.
    pub fn add_rpc_service<Svc>(&self, service: Svc)
    where
        Svc: RpcService + Send + Sync + 'static,
    {
        self.rpc_server.add_service(service);
    }

    /// Adds an extension to the node, returning whatever the extension produces.
    pub async fn add_extension<E>(&self, extension: E) -> Result<E::Output, E::Error>
    where
        E: RingExtension,
    {
        extension.init_extension(self).await
    }

    #[inline]
    /// Return the description of the node itself.
    pub fn me(&self) -> &Node {
        &self.me
    }

    #[inline]
    /// The node's live view of the ring.
    pub fn ring(&self) -> &Arc<MembershipRing> {
        self.membership.ring()
    }

    #[inline]
    /// Gets the live membership statistics.
    pub fn statistics(&self) -> NodeStatistics {
        self.statistics.clone()
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[inline]
    /// Get access to the current RPC network.
    pub fn network(&self) -> &RpcNetwork {
        &self.network
    }

    /// Subscribes to every change applied to the ring from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.membership.change_feed().subscribe()
    }

    /// Get a stream of membership changes.
    pub fn membership_changes(&self) -> BroadcastStream<MembershipChange> {
        BroadcastStream::new(self.subscribe())
    }

    /// Waits until the ring holds `num_members` nodes.
    ///
    /// Returns `false` if the timeout elapsed first.
    pub async fn wait_for_members(&self, num_members: usize, timeout: Duration) -> bool {
        wait_for_members(self.ring(), num_members, timeout).await
    }

    /// Creates a cheap handle to the node which can be moved into tasks.
    pub fn handle(&self) -> RingHandle {
        RingHandle {
            me: self.me.clone(),
            ring: self.ring().clone(),
            network: self.network.clone(),
            statistics: self.statistics.clone(),
            clock: self.clock.clone(),
            changes: self.membership.change_feed(),
        }
    }
}

impl Drop for RingNode {
    fn drop(&mut self) {
        self.membership.shutdown();
        self.rpc_server.shutdown();
    }
}

#[derive(Clone)]
/// A handle to the core functionality of a [RingNode].
pub struct RingHandle {
    me: Node,
    ring: Arc<MembershipRing>,
    network: RpcNetwork,
    statistics: NodeStatistics,
    clock: Clock,
    changes: broadcast::Sender<MembershipChange>,
}

impl RingHandle {
    #[inline]
    /// Return the description of the node itself.
    pub fn me(&self) -> &Node {
        &self.me
    }

    #[inline]
    pub fn ring(&self) -> &Arc<MembershipRing> {
        &self.ring
    }

    #[inline]
    /// Get access to the current RPC network.
    pub fn network(&self) -> &RpcNetwork {
        &self.network
    }

    #[inline]
    pub fn statistics(&self) -> NodeStatistics {
        self.statistics.clone()
    }

    #[inline]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Subscribes to every change applied to the ring from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipChange> {
        self.changes.subscribe()
    }
}

async fn wait_for_members(
    ring: &MembershipRing,
    num_members: usize,
    timeout: Duration,
) -> bool {
    let poll = async {
        while ring.size() != num_members {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    };

    tokio::time::timeout(timeout, poll).await.is_ok()
}
