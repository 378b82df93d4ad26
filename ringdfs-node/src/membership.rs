use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flume::TrySendError;
use parking_lot::Mutex;
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};

use crate::clock::timestamp_millis;
use crate::error::{NodeError, RingError};
use crate::packet::{Packet, PacketKind, MAX_PACKET_SIZE};
use crate::ring::{MembershipRing, Node, NodeId};
use crate::rpc::network::RpcNetwork;
use crate::statistics::{NodeStatistics, NodeStatisticsInner};
use crate::MembershipChange;

const PACKET_QUEUE_CAPACITY: usize = 1024;
const REPLY_QUEUE_CAPACITY: usize = 32;
const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
/// Timing and sizing of the membership protocol.
pub struct MembershipConfig {
    /// How often heartbeats are pushed to the successors.
    pub heartbeat_interval: Duration,
    /// How long a predecessor may stay silent before it is declared dead.
    pub failure_timeout: Duration,
    /// The number of successors each node heartbeats, and so the number of
    /// predecessors each node watches.
    pub num_monitors: usize,
    /// How long to wait for any seed to answer a ping.
    pub introducer_timeout: Duration,
    /// How long to wait for the introducer to admit the node.
    pub join_timeout: Duration,
    /// The number of tasks processing inbound packets.
    pub packet_workers: usize,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(1500),
            failure_timeout: Duration::from_secs(4),
            num_monitors: 3,
            introducer_timeout: Duration::from_millis(500),
            join_timeout: Duration::from_secs(1),
            packet_workers: 4,
        }
    }
}

struct Monitor {
    resets: flume::Sender<()>,
    handle: JoinHandle<()>,
}

enum Readmit {
    /// The node restarted, holds the entry it replaced.
    Restarted(Node),
    /// A repeated join or announcement of the known process.
    Retried,
    /// Another node already uses the id.
    Conflict,
}

/// The live membership protocol of a single node.
pub(crate) struct Membership {
    me: Node,
    ring: Arc<MembershipRing>,
    socket: UdpSocket,
    config: MembershipConfig,
    network: RpcNetwork,
    statistics: NodeStatistics,
    changes: broadcast::Sender<MembershipChange>,
    replies: flume::Sender<(Packet, SocketAddr)>,
    monitors: Mutex<BTreeMap<NodeId, Monitor>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    kill_switch: AtomicBool,
}

impl Membership {
    /// Binds the membership socket and starts processing packets.
    ///
    /// The node is not part of any ring until [Membership::bootstrap] completes.
    pub(crate) async fn start(
        me: Node,
        listen_addr: SocketAddr,
        config: MembershipConfig,
        network: RpcNetwork,
        statistics: NodeStatistics,
    ) -> Result<(Arc<Self>, flume::Receiver<(Packet, SocketAddr)>), NodeError> {
        let socket = UdpSocket::bind(listen_addr).await?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        let (replies, replies_rx) = flume::bounded(REPLY_QUEUE_CAPACITY);

        let membership = Arc::new(Self {
            ring: Arc::new(MembershipRing::new(me.id)),
            me,
            socket,
            config,
            network,
            statistics,
            changes,
            replies,
            monitors: Mutex::new(BTreeMap::new()),
            tasks: Mutex::new(Vec::new()),
            kill_switch: AtomicBool::new(false),
        });

        let (tx, rx) = flume::bounded(PACKET_QUEUE_CAPACITY);
        let mut handles = vec![tokio::spawn(run_receiver(membership.clone(), tx))];
        for _ in 0..membership.config.packet_workers.max(1) {
            handles.push(tokio::spawn(run_packet_worker(membership.clone(), rx.clone())));
        }
        membership.tasks.lock().extend(handles);

        Ok((membership, replies_rx))
    }

    #[inline]
    pub(crate) fn ring(&self) -> &Arc<MembershipRing> {
        &self.ring
    }

    pub(crate) fn change_feed(&self) -> broadcast::Sender<MembershipChange> {
        self.changes.clone()
    }

    /// Finds an introducer among the seeds and joins its cluster.
    ///
    /// Without any reachable introducer the node forms a new, single member ring.
    pub(crate) async fn bootstrap(
        self: &Arc<Self>,
        seeds: &[String],
        replies: flume::Receiver<(Packet, SocketAddr)>,
    ) -> Result<(), NodeError> {
        self.insert_self()?;

        match self.find_introducer(seeds, &replies).await? {
            None => {
                info!(
                    node_id = self.me.id,
                    addr = %self.me.gossip_addr(),
                    "No introducer found, starting a new cluster."
                );
            },
            Some(introducer) => self.join(introducer, &replies).await?,
        }

        let handle = tokio::spawn(run_heartbeats(self.clone()));
        self.tasks.lock().push(handle);
        self.refresh_monitors();

        Ok(())
    }

    fn insert_self(&self) -> Result<(), NodeError> {
        match self.ring.insert_node(self.me.clone()) {
            Ok(()) | Err(RingError::DuplicateId(_)) => {},
            Err(e) => return Err(e.into()),
        }

        self.statistics
            .num_live_members
            .store(self.ring.size() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn find_introducer(
        &self,
        seeds: &[String],
        replies: &flume::Receiver<(Packet, SocketAddr)>,
    ) -> Result<Option<SocketAddr>, NodeError> {
        let ping = Packet::new(PacketKind::Ping, self.me.clone()).encode()?;

        let mut attempted = 0;
        let mut sent = 0;
        for seed in seeds {
            let addrs: Vec<SocketAddr> = match lookup_host(seed.as_str()).await {
                Ok(addrs) => addrs.filter(|addr| !self.is_self_addr(*addr)).collect(),
                Err(e) => {
                    attempted += 1;
                    warn!(seed = %seed, error = ?e, "Failed to resolve seed address.");
                    Vec::new()
                },
            };

            for addr in addrs {
                attempted += 1;
                match self.socket.send_to(&ping, addr).await {
                    Ok(_) => sent += 1,
                    Err(e) => warn!(seed = %addr, error = ?e, "Failed to ping seed."),
                }
            }
        }

        if attempted == 0 {
            return Ok(None);
        }

        if sent == 0 {
            return Err(NodeError::SeedsUnreachable(seeds.to_vec()));
        }

        let deadline = Instant::now() + self.config.introducer_timeout;
        loop {
            match timeout_at(deadline, replies.recv_async()).await {
                Ok(Ok((packet, from))) if packet.kind == PacketKind::Ack => {
                    debug!(introducer = %from, "Seed acknowledged ping.");
                    return Ok(Some(from));
                },
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => return Ok(None),
            }
        }
    }

    async fn join(
        &self,
        introducer: SocketAddr,
        replies: &flume::Receiver<(Packet, SocketAddr)>,
    ) -> Result<(), NodeError> {
        let join = Packet::new(PacketKind::Join, self.me.clone()).encode()?;
        self.socket.send_to(&join, introducer).await?;

        let deadline = Instant::now() + self.config.join_timeout;
        loop {
            match timeout_at(deadline, replies.recv_async()).await {
                Ok(Ok((packet, _))) if packet.kind == PacketKind::ReplyJoin => {
                    let snapshot = packet.snapshot.unwrap_or_default();
                    return self.apply_snapshot(snapshot);
                },
                Ok(Ok(_)) => continue,
                Ok(Err(_)) | Err(_) => return Err(NodeError::JoinTimeout(introducer)),
            }
        }
    }

    fn apply_snapshot(&self, snapshot: Vec<Node>) -> Result<(), NodeError> {
        let collision = snapshot.iter().any(|node| {
            node.id == self.me.id && node.gossip_addr() != self.me.gossip_addr()
        });
        if collision {
            let used = snapshot.iter().map(|node| node.id).collect::<BTreeSet<_>>();
            let least_free = (0..self.ring.capacity()).find(|id| !used.contains(id));
            return Err(NodeError::DuplicateId {
                id: self.me.id,
                least_free,
            });
        }

        let mut joined = Vec::new();
        for node in snapshot {
            if node.id == self.me.id {
                continue;
            }

            if self.ring.insert_node(node.clone()).is_ok() {
                joined.push(node);
            }
        }

        info!(
            node_id = self.me.id,
            num_members = self.ring.size(),
            "Joined the cluster."
        );
        self.emit_change(joined, Vec::new());
        Ok(())
    }

    /// Removes this node from the ring and tells every other member.
    pub(crate) async fn leave(&self) {
        let targets = self.other_members();
        let _ = self.ring.delete_node(self.me.id);

        info!(node_id = self.me.id, num_targets = targets.len(), "Leaving the cluster.");
        let packet = Packet::new(PacketKind::DeleteNode, self.me.clone());
        self.send_to_all(&packet, targets.iter().map(Node::gossip_addr))
            .await;

        self.shutdown();
    }

    /// Stops every background task of the node.
    pub(crate) fn shutdown(&self) {
        if self.kill_switch.swap(true, Ordering::Relaxed) {
            return;
        }

        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }

        let monitors = std::mem::take(&mut *self.monitors.lock());
        for monitor in monitors.into_values() {
            monitor.handle.abort();
        }
    }

    #[inline]
    fn is_killed(&self) -> bool {
        self.kill_switch.load(Ordering::Relaxed)
    }

    fn is_self_addr(&self, addr: SocketAddr) -> bool {
        addr == self.me.gossip_addr()
            || self
                .socket
                .local_addr()
                .map(|local| local == addr)
                .unwrap_or(false)
    }

    fn other_members(&self) -> Vec<Node> {
        self.ring
            .members()
            .into_iter()
            .filter(|node| node.id != self.me.id)
            .collect()
    }

    async fn handle_packet(self: &Arc<Self>, packet: Packet, from: SocketAddr) {
        trace!(kind = ?packet.kind, node_id = packet.node.id, from = %from, "Handling packet.");

        match packet.kind {
            PacketKind::Ping => {
                if self.is_self_addr(from) || self.is_self_addr(packet.node.gossip_addr()) {
                    return;
                }

                let ack = Packet::new(PacketKind::Ack, self.me.clone());
                self.send_to(&ack, from).await;
            },
            PacketKind::Ack | PacketKind::ReplyJoin => {
                if let Err(TrySendError::Full(_)) = self.replies.try_send((packet, from)) {
                    debug!(from = %from, "Discarding unexpected bootstrap reply.");
                }
            },
            PacketKind::Join => self.on_join(packet.node).await,
            PacketKind::NewNode => self.on_new_node(packet.node),
            PacketKind::DeleteNode => self.on_delete_node(packet.node),
            PacketKind::Heartbeat => self.on_heartbeat(packet.node),
        }
    }

    async fn on_join(self: &Arc<Self>, joiner: Node) {
        let mut replaced = None;
        let admitted = match self.ring.insert_node(joiner.clone()) {
            Ok(()) => true,
            Err(RingError::DuplicateId(id)) => match self.readmit(&joiner) {
                Readmit::Restarted(old) => {
                    replaced = Some(old);
                    true
                },
                Readmit::Retried => false,
                Readmit::Conflict => {
                    error!(
                        node_id = id,
                        joiner_addr = %joiner.gossip_addr(),
                        least_free_id = ?self.ring.find_least_free_id(),
                        "Rejecting join, node id is already in use."
                    );
                    false
                },
            },
            Err(e) => {
                error!(error = %e, joiner_addr = %joiner.gossip_addr(), "Rejecting join.");
                false
            },
        };

        let reply = Packet::reply_join(self.me.clone(), self.ring.members());
        self.send_to(&reply, joiner.gossip_addr()).await;

        if !admitted {
            return;
        }

        info!(
            node_id = joiner.id,
            addr = %joiner.gossip_addr(),
            restarted = replaced.is_some(),
            "Introduced new node to the cluster."
        );

        let targets = self
            .other_members()
            .into_iter()
            .filter(|node| node.id != joiner.id)
            .map(|node| node.gossip_addr())
            .collect::<Vec<_>>();
        let announcement = Packet::new(PacketKind::NewNode, joiner.clone());
        self.send_to_all(&announcement, targets).await;

        self.emit_change(vec![joiner], replaced.into_iter().collect());
        self.refresh_monitors();
    }

    fn on_new_node(self: &Arc<Self>, node: Node) {
        match self.ring.insert_node(node.clone()) {
            Ok(()) => {
                info!(
                    node_id = node.id,
                    addr = %node.gossip_addr(),
                    "Node has joined the cluster."
                );
                self.emit_change(vec![node], Vec::new());
                self.refresh_monitors();
            },
            Err(RingError::DuplicateId(id)) => match self.readmit(&node) {
                Readmit::Restarted(old) => {
                    info!(
                        node_id = node.id,
                        addr = %node.gossip_addr(),
                        "Node has restarted and rejoined the cluster."
                    );
                    self.emit_change(vec![node], vec![old]);
                    self.refresh_monitors();
                },
                Readmit::Retried => {},
                Readmit::Conflict => {
                    error!(
                        node_id = id,
                        addr = %node.gossip_addr(),
                        "Ignoring new node with a conflicting id."
                    );
                },
            },
            Err(e) => warn!(error = %e, "Ignoring new node."),
        }
    }

    /// Decides what a join for an id which is already a member means.
    ///
    /// The same address with a new start time is a node which restarted
    /// before it was detected as failed, its entry is replaced.
    fn readmit(&self, node: &Node) -> Readmit {
        let Some(existing) = self.ring.get_node(node.id) else {
            return Readmit::Conflict;
        };

        if existing.gossip_addr() != node.gossip_addr() {
            return Readmit::Conflict;
        }

        if existing.join_time >= node.join_time {
            return Readmit::Retried;
        }

        let Ok(old) = self.ring.delete_node(node.id) else {
            return Readmit::Conflict;
        };
        if let Err(e) = self.ring.insert_node(node.clone()) {
            error!(error = %e, node_id = node.id, "Failed to readmit restarted node.");
            return Readmit::Conflict;
        }

        // Connections to the previous process are dead.
        self.network.disconnect(old.rpc_addr());
        Readmit::Restarted(old)
    }

    fn on_delete_node(self: &Arc<Self>, node: Node) {
        if node.id == self.me.id {
            warn!(node_id = node.id, "Cluster has declared this node as dead, ignoring.");
            return;
        }

        if let Ok(removed) = self.ring.delete_node(node.id) {
            info!(
                node_id = removed.id,
                addr = %removed.gossip_addr(),
                "Node has left the cluster."
            );
            self.network.disconnect(removed.rpc_addr());
            self.emit_change(Vec::new(), vec![removed]);
            self.refresh_monitors();
        }
    }

    fn on_heartbeat(&self, node: Node) {
        if !self.ring.update_heartbeat(node.id, timestamp_millis()) {
            trace!(node_id = node.id, "Heartbeat from unknown node.");
            return;
        }

        if let Some(monitor) = self.monitors.lock().get(&node.id) {
            let _ = monitor.resets.try_send(());
        }
    }

    /// Called by a monitor whose predecessor stayed silent for too long.
    async fn on_failure(self: &Arc<Self>, target: Node) {
        self.monitors.lock().remove(&target.id);

        let Ok(removed) = self.ring.delete_node(target.id) else {
            return;
        };

        warn!(
            node_id = removed.id,
            addr = %removed.gossip_addr(),
            timeout = ?self.config.failure_timeout,
            "Node has failed, removing from the cluster."
        );
        NodeStatisticsInner::incr(&self.statistics.failures_detected);

        let targets = self
            .other_members()
            .into_iter()
            .map(|node| node.gossip_addr())
            .collect::<Vec<_>>();
        let packet = Packet::new(PacketKind::DeleteNode, removed.clone());
        self.send_to_all(&packet, targets).await;

        self.network.disconnect(removed.rpc_addr());
        self.emit_change(Vec::new(), vec![removed]);
        self.refresh_monitors();
    }

    /// Re-evaluates which predecessors this node watches.
    ///
    /// Monitors are started for new predecessors and cancelled for nodes
    /// which are no longer one.
    fn refresh_monitors(self: &Arc<Self>) {
        if self.is_killed() {
            return;
        }

        let desired = self
            .ring
            .get_prev_k_nodes(self.me.id, self.config.num_monitors);
        let desired_ids = desired.iter().map(|node| node.id).collect::<BTreeSet<_>>();

        let mut monitors = self.monitors.lock();
        monitors.retain(|id, monitor| {
            let keep = desired_ids.contains(id);
            if !keep {
                debug!(node_id = *id, "Stopping monitor.");
                monitor.handle.abort();
            }
            keep
        });

        for node in desired {
            if monitors.contains_key(&node.id) {
                continue;
            }

            debug!(node_id = node.id, "Starting monitor.");
            let (resets, rx) = flume::bounded(1);
            let handle = tokio::spawn(run_monitor(self.clone(), node.clone(), rx));
            monitors.insert(node.id, Monitor { resets, handle });
        }
    }

    fn emit_change(&self, joined: Vec<Node>, left: Vec<Node>) {
        for _ in &joined {
            NodeStatisticsInner::incr(&self.statistics.nodes_joined);
        }
        for _ in &left {
            NodeStatisticsInner::incr(&self.statistics.nodes_left);
        }
        self.statistics
            .num_live_members
            .store(self.ring.size() as u64, Ordering::Relaxed);

        if joined.is_empty() && left.is_empty() {
            return;
        }

        // No subscribers is fine.
        let _ = self.changes.send(MembershipChange { joined, left });
    }

    async fn send_to(&self, packet: &Packet, addr: SocketAddr) {
        self.send_to_all(packet, [addr]).await
    }

    async fn send_to_all(
        &self,
        packet: &Packet,
        targets: impl IntoIterator<Item = SocketAddr>,
    ) {
        let buffer = match packet.encode() {
            Ok(buffer) => buffer,
            Err(e) => {
                error!(error = %e, kind = ?packet.kind, "Failed to encode packet.");
                return;
            },
        };

        for addr in targets {
            if let Err(e) = self.socket.send_to(&buffer, addr).await {
                warn!(error = ?e, target = %addr, kind = ?packet.kind, "Failed to send packet.");
            }
        }
    }
}

async fn run_receiver(
    membership: Arc<Membership>,
    tx: flume::Sender<(Packet, SocketAddr)>,
) {
    let mut buffer = vec![0u8; MAX_PACKET_SIZE];

    while !membership.is_killed() {
        let (len, from) = match membership.socket.recv_from(&mut buffer).await {
            Ok(received) => received,
            Err(e) => {
                debug!(error = ?e, "Failed to receive packet.");
                continue;
            },
        };
        NodeStatisticsInner::incr(&membership.statistics.packets_received);

        let packet = match Packet::decode(&buffer[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, from = %from, "Dropping invalid packet.");
                NodeStatisticsInner::incr(&membership.statistics.packets_dropped);
                continue;
            },
        };

        if let Err(TrySendError::Full(_)) = tx.try_send((packet, from)) {
            warn!(from = %from, "Packet workers are saturated, dropping packet.");
            NodeStatisticsInner::incr(&membership.statistics.packets_dropped);
        }
    }
}

async fn run_packet_worker(
    membership: Arc<Membership>,
    rx: flume::Receiver<(Packet, SocketAddr)>,
) {
    while let Ok((packet, from)) = rx.recv_async().await {
        if membership.is_killed() {
            break;
        }

        membership.handle_packet(packet, from).await;
    }
}

async fn run_heartbeats(membership: Arc<Membership>) {
    let mut interval = tokio::time::interval(membership.config.heartbeat_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if membership.is_killed() {
            break;
        }

        let targets = membership
            .ring
            .get_next_k_nodes(membership.me.id, membership.config.num_monitors);
        if targets.is_empty() {
            continue;
        }

        let mut me = membership.me.clone();
        me.heartbeat_t = timestamp_millis();
        let packet = Packet::new(PacketKind::Heartbeat, me);
        membership
            .send_to_all(&packet, targets.iter().map(Node::gossip_addr))
            .await;

        for _ in &targets {
            NodeStatisticsInner::incr(&membership.statistics.heartbeats_sent);
        }
    }
}

async fn run_monitor(membership: Arc<Membership>, target: Node, resets: flume::Receiver<()>) {
    loop {
        match timeout(membership.config.failure_timeout, resets.recv_async()).await {
            Ok(Ok(())) => continue,
            // The monitor has been cancelled.
            Ok(Err(_)) => return,
            Err(_) => break,
        }
    }

    if membership.is_killed() {
        return;
    }

    membership.on_failure(target).await;
}
