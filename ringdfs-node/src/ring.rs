use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use parking_lot::Mutex;
use rkyv::{Archive, Deserialize, Serialize};

use crate::clock::timestamp_millis;
use crate::error::RingError;
use crate::hashing::{hash_id, in_ownership_range, RING_CAPACITY};

pub type NodeId = u32;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
/// A single member of the cluster.
pub struct Node {
    /// The position of the node on the ring.
    pub id: NodeId,
    /// The public IP of the node.
    pub ip: IpAddr,
    /// The UDP port used for membership packets.
    pub port: u16,
    /// The port the RPC server is reachable on.
    pub rpc_port: u16,
    pub hostname: String,
    /// The last time a heartbeat was observed from this node, in milliseconds.
    pub heartbeat_t: u64,
    /// When the node started, in milliseconds.
    pub join_time: u64,
}

impl Node {
    /// Creates a new node description with its timestamps set to now.
    pub fn new(
        id: NodeId,
        gossip_addr: SocketAddr,
        rpc_port: u16,
        hostname: impl Into<String>,
    ) -> Self {
        let now = timestamp_millis();
        Self {
            id,
            ip: gossip_addr.ip(),
            port: gossip_addr.port(),
            rpc_port,
            hostname: hostname.into(),
            heartbeat_t: now,
            join_time: now,
        }
    }

    /// The default id of a node published on the given address.
    pub fn default_id(gossip_addr: SocketAddr) -> NodeId {
        hash_id(&gossip_addr.to_string())
    }

    #[inline]
    /// The address membership packets are sent to.
    pub fn gossip_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    #[inline]
    /// The address of the node's RPC server.
    pub fn rpc_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.rpc_port)
    }
}

#[derive(Debug, Clone)]
struct RingEntry {
    node: Node,
    prev: NodeId,
    next: NodeId,
}

/// The ordered ring of live cluster members.
///
/// Every member is linked to its predecessor and successor by id, ring order
/// follows numeric id order and wraps at the capacity. All operations take
/// the single internal lock and copy out what they return.
pub struct MembershipRing {
    self_id: NodeId,
    capacity: u32,
    entries: Mutex<BTreeMap<NodeId, RingEntry>>,
}

impl MembershipRing {
    /// Creates a new, empty ring for the given node.
    pub fn new(self_id: NodeId) -> Self {
        Self::with_capacity(self_id, RING_CAPACITY)
    }

    pub fn with_capacity(self_id: NodeId, capacity: u32) -> Self {
        Self {
            self_id,
            capacity,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The number of live members.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    /// Links a new node between its ring predecessor and successor.
    ///
    /// An existing node is never replaced.
    pub fn insert_node(&self, node: Node) -> Result<(), RingError> {
        let id = node.id;
        if id >= self.capacity {
            return Err(RingError::OutOfRange {
                id,
                capacity: self.capacity,
            });
        }

        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(RingError::DuplicateId(id));
        }

        let successor = entries
            .range(id..)
            .next()
            .or_else(|| entries.iter().next())
            .map(|(successor, entry)| (*successor, entry.prev));

        match successor {
            None => {
                entries.insert(
                    id,
                    RingEntry {
                        node,
                        prev: id,
                        next: id,
                    },
                );
            },
            Some((next, prev)) => {
                entries.insert(id, RingEntry { node, prev, next });
                if let Some(entry) = entries.get_mut(&prev) {
                    entry.next = id;
                }
                if let Some(entry) = entries.get_mut(&next) {
                    entry.prev = id;
                }
            },
        }

        Ok(())
    }

    /// Unlinks a node from the ring, returning its last known state.
    pub fn delete_node(&self, id: NodeId) -> Result<Node, RingError> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(&id).ok_or(RingError::NotFound(id))?;

        if removed.next != id {
            if let Some(entry) = entries.get_mut(&removed.prev) {
                entry.next = removed.next;
            }
            if let Some(entry) = entries.get_mut(&removed.next) {
                entry.prev = removed.prev;
            }
        }

        Ok(removed.node)
    }

    pub fn get_node(&self, id: NodeId) -> Option<Node> {
        self.entries.lock().get(&id).map(|entry| entry.node.clone())
    }

    /// Walks up to `k` successors of `id`, stopping if the walk returns to `id`.
    pub fn get_next_k_nodes(&self, id: NodeId, k: usize) -> Vec<Node> {
        let entries = self.entries.lock();
        walk(&entries, id, k, |entry| entry.next)
    }

    /// Walks up to `k` predecessors of `id`, stopping if the walk returns to `id`.
    pub fn get_prev_k_nodes(&self, id: NodeId, k: usize) -> Vec<Node> {
        let entries = self.entries.lock();
        walk(&entries, id, k, |entry| entry.prev)
    }

    /// Records a heartbeat for the node, returns `false` if the node is unknown.
    pub fn update_heartbeat(&self, id: NodeId, timestamp: u64) -> bool {
        match self.entries.lock().get_mut(&id) {
            Some(entry) => {
                entry.node.heartbeat_t = timestamp;
                true
            },
            None => false,
        }
    }

    /// Returns the `k` predecessors of `id` whose last heartbeat is older than `deadline`.
    pub fn get_time_out_nodes(&self, deadline: u64, id: NodeId, k: usize) -> Vec<Node> {
        self.get_prev_k_nodes(id, k)
            .into_iter()
            .filter(|node| node.heartbeat_t < deadline)
            .collect()
    }

    /// The smallest id not currently used, if the ring is not full.
    pub fn find_least_free_id(&self) -> Option<NodeId> {
        let entries = self.entries.lock();
        (0..self.capacity).find(|id| !entries.contains_key(id))
    }

    /// The node which owns the given ring position.
    ///
    /// That is the first node clockwise from `hash`, inclusive.
    pub fn master_of_hash(&self, hash: NodeId) -> Option<NodeId> {
        let entries = self.entries.lock();
        entries
            .range(hash..)
            .next()
            .or_else(|| entries.iter().next())
            .map(|(id, _)| *id)
    }

    /// The master node of the given file name.
    pub fn get_master_id(&self, name: &str) -> Option<NodeId> {
        self.master_of_hash(hash_id(name))
    }

    /// The master of `name` followed by its next `k - 1` successors.
    pub fn replica_set(&self, name: &str, k: usize) -> Vec<Node> {
        let entries = self.entries.lock();
        let hash = hash_id(name);
        let master = entries
            .range(hash..)
            .next()
            .or_else(|| entries.iter().next());

        let Some((&master_id, entry)) = master else {
            return Vec::new();
        };

        if k == 0 {
            return Vec::new();
        }

        let mut replicas = vec![entry.node.clone()];
        replicas.extend(walk(&entries, master_id, k - 1, |entry| entry.next));
        replicas
    }

    /// Returns if `hash` falls within the range owned by `id`.
    pub fn owns_hash(&self, id: NodeId, hash: NodeId) -> bool {
        let entries = self.entries.lock();
        match entries.get(&id) {
            Some(entry) => in_ownership_range(hash, entry.prev, id),
            None => false,
        }
    }

    /// The lowest id currently in the ring.
    pub fn smallest_id(&self) -> Option<NodeId> {
        self.entries.lock().keys().next().copied()
    }

    /// All members in id order.
    pub fn members(&self) -> Vec<Node> {
        self.entries
            .lock()
            .values()
            .map(|entry| entry.node.clone())
            .collect()
    }

    /// The `(prev, next)` ids of the node.
    pub fn neighbours(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        self.entries
            .lock()
            .get(&id)
            .map(|entry| (entry.prev, entry.next))
    }
}

fn walk(
    entries: &BTreeMap<NodeId, RingEntry>,
    start: NodeId,
    k: usize,
    step: impl Fn(&RingEntry) -> NodeId,
) -> Vec<Node> {
    let mut nodes = Vec::new();
    let Some(mut current) = entries.get(&start).map(&step) else {
        return nodes;
    };

    while nodes.len() < k && current != start {
        let Some(entry) = entries.get(&current) else {
            break;
        };
        nodes.push(entry.node.clone());
        current = step(entry);
    }

    nodes
}
