use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the membership system.
pub struct NodeStatistics(Arc<NodeStatisticsInner>);

impl Deref for NodeStatistics {
    type Target = NodeStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct NodeStatisticsInner {
    pub(crate) packets_received: Counter,
    pub(crate) packets_dropped: Counter,
    pub(crate) heartbeats_sent: Counter,
    pub(crate) failures_detected: Counter,
    pub(crate) nodes_joined: Counter,
    pub(crate) nodes_left: Counter,
    pub(crate) num_live_members: Counter,
}

impl NodeStatisticsInner {
    /// The number of membership packets received.
    pub fn packets_received(&self) -> u64 {
        self.packets_received.load(Ordering::Relaxed)
    }

    /// The number of packets dropped because they were invalid or
    /// the workers could not keep up.
    pub fn packets_dropped(&self) -> u64 {
        self.packets_dropped.load(Ordering::Relaxed)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    /// The number of predecessors this node has declared dead.
    pub fn failures_detected(&self) -> u64 {
        self.failures_detected.load(Ordering::Relaxed)
    }

    pub fn nodes_joined(&self) -> u64 {
        self.nodes_joined.load(Ordering::Relaxed)
    }

    pub fn nodes_left(&self) -> u64 {
        self.nodes_left.load(Ordering::Relaxed)
    }

    /// The number of currently alive members the node is aware of.
    pub fn num_live_members(&self) -> u64 {
        self.num_live_members.load(Ordering::Relaxed)
    }

    pub(crate) fn incr(counter: &Counter) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
