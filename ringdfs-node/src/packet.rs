use rkyv::{AlignedVec, Archive, Deserialize, Serialize};

use crate::error::NodeError;
use crate::ring::Node;

/// The largest datagram the membership socket accepts.
pub const MAX_PACKET_SIZE: usize = 64 << 10;

#[repr(u8)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug))]
pub enum PacketKind {
    /// A new node asks the introducer to be admitted.
    Join,
    /// The introducer admits the node and ships the current membership.
    ReplyJoin,
    /// A node has been admitted to the cluster.
    NewNode,
    /// A node has left or has been detected as failed.
    DeleteNode,
    Heartbeat,
    /// Probes a seed during bootstrap.
    Ping,
    Ack,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
/// A single membership datagram.
pub struct Packet {
    pub kind: PacketKind,
    /// The node the packet is about.
    pub node: Node,
    /// The full membership, only set on [PacketKind::ReplyJoin].
    pub snapshot: Option<Vec<Node>>,
}

impl Packet {
    pub fn new(kind: PacketKind, node: Node) -> Self {
        Self {
            kind,
            node,
            snapshot: None,
        }
    }

    pub fn reply_join(introducer: Node, snapshot: Vec<Node>) -> Self {
        Self {
            kind: PacketKind::ReplyJoin,
            node: introducer,
            snapshot: Some(snapshot),
        }
    }

    /// Serializes the packet into a datagram payload.
    pub fn encode(&self) -> Result<AlignedVec, NodeError> {
        rkyv::to_bytes::<_, 4096>(self)
            .map_err(|e| NodeError::InvalidPacket(e.to_string()))
    }

    /// Validates and deserializes a received datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, NodeError> {
        let mut aligned = AlignedVec::with_capacity(buf.len());
        aligned.extend_from_slice(buf);

        rkyv::from_bytes::<Self>(&aligned)
            .map_err(|e| NodeError::InvalidPacket(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u32) -> Node {
        Node::new(id, "127.0.0.1:9000".parse().unwrap(), 9001, "localhost")
    }

    #[test]
    fn test_reply_join_carries_snapshot() {
        let packet = Packet::reply_join(node(1), vec![node(1), node(2), node(3)]);
        let buf = packet.encode().expect("Encode packet");
        let decoded = Packet::decode(&buf).expect("Decode packet");
        assert_eq!(decoded, packet);
        assert_eq!(decoded.snapshot.map(|s| s.len()), Some(3));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let err = Packet::decode(b"definitely not a packet").unwrap_err();
        assert!(matches!(err, NodeError::InvalidPacket(_)));
        assert!(Packet::decode(&[]).is_err());
    }

    #[test]
    fn test_large_snapshot_fits_datagram() {
        let snapshot = (0..200).map(node).collect();
        let packet = Packet::reply_join(node(0), snapshot);
        let buf = packet.encode().unwrap();
        assert!(buf.len() < MAX_PACKET_SIZE);
    }
}
