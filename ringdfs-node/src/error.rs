use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::NodeId;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    /// An IO error has occurred,
    IO(#[from] io::Error),

    #[error("Failed to send a ping to any of the seed nodes: {0:?}")]
    /// None of the seeds could be reached at the transport level.
    SeedsUnreachable(Vec<String>),

    #[error("The introducer {0} did not answer the join request in time")]
    JoinTimeout(SocketAddr),

    #[error("Node id {id} is already used within the cluster, the least free id is {least_free:?}")]
    /// The node collides with an existing member and must pick another id.
    DuplicateId {
        id: NodeId,
        least_free: Option<NodeId>,
    },

    #[error("{0}")]
    Ring(#[from] RingError),

    #[error("Invalid membership packet: {0}")]
    InvalidPacket(String),

    #[error("Failed to initialised ring extension: {0}")]
    Extension(anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    #[error("Node id {0} already exists within the ring")]
    DuplicateId(NodeId),

    #[error("Node id {0} does not exist within the ring")]
    NotFound(NodeId),

    #[error("Node id {id} is outside of the ring capacity {capacity}")]
    OutOfRange { id: NodeId, capacity: u32 },
}
