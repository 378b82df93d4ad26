use std::io;
use std::net::SocketAddr;

use ringdfs_rpc::Status;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdfsError {
    #[error("{0}")]
    /// An IO error has occurred while accessing the local store.
    IO(#[from] io::Error),

    #[error("Invalid file name {0:?}, names must be relative paths without `.` or `..` components")]
    InvalidName(String),

    #[error("File {0:?} does not exist")]
    NotFound(String),

    #[error("The cluster has no live members to place files on")]
    NoReplicas,

    #[error("Only {acks} of the required {required} replicas acknowledged the operation")]
    /// The operation did not reach the required quorum before the timeout.
    Quorum { acks: usize, required: usize },

    #[error("Failed to contact {0}: {1}")]
    Rpc(SocketAddr, Status),
}
