use std::io;
use std::net::SocketAddr;

use ringdfs_node::NodeId;
use ringdfs_rpc::{ErrorCode, Status};
use ringdfs_sdfs::SdfsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    /// An IO error has occurred while handling the scratch files of a task.
    IO(#[from] io::Error),

    #[error("{0}")]
    Store(#[from] SdfsError),

    #[error("No app is registered under the name {0:?}")]
    UnknownApp(String),

    #[error("No live member is free to take over the tasks of worker {0}")]
    NoFreeWorker(NodeId),

    #[error("Worker {worker} failed to run task {task_id}")]
    TaskFailed { worker: NodeId, task_id: u32 },

    #[error("The job did not complete within the job timeout")]
    Timeout,

    #[error("The job queue of the master is full")]
    QueueFull,

    #[error("The cluster has no live master")]
    NoMaster,

    #[error("Failed to contact {0}: {1}")]
    Rpc(SocketAddr, Status),

    #[error("Worker {0} is no longer a member of the cluster")]
    WorkerGone(NodeId),

    #[error("The job scheduler of this node is shutting down")]
    ShuttingDown,

    #[error("A task panicked: {0}")]
    Panicked(String),
}

impl JobError {
    /// If the error means the remote node could not be reached.
    ///
    /// A node whose scheduler is not running counts as unreachable.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Rpc(_, status) => {
                status.is_unreachable() || status.code == ErrorCode::ServiceUnavailable
            },
            Self::WorkerGone(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors() {
        let addr: SocketAddr = "127.0.0.1:8011".parse().unwrap();

        assert!(JobError::WorkerGone(3).is_transport());
        assert!(JobError::Rpc(addr, Status::timeout()).is_transport());
        assert!(JobError::Rpc(addr, Status::connection("reset")).is_transport());
        assert!(JobError::Rpc(addr, Status::unavailable("shutting down")).is_transport());

        assert!(!JobError::Rpc(addr, Status::internal("boom")).is_transport());
        assert!(!JobError::ShuttingDown.is_transport());
        assert!(!JobError::UnknownApp("grep".to_string()).is_transport());
    }
}
