//! # ringdfs sdfs
//! A small replicated file store built on top of a [ringdfs_node::RingNode].
//!
//! Every file name is hashed onto the membership ring, the first node at or
//! after the hash is the file's master and the master plus its successors hold
//! the replicas. Writes wait for a write quorum of replicas, reads ask a read
//! quorum for their version and fetch the newest one. When members join or
//! fail the store moves files to their new masters, tops up missing replicas
//! and drops the copies a node is no longer responsible for.
//!
//! ```no_run
//! use ringdfs_node::{ConnectionConfig, RingNodeBuilder};
//! use ringdfs_sdfs::{PutOptions, SdfsConfig, SdfsExtension};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let addr = "127.0.0.1:8080".parse::<std::net::SocketAddr>()?;
//! let rpc_addr = "127.0.0.1:8081".parse::<std::net::SocketAddr>()?;
//! let connection_cfg = ConnectionConfig::new(addr, rpc_addr, Vec::<String>::new());
//! let node = RingNodeBuilder::new(connection_cfg).connect().await?;
//!
//! let store = node
//!     .add_extension(SdfsExtension::new(SdfsConfig::new("/tmp/sdfs")))
//!     .await?;
//! let handle = store.handle();
//!
//! handle.put("hello.txt", b"Hello, world".to_vec(), PutOptions::default()).await?;
//! let content = handle.get("hello.txt").await?;
//! assert_eq!(content, b"Hello, world");
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate tracing;

mod config;
mod error;
mod filelist;
mod rebalance;
mod rpc;
mod store;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
pub use config::SdfsConfig;
pub use error::SdfsError;
pub use filelist::{dir_prefix, validate_name, FileList, FileRecord, StoreMode};
use ringdfs_node::{RingExtension, RingNode};
pub use rpc::*;
use rkyv::{Archive, Deserialize, Serialize};
pub use store::FileStoreHandle;
use tokio::task::JoinHandle;

#[repr(u8)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, PartialEq, Eq)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug, PartialEq, Eq))]
/// The outcome of a file operation.
pub enum ResultCode {
    Success,
    Fail,
    /// The file was updated recently, the write must be confirmed with a forced update.
    Prompt,
    /// The reply of an operation whose arrival is its only result, such as a finished task.
    Dummy,
}

impl ResultCode {
    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Prompt => "prompt",
            Self::Dummy => "dummy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions {
    /// Write even if the file was updated within the minimum update interval.
    pub force_update: bool,
    /// Append to the replicas instead of replacing them.
    pub append: bool,
    /// Write to the temporary shard of the name, see [FileStoreHandle::merge_dir].
    pub tmp: bool,
}

impl PutOptions {
    /// Options which overwrite the file without asking.
    pub fn forced() -> Self {
        Self {
            force_update: true,
            ..Default::default()
        }
    }
}

/// Attaches a replicated file store to a ring node.
pub struct SdfsExtension {
    config: SdfsConfig,
}

impl SdfsExtension {
    pub fn new(config: SdfsConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RingExtension for SdfsExtension {
    type Output = FileStore;
    type Error = SdfsError;

    async fn init_extension(self, node: &RingNode) -> Result<Self::Output, Self::Error> {
        let files = FileList::open(&self.config.data_dir)?;
        info!(
            data_dir = %self.config.data_dir.display(),
            replication_factor = self.config.replication_factor,
            "Starting file store."
        );

        let handle = FileStoreHandle::new(node.handle(), Arc::new(files), self.config);
        node.add_rpc_service(FileService::new(handle.clone()));

        let rebalancer = tokio::spawn(rebalance::watch_membership_changes(
            handle.clone(),
            node.subscribe(),
        ));

        Ok(FileStore { handle, rebalancer })
    }
}

/// A running file store.
///
/// Dropping the store stops moving files on membership changes, the RPC
/// service lives as long as the node it was attached to.
pub struct FileStore {
    handle: FileStoreHandle,
    rebalancer: JoinHandle<()>,
}

impl FileStore {
    #[inline]
    pub fn handle(&self) -> FileStoreHandle {
        self.handle.clone()
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        self.rebalancer.abort();
    }
}
