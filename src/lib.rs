//! # ringdfs
//! A small distributed file system and batch job runner on a consistent hashing ring.
//!
//! This is a convenience package which includes all of the sub-projects of
//! ringdfs, each of them can also be used on its own:
//!
//! ### Features
//! - `ringdfs_rpc` - A zero-copy RPC framework built on rkyv and hyper.
//! - `ringdfs_node` - Ring membership, failure detection and the extension system.
//! - `ringdfs_sdfs` - A quorum replicated file store running as a node extension.
//! - `ringdfs_maplejuice` - Maple/Juice jobs over the files of the store.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use ringdfs::maplejuice::{MapleJuiceConfig, MapleJuiceExtension, MapleJuiceTaskArgs};
//! use ringdfs::node::{ConnectionConfig, RingNodeBuilder};
//! use ringdfs::sdfs::{PutOptions, SdfsConfig, SdfsExtension};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let addr = "127.0.0.1:8010".parse()?;
//! let rpc_addr = "127.0.0.1:8011".parse()?;
//! let node = RingNodeBuilder::new(ConnectionConfig::new(addr, rpc_addr, Vec::<String>::new()))
//!     .connect()
//!     .await?;
//!
//! let store = node.add_extension(SdfsExtension::new(SdfsConfig::new("data"))).await?;
//! let jobs = node
//!     .add_extension(MapleJuiceExtension::new(
//!         store.handle(),
//!         MapleJuiceConfig::new("scratch"),
//!     ))
//!     .await?;
//!
//! store
//!     .handle()
//!     .put("books/a.txt", b"the cat sat".to_vec(), PutOptions::default())
//!     .await?;
//! jobs.handle()
//!     .submit(MapleJuiceTaskArgs::maple("wordcount", 2, "words", "books"))
//!     .await?;
//!
//! tokio::time::sleep(Duration::from_secs(5)).await;
//! node.leave().await;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "ringdfs-maplejuice")]
pub use ringdfs_maplejuice as maplejuice;
#[cfg(feature = "ringdfs-node")]
pub use ringdfs_node as node;
#[cfg(feature = "ringdfs-rpc")]
pub use ringdfs_rpc as rpc;
#[cfg(feature = "ringdfs-sdfs")]
pub use ringdfs_sdfs as sdfs;
