//! # ringdfs maplejuice
//! Batch jobs over the files of a ringdfs store.
//!
//! A job runs in two phases. A *maple* job feeds every file of a source
//! directory through the map function of an [App] and appends the emitted
//! values to one intermediate file per key. A *juice* job reduces each of
//! those key files into a single line of the destination file.
//!
//! Jobs may be submitted to any node, they are passed on to the master, the
//! member with the lowest id, which queues them and runs them one after
//! another. The master spreads the input files over its successors and hands
//! the files of a failed worker to another member until every task is done.
#[macro_use]
extern crate tracing;

mod apps;
mod config;
mod error;
mod keys;
mod master;
mod notify;
mod partition;
mod rendezvous;
mod rpc;
mod task;
mod worker;

use std::sync::Arc;

pub use apps::{App, AppRegistry, Juice, Maple, UrlCount, UrlPercent, WordCount};
use async_trait::async_trait;
pub use config::MapleJuiceConfig;
pub use error::JobError;
pub use keys::{decode_key, encode_key};
pub use notify::{completion_message, notify_client, wait_for_completion};
pub use partition::{choose_workers, partition, partition_hash, partition_range};
use ringdfs_node::{Node, RingExtension, RingNode};
use ringdfs_rpc::RpcClient;
pub use rpc::*;
use ringdfs_sdfs::{FileStoreHandle, ResultCode};
pub use task::{task_id, MapleJuiceTaskArgs, TaskDescription, TaskPhase};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Attaches the job scheduler to a node running a file store.
pub struct MapleJuiceExtension {
    store: FileStoreHandle,
    registry: AppRegistry,
    config: MapleJuiceConfig,
}

impl MapleJuiceExtension {
    /// Creates a scheduler running the built in apps.
    pub fn new(store: FileStoreHandle, config: MapleJuiceConfig) -> Self {
        Self::with_registry(store, config, AppRegistry::with_builtin())
    }

    pub fn with_registry(
        store: FileStoreHandle,
        config: MapleJuiceConfig,
        registry: AppRegistry,
    ) -> Self {
        Self {
            store,
            registry,
            config,
        }
    }
}

#[async_trait]
impl RingExtension for MapleJuiceExtension {
    type Output = MapleJuice;
    type Error = JobError;

    async fn init_extension(self, node: &RingNode) -> Result<Self::Output, Self::Error> {
        tokio::fs::create_dir_all(&self.config.scratch_dir).await?;

        let (jobs_tx, jobs_rx) = flume::bounded(self.config.queue_capacity.max(1));
        let (stop, stopped) = watch::channel(false);
        let handle = MapleJuiceHandle {
            store: self.store,
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
            jobs: jobs_tx,
            stopped,
        };

        node.add_rpc_service(MapleJuiceService::new(handle.clone()));
        let consumer = tokio::spawn(master::process_jobs(handle.clone(), jobs_rx));

        info!(apps = ?handle.registry.names(), "Started job scheduler.");
        Ok(MapleJuice {
            handle,
            consumer,
            stop,
        })
    }
}

/// A running job scheduler.
///
/// Dropping the scheduler stops the job queue and cancels the tasks this
/// node is running for a master.
pub struct MapleJuice {
    handle: MapleJuiceHandle,
    consumer: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl MapleJuice {
    #[inline]
    pub fn handle(&self) -> MapleJuiceHandle {
        self.handle.clone()
    }
}

impl Drop for MapleJuice {
    fn drop(&mut self) {
        self.consumer.abort();
        let _ = self.stop.send(true);
    }
}

#[derive(Clone)]
/// A cheaply cloneable handle to the job scheduler of a node.
pub struct MapleJuiceHandle {
    store: FileStoreHandle,
    registry: Arc<AppRegistry>,
    config: Arc<MapleJuiceConfig>,
    jobs: flume::Sender<MapleJuiceTaskArgs>,
    stopped: watch::Receiver<bool>,
}

impl MapleJuiceHandle {
    #[inline]
    pub fn store(&self) -> &FileStoreHandle {
        &self.store
    }

    #[inline]
    pub fn registry(&self) -> &AppRegistry {
        &self.registry
    }

    #[inline]
    pub fn config(&self) -> &MapleJuiceConfig {
        &self.config
    }

    /// The member queueing and dispatching jobs, the one with the lowest id.
    pub fn master(&self) -> Option<Node> {
        let ring = self.store.node().ring();
        ring.smallest_id().and_then(|id| ring.get_node(id))
    }

    /// Passes the job on to the master's queue.
    pub async fn submit(&self, args: MapleJuiceTaskArgs) -> Result<ResultCode, JobError> {
        let master = self.master().ok_or(JobError::NoMaster)?;
        let addr = master.rpc_addr();
        debug!(master = master.id, exe = %args.exe, "Forwarding job to master.");

        let client =
            RpcClient::<MapleJuiceService>::new(self.store.node().network().get_or_connect(addr));
        client
            .send(&AddMapleJuiceTask { args })
            .await
            .map_err(|e| JobError::Rpc(addr, e))
    }

    /// Queues the job on this node, a full queue rejects the job.
    pub fn enqueue(&self, args: MapleJuiceTaskArgs) -> ResultCode {
        match self.jobs.try_send(args) {
            Ok(()) => {
                debug!(queued = self.jobs.len(), "Job queued.");
                ResultCode::Success
            },
            Err(flume::TrySendError::Full(args)) => {
                warn!(exe = %args.exe, error = %JobError::QueueFull, "Rejecting job.");
                ResultCode::Fail
            },
            Err(flume::TrySendError::Disconnected(args)) => {
                error!(exe = %args.exe, "Job queue is closed, rejecting job.");
                ResultCode::Fail
            },
        }
    }

    /// Runs the task until it finishes or the scheduler is dropped.
    pub(crate) async fn run_worker_task(&self, task: &TaskDescription) -> Result<(), JobError> {
        let mut stopped = self.stopped.clone();
        if *stopped.borrow() {
            return Err(JobError::ShuttingDown);
        }

        tokio::select! {
            result = worker::run_task(&self.store, &self.registry, &self.config, task) => result,
            _ = stopped.changed() => {
                warn!(task_id = task.task_id, attempt = task.attempt, "Cancelled running task.");
                Err(JobError::ShuttingDown)
            },
        }
    }
}
