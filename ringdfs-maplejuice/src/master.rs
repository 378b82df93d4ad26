use std::sync::Arc;

use async_trait::async_trait;
use ringdfs_node::{NodeId, RingHandle};
use ringdfs_rpc::RpcClient;
use ringdfs_sdfs::ResultCode;
use tokio_stream::wrappers::BroadcastStream;

use crate::notify::{completion_message, notify_client};
use crate::partition::{choose_workers, partition};
use crate::rendezvous::{Rendezvous, TaskRunner};
use crate::rpc::{MapleJuiceService, StartMapleJuiceTask};
use crate::task::{MapleJuiceTaskArgs, TaskDescription, TaskPhase};
use crate::{JobError, MapleJuiceHandle};

/// Runs tasks on workers over RPC.
pub(crate) struct RemoteRunner {
    node: RingHandle,
}

#[async_trait]
impl TaskRunner for RemoteRunner {
    async fn run_task(
        &self,
        worker: NodeId,
        task: TaskDescription,
    ) -> Result<ResultCode, JobError> {
        let node = self
            .node
            .ring()
            .get_node(worker)
            .ok_or(JobError::WorkerGone(worker))?;

        let addr = node.rpc_addr();
        let client = RpcClient::<MapleJuiceService>::new(self.node.network().get_or_connect(addr));
        client
            .send(&StartMapleJuiceTask { task })
            .await
            .map_err(|e| JobError::Rpc(addr, e))
    }
}

/// Processes the queued jobs one at a time, in submission order.
pub(crate) async fn process_jobs(
    scheduler: MapleJuiceHandle,
    jobs: flume::Receiver<MapleJuiceTaskArgs>,
) {
    while let Ok(args) = jobs.recv_async().await {
        info!(
            phase = %args.phase,
            exe = %args.exe,
            input = %args.input_path,
            output = %args.output_path,
            num_workers = args.num_workers,
            "Starting job."
        );

        let result = run_job(&scheduler, &args).await;
        match result.as_ref() {
            Ok(()) => info!(phase = %args.phase, exe = %args.exe, "Job finished."),
            Err(e) => error!(phase = %args.phase, exe = %args.exe, error = %e, "Job failed."),
        }

        let Some(client_addr) = args.client_addr.as_deref() else {
            continue;
        };
        let message = completion_message(args.phase, &result);
        let timeout = scheduler.config().notify_timeout;
        if let Err(e) = notify_client(client_addr, &message, timeout).await {
            warn!(client_addr = client_addr, error = %e, "Failed to notify client.");
        }
    }
}

/// Partitions the job across the workers, waits for them and merges their output.
pub(crate) async fn run_job(
    scheduler: &MapleJuiceHandle,
    args: &MapleJuiceTaskArgs,
) -> Result<(), JobError> {
    if scheduler.registry().get(&args.exe).is_none() {
        return Err(JobError::UnknownApp(args.exe.clone()));
    }

    let store = scheduler.store();
    let node = store.node();

    let mut files = match args.phase {
        TaskPhase::Maple => store.list_dir(&args.input_path).await,
        TaskPhase::Juice => store.list_with_prefix(&args.input_path).await,
    };
    files.sort();
    files.dedup();

    let workers = choose_workers(node.ring(), node.me().id, args.num_workers as usize);
    let partitions = partition(args.phase, &files, workers.len());
    let assignments = workers.into_iter().zip(partitions).collect::<Vec<_>>();
    debug!(num_files = files.len(), assignments = ?assignments, "Partitioned job input.");

    // Subscribed before dispatching so no failure goes unnoticed.
    let changes = BroadcastStream::new(node.subscribe());
    let runner = Arc::new(RemoteRunner { node: node.clone() });
    Rendezvous::new(runner, node.ring().clone(), args.clone())
        .run(assignments, changes, scheduler.config().job_timeout)
        .await?;

    if args.delete_input && args.phase == TaskPhase::Juice {
        store.delete_dir(&args.input_path).await?;
    }

    store.merge_dir(node.clock().get_time()).await?;
    Ok(())
}
