use ringdfs_rpc::{Handler, Request, RpcService, ServiceRegistry, Status};
use ringdfs_sdfs::ResultCode;

use crate::rpc::messages::*;
use crate::{JobError, MapleJuiceHandle};

/// Accepts jobs from clients, queues them on the master and runs the
/// tasks the master hands out.
pub struct MapleJuiceService {
    scheduler: MapleJuiceHandle,
}

impl MapleJuiceService {
    pub(crate) fn new(scheduler: MapleJuiceHandle) -> Self {
        Self { scheduler }
    }
}

impl RpcService for MapleJuiceService {
    fn service_name() -> &'static str {
        "ringdfs_maplejuice"
    }

    fn register_handlers(registry: &mut ServiceRegistry<Self>) {
        registry.add_handler::<ForwardMapleJuiceRequest>();
        registry.add_handler::<AddMapleJuiceTask>();
        registry.add_handler::<StartMapleJuiceTask>();
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ForwardMapleJuiceRequest> for MapleJuiceService {
    type Reply = ResultCode;

    async fn on_message(
        &self,
        msg: Request<ForwardMapleJuiceRequest>,
    ) -> Result<Self::Reply, Status> {
        let args = msg.into_inner().args;
        match self.scheduler.submit(args).await {
            Ok(code) => Ok(code),
            Err(e) => {
                warn!(error = %e, "Failed to forward job to the master.");
                Ok(ResultCode::Fail)
            },
        }
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<AddMapleJuiceTask> for MapleJuiceService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<AddMapleJuiceTask>) -> Result<Self::Reply, Status> {
        Ok(self.scheduler.enqueue(msg.into_inner().args))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<StartMapleJuiceTask> for MapleJuiceService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<StartMapleJuiceTask>) -> Result<Self::Reply, Status> {
        let task = msg.into_inner().task;
        // The reply itself reports the completion, it carries no result.
        match self.scheduler.run_worker_task(&task).await {
            Ok(()) => Ok(ResultCode::Dummy),
            // Lets the master hand the task to another worker.
            Err(JobError::ShuttingDown) => {
                Err(Status::unavailable("Job scheduler is shutting down"))
            },
            Err(e) => {
                error!(error = %e, task_id = task.task_id, exe = %task.exe, "Failed to run task.");
                Ok(ResultCode::Fail)
            },
        }
    }
}
