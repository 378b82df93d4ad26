use std::net::SocketAddr;

use ringdfs_rpc::{Channel, RpcClient, Status};
use ringdfs_sdfs::ResultCode;

use crate::rpc::messages::ForwardMapleJuiceRequest;
use crate::rpc::service::MapleJuiceService;
use crate::task::MapleJuiceTaskArgs;

#[derive(Clone)]
/// Submits jobs through any node of the cluster.
pub struct MapleJuiceClient {
    inner: RpcClient<MapleJuiceService>,
}

impl MapleJuiceClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: RpcClient::new(channel),
        }
    }

    pub fn connect(addr: SocketAddr) -> Self {
        Self::new(Channel::connect(addr))
    }

    /// Submits the job, replying once the master has queued it.
    ///
    /// The completion of the job is reported to the `client_addr` of the job.
    pub async fn submit(&self, args: MapleJuiceTaskArgs) -> Result<ResultCode, Status> {
        self.inner.send(&ForwardMapleJuiceRequest { args }).await
    }
}
