use std::time::Duration;

use ringdfs_rpc::{
    Channel,
    Handler,
    Request,
    RpcClient,
    RpcService,
    Server,
    ServiceRegistry,
    Status,
};
use rkyv::{Archive, Deserialize, Serialize};

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug)]
#[archive(check_bytes)]
pub struct Compute {
    delay_ms: u64,
}

pub struct FaultyService;

impl RpcService for FaultyService {
    fn register_handlers(registry: &mut ServiceRegistry<Self>) {
        registry.add_handler::<Compute>();
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<Compute> for FaultyService {
    type Reply = String;

    async fn on_message(&self, msg: Request<Compute>) -> Result<Self::Reply, Status> {
        if msg.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(msg.delay_ms)).await;
            return Ok("slow".to_string());
        }
        Err(Status::internal("Oops! Something went wrong!"))
    }
}

#[tokio::test]
async fn test_service_error() {
    let addr = test_helper::get_unused_addr();

    let server = Server::listen(addr).await.unwrap();
    server.add_service(FaultyService);

    let rpc_client = RpcClient::<FaultyService>::new(Channel::connect(addr));

    let resp = rpc_client.send(&Compute { delay_ms: 0 }).await;
    assert_eq!(
        resp,
        Err(Status::internal("Oops! Something went wrong!")),
        "Results should match."
    );
}

#[tokio::test]
async fn test_request_timeout() {
    let addr = test_helper::get_unused_addr();

    let server = Server::listen(addr).await.unwrap();
    server.add_service(FaultyService);

    let mut rpc_client = RpcClient::<FaultyService>::new(Channel::connect(addr));
    rpc_client.set_timeout(Duration::from_millis(100));

    let resp = rpc_client.send(&Compute { delay_ms: 2_000 }).await;
    assert_eq!(resp, Err(Status::timeout()));
}
