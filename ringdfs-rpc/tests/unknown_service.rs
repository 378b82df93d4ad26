use std::time::Duration;

use ringdfs_rpc::{
    Channel,
    ErrorCode,
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
pub struct Lookup {
    id: u32,
}

/// Answers with the successor of the id on a ring of 1024 slots.
pub struct SuccessorService;

impl RpcService for SuccessorService {
    fn register_handlers(registry: &mut ServiceRegistry<Self>) {
        registry.add_handler::<Lookup>();
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<Lookup> for SuccessorService {
    type Reply = u32;

    async fn on_message(&self, msg: Request<Lookup>) -> Result<Self::Reply, Status> {
        Ok((msg.id + 1) % 1024)
    }
}

/// Never registered with the server.
pub struct PredecessorService;

impl RpcService for PredecessorService {
    fn register_handlers(_registry: &mut ServiceRegistry<Self>) {}
}

#[ringdfs_rpc::async_trait]
impl Handler<Lookup> for PredecessorService {
    type Reply = u32;

    async fn on_message(&self, msg: Request<Lookup>) -> Result<Self::Reply, Status> {
        Ok((msg.id + 1023) % 1024)
    }
}

#[tokio::test]
async fn test_unknown_service() {
    let addr = test_helper::get_unused_addr();

    let server = Server::listen(addr).await.unwrap();
    server.add_service(SuccessorService);

    let channel = Channel::connect(addr);
    let successor = RpcClient::<SuccessorService>::new(channel.clone());
    let predecessor = RpcClient::<PredecessorService>::new(channel);

    assert_eq!(successor.send(&Lookup { id: 1023 }).await.unwrap(), 0);

    let status = predecessor
        .send(&Lookup { id: 0 })
        .await
        .expect_err("Server should reject unknown service");
    assert_eq!(status.code, ErrorCode::ServiceUnavailable);
    assert!(status.message.starts_with("Unknown service /"));
    assert!(!status.is_unreachable());
}

#[tokio::test]
async fn test_unreachable_server() {
    let addr = test_helper::get_unused_addr();

    let mut client = RpcClient::<SuccessorService>::new(Channel::connect(addr));
    client.set_timeout(Duration::from_secs(1));

    let status = client
        .send(&Lookup { id: 7 })
        .await
        .expect_err("Nothing listens on the address");
    assert!(status.is_unreachable(), "{status}");
}

#[tokio::test]
async fn test_open_connection_after_shutdown() {
    let addr = test_helper::get_unused_addr();

    let server = Server::listen(addr).await.unwrap();
    server.add_service(SuccessorService);

    let client = RpcClient::<SuccessorService>::new(Channel::connect(addr));
    assert_eq!(client.send(&Lookup { id: 5 }).await.unwrap(), 6);

    server.shutdown();

    // Either the reused connection is told the service is gone,
    // or the connection was closed with the server.
    let status = client
        .send(&Lookup { id: 5 })
        .await
        .expect_err("A stopped server must not answer");
    assert!(
        status.code == ErrorCode::ServiceUnavailable || status.is_unreachable(),
        "{status}"
    );

    // The address is free again for a restarted server.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let restarted = Server::listen(addr).await.unwrap();
    restarted.add_service(SuccessorService);

    let client = RpcClient::<SuccessorService>::new(Channel::connect(addr));
    assert_eq!(client.send(&Lookup { id: 9 }).await.unwrap(), 10);
}
