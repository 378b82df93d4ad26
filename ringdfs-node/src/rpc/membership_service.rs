use std::sync::Arc;

use ringdfs_rpc::{Handler, Request, RpcService, ServiceRegistry, Status};
use rkyv::{Archive, Deserialize, Serialize};

use crate::ring::{MembershipRing, Node, NodeId};

#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, Default)]
#[archive(check_bytes)]
/// Requests the node's current view of the ring.
pub struct GetMembers;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct MembersReply {
    pub self_id: NodeId,
    /// All members in id order.
    pub members: Vec<Node>,
}

/// Exposes the membership ring of a node over RPC.
pub struct MembershipService {
    ring: Arc<MembershipRing>,
}

impl MembershipService {
    pub fn new(ring: Arc<MembershipRing>) -> Self {
        Self { ring }
    }
}

impl RpcService for MembershipService {
    fn service_name() -> &'static str {
        "ringdfs_membership"
    }

    fn register_handlers(registry: &mut ServiceRegistry<Self>) {
        registry.add_handler::<GetMembers>();
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<GetMembers> for MembershipService {
    type Reply = MembersReply;

    async fn on_message(&self, _msg: Request<GetMembers>) -> Result<Self::Reply, Status> {
        Ok(MembersReply {
            self_id: self.ring.self_id(),
            members: self.ring.members(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_members() {
        let ring = Arc::new(MembershipRing::new(3));
        for id in [3, 1, 2] {
            let addr = format!("127.0.0.1:{}", 7000 + id).parse().unwrap();
            ring.insert_node(Node::new(id, addr, 8000, "localhost")).unwrap();
        }

        let service = MembershipService::new(ring);
        let reply = service
            .on_message(Request::using_owned(GetMembers))
            .await
            .unwrap();

        assert_eq!(reply.self_id, 3);
        let ids = reply.members.iter().map(|n| n.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
