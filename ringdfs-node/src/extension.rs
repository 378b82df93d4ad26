use async_trait::async_trait;

use crate::RingNode;

#[async_trait]
/// An extension of the base ring node.
///
/// This is how the file store and the task scheduler attach themselves to a
/// node, they get access to the membership ring, the change feed and the RPC
/// server of the node they extend.
pub trait RingExtension {
    type Output;
    type Error;

    async fn init_extension(self, node: &RingNode) -> Result<Self::Output, Self::Error>;
}
