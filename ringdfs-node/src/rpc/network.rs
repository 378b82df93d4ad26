use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use ringdfs_rpc::Channel;

#[derive(Clone, Default)]
/// The RPC channels to the other members, shared by every service of a node.
///
/// Channels are opened on first use and dropped once the member leaves the ring.
pub struct RpcNetwork {
    channels: Arc<RwLock<HashMap<SocketAddr, Channel>>>,
}

impl RpcNetwork {
    /// The channel to the RPC server at the address, opened if needed.
    pub fn get_or_connect(&self, addr: SocketAddr) -> Channel {
        if let Some(channel) = self.channels.read().get(&addr) {
            return channel.clone();
        }

        trace!(addr = %addr, "Opening RPC channel.");
        self.channels
            .write()
            .entry(addr)
            .or_insert_with(|| Channel::connect(addr))
            .clone()
    }

    /// Forgets the channel to a member which left the ring.
    pub fn disconnect(&self, addr: SocketAddr) {
        if self.channels.write().remove(&addr).is_some() {
            trace!(addr = %addr, "Closed RPC channel.");
        }
    }
}
