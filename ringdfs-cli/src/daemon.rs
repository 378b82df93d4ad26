use std::net::SocketAddr;

use anyhow::Result;
use ringdfs_maplejuice::{MapleJuiceConfig, MapleJuiceExtension};
use ringdfs_node::{ConnectionConfig, RingNodeBuilder};
use ringdfs_sdfs::{SdfsConfig, SdfsExtension};

use crate::NodeArgs;

/// Runs a node with the file store and the job scheduler until Ctrl-C.
pub async fn run(args: NodeArgs) -> Result<()> {
    let mut connection_cfg = ConnectionConfig::new(args.gossip_addr, args.rpc_addr, &args.seeds);
    if let Some(ip) = args.public_ip {
        connection_cfg.gossip_public_addr = SocketAddr::new(ip, args.gossip_addr.port());
        connection_cfg.rpc_public_addr = SocketAddr::new(ip, args.rpc_addr.port());
        connection_cfg.hostname = ip.to_string();
    }

    let mut builder = RingNodeBuilder::new(connection_cfg);
    if let Some(node_id) = args.node_id {
        builder = builder.with_node_id(node_id);
    }
    let node = builder.connect().await?;

    let store = node
        .add_extension(SdfsExtension::new(SdfsConfig::new(&args.data_dir)))
        .await?;

    let scheduler_cfg = match args.scratch_dir {
        Some(dir) => MapleJuiceConfig::new(dir),
        None => MapleJuiceConfig::default(),
    };
    let scheduler = node
        .add_extension(MapleJuiceExtension::new(store.handle(), scheduler_cfg))
        .await?;

    info!(
        node_id = node.me().id,
        data_dir = %args.data_dir.display(),
        "Node is running, press Ctrl-C to leave."
    );

    tokio::signal::ctrl_c().await?;
    info!("Leaving the cluster.");

    drop(scheduler);
    drop(store);
    node.leave().await;

    Ok(())
}
