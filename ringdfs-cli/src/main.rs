mod client;
mod daemon;

#[macro_use]
extern crate tracing;

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ringdfs_node::NodeId;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args: Args = Args::parse();

    match args.command {
        Command::Node(node_args) => daemon::run(node_args).await,
        Command::Client(command) => client::run(args.node_addr, args.notify_addr, command).await,
    }
}

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long = "node", global = true, default_value = "127.0.0.1:8011")]
    /// The RPC address of the node serving client commands.
    node_addr: SocketAddr,

    #[arg(long, global = true, default_value = "0.0.0.0:0")]
    /// The address to listen on for the completion of a submitted job.
    ///
    /// The port is chosen by the OS unless given, the address must be
    /// reachable from the cluster's master.
    notify_addr: SocketAddr,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Runs a cluster node until interrupted.
    Node(NodeArgs),

    #[command(flatten)]
    Client(ClientCommand),
}

#[derive(clap::Args, Debug)]
pub struct NodeArgs {
    #[arg(long, default_value = "0.0.0.0:8010")]
    /// The address for the UDP membership socket to listen on.
    gossip_addr: SocketAddr,

    #[arg(long, default_value = "0.0.0.0:8011")]
    /// The address for the RPC server to listen on.
    rpc_addr: SocketAddr,

    #[arg(long)]
    /// The IP other members reach this node on.
    ///
    /// If not provided the IP of `gossip_addr` is broadcast which will only
    /// work when it is not a wildcard address.
    public_ip: Option<IpAddr>,

    #[arg(long, value_delimiter = ',')]
    /// The membership addresses of nodes introducing this node to the cluster.
    seeds: Vec<String>,

    #[arg(long, default_value = "sdfs-data")]
    /// The directory holding this node's replicas.
    data_dir: PathBuf,

    #[arg(long)]
    /// The directory tasks are processed in, a temporary directory by default.
    scratch_dir: Option<PathBuf>,

    #[arg(long)]
    /// The position of the node on the ring, derived from its address by default.
    node_id: Option<NodeId>,
}

#[derive(Subcommand, Debug)]
pub enum ClientCommand {
    /// Prints the members of the ring.
    Dump,

    /// Lists the addresses of the nodes holding a file.
    Ls { sdfs_name: String },

    /// Lists the files of a directory.
    Lsdir { dir: String },

    /// Lists the files held by the node.
    Store,

    /// Stores a local file, asking for confirmation of frequent updates.
    Put { local_path: String, sdfs_name: String },

    /// Appends a local file to a stored one.
    Append { local_path: String, sdfs_name: String },

    /// Fetches a file to a local path.
    Get { sdfs_name: String, local_path: String },

    /// Deletes a file from every replica.
    Delete { sdfs_name: String },

    /// Deletes every file of a directory.
    DeleteDir { dir: String },

    /// Runs a maple job over every file of `src_dir`.
    Maple {
        exe: String,
        num_workers: u32,
        prefix: String,
        src_dir: String,
    },

    /// Runs a juice job over every key file under `prefix`.
    Juice {
        exe: String,
        num_workers: u32,
        prefix: String,
        dest: String,

        #[arg(long)]
        /// Remove the intermediate files once the job completes.
        delete_input: bool,
    },
}
