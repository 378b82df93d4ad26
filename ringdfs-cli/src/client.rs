use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Result};
use ringdfs_maplejuice::{wait_for_completion, MapleJuiceClient, MapleJuiceTaskArgs};
use ringdfs_node::{GetMembers, MembershipService};
use ringdfs_rpc::{Channel, RpcClient};
use ringdfs_sdfs::{FileClient, ResultCode};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;

use crate::ClientCommand;

const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a single client command against the node.
pub async fn run(node: SocketAddr, notify_addr: SocketAddr, command: ClientCommand) -> Result<()> {
    let files = FileClient::connect(node);

    match command {
        ClientCommand::Dump => dump(node).await?,
        ClientCommand::Ls { sdfs_name } => {
            for addr in files.ls(&sdfs_name).await? {
                println!("{addr}");
            }
        },
        ClientCommand::Lsdir { dir } => {
            for name in files.list_dir(&dir).await? {
                println!("{name}");
            }
        },
        ClientCommand::Store => {
            println!("{:<40} {:>10} {:>15} {:>6}", "NAME", "SIZE", "VERSION", "MASTER");
            for file in files.local_store().await? {
                println!(
                    "{:<40} {:>10} {:>15} {:>6}",
                    file.sdfs_name, file.size, file.timestamp, file.master_node_id
                );
            }
        },
        ClientCommand::Put {
            local_path,
            sdfs_name,
        } => put(&files, &local_path, &sdfs_name).await?,
        ClientCommand::Append {
            local_path,
            sdfs_name,
        } => {
            let code = files.put_file(&local_path, &sdfs_name, true, true).await?;
            report("append", code)?;
        },
        ClientCommand::Get {
            sdfs_name,
            local_path,
        } => report("get", files.get_file(&sdfs_name, &local_path).await?)?,
        ClientCommand::Delete { sdfs_name } => {
            report("delete", files.delete_file(&sdfs_name).await?)?
        },
        ClientCommand::DeleteDir { dir } => report("delete-dir", files.delete_dir(&dir).await?)?,
        ClientCommand::Maple {
            exe,
            num_workers,
            prefix,
            src_dir,
        } => {
            let args = MapleJuiceTaskArgs::maple(exe, num_workers, prefix, src_dir);
            submit_and_wait(node, notify_addr, args).await?
        },
        ClientCommand::Juice {
            exe,
            num_workers,
            prefix,
            dest,
            delete_input,
        } => {
            let args = MapleJuiceTaskArgs::juice(exe, num_workers, prefix, dest, delete_input);
            submit_and_wait(node, notify_addr, args).await?
        },
    }

    Ok(())
}

fn report(op: &str, code: ResultCode) -> Result<()> {
    if !code.is_success() {
        bail!("{op} failed: {code}");
    }
    println!("{op}: {code}");
    Ok(())
}

async fn dump(node: SocketAddr) -> Result<()> {
    let client = RpcClient::<MembershipService>::new(Channel::connect(node));
    let reply = client.send(&GetMembers).await?;

    println!(
        "{:>2} {:>6} {:<22} {:>8} {:<20} {:>15}",
        "", "ID", "GOSSIP ADDR", "RPC PORT", "HOSTNAME", "JOINED"
    );
    for member in reply.members {
        let marker = if member.id == reply.self_id { "*" } else { "" };
        println!(
            "{:>2} {:>6} {:<22} {:>8} {:<20} {:>15}",
            marker,
            member.id,
            SocketAddr::new(member.ip, member.port),
            member.rpc_port,
            member.hostname,
            member.join_time
        );
    }
    Ok(())
}

/// Stores the file, an update within the minimum interval needs a `yes`.
async fn put(files: &FileClient, local_path: &str, sdfs_name: &str) -> Result<()> {
    let code = files.put_file(local_path, sdfs_name, false, false).await?;
    if code != ResultCode::Prompt {
        return report("put", code);
    }

    println!("{sdfs_name} was updated recently, overwrite it? Type `yes` within 10 seconds.");
    let mut answer = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    match tokio::time::timeout(CONFIRM_TIMEOUT, stdin.read_line(&mut answer)).await {
        Ok(Ok(_)) if answer.trim() == "yes" => {
            let code = files.put_file(local_path, sdfs_name, true, false).await?;
            report("put", code)
        },
        Ok(Ok(_)) => {
            println!("put: cancelled");
            Ok(())
        },
        Ok(Err(e)) => Err(e.into()),
        Err(_) => {
            println!("put: no confirmation received, cancelled");
            Ok(())
        },
    }
}

/// Submits the job and blocks until the master reports its completion.
async fn submit_and_wait(
    node: SocketAddr,
    notify_addr: SocketAddr,
    args: MapleJuiceTaskArgs,
) -> Result<()> {
    let listener = TcpListener::bind(notify_addr).await?;
    let mut local_addr = listener.local_addr()?;
    if local_addr.ip().is_unspecified() {
        local_addr.set_ip(node_facing_ip(node).await?);
    }

    let phase = args.phase;
    let args = args.notify(local_addr.to_string());
    let code = MapleJuiceClient::connect(node).submit(args).await?;
    if !code.is_success() {
        bail!("The {phase} job was rejected: {code}");
    }
    info!(notify_addr = %local_addr, "Job submitted, waiting for completion.");

    let line = wait_for_completion(&listener).await?;
    println!("{line}");
    if !line.ends_with("Finished!") {
        bail!("The {phase} job failed");
    }
    Ok(())
}

/// The local IP used to reach the node, the cluster reaches back on it.
async fn node_facing_ip(node: SocketAddr) -> Result<std::net::IpAddr> {
    let socket = tokio::net::UdpSocket::bind(SocketAddr::new(
        std::net::Ipv4Addr::UNSPECIFIED.into(),
        0,
    ))
    .await?;
    socket.connect(node).await?;
    Ok(socket.local_addr()?.ip())
}
