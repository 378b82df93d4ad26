use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytecheck::CheckBytes;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use ringdfs_node::{in_ownership_range, timestamp_millis, Node, RingHandle};
use ringdfs_rpc::{Handler, RpcClient, Status, SCRATCH_SPACE};
use rkyv::de::deserializers::SharedDeserializeMap;
use rkyv::ser::serializers::AllocSerializer;
use rkyv::validation::validators::DefaultValidator;
use rkyv::{Archive, Deserialize, Serialize};
use tokio::time::{timeout_at, Instant};

use crate::filelist::{dir_prefix, validate_name, FileList};
use crate::rpc::{
    CheckFileExists,
    DeleteLocalFile,
    DeleteSdfsDir,
    FileService,
    GetTimeStamp,
    ListFileInLocalDir,
    ListLocalFilesWithPrefix,
    LocalFile,
    MergeLocalDir,
    ServeLocalFile,
    StoreFileToLocal,
};
use crate::{rebalance, PutOptions, ResultCode, SdfsConfig, SdfsError};

type Reply<Msg> = <FileService as Handler<Msg>>::Reply;

#[derive(Clone)]
/// A cheaply cloneable handle to the replicated file store.
///
/// Every operation resolves the replicas of a name from the live ring at
/// the time it is called.
pub struct FileStoreHandle {
    node: RingHandle,
    files: Arc<FileList>,
    config: Arc<SdfsConfig>,
}

impl FileStoreHandle {
    pub(crate) fn new(node: RingHandle, files: Arc<FileList>, config: SdfsConfig) -> Self {
        Self {
            node,
            files,
            config: Arc::new(config),
        }
    }

    #[inline]
    /// The files replicated onto this node.
    pub fn local(&self) -> &FileList {
        &self.files
    }

    /// Runs an operation on the local files on the blocking thread pool.
    pub(crate) async fn with_local_blocking<T, F>(&self, op: F) -> Result<T, SdfsError>
    where
        F: FnOnce(&FileList) -> Result<T, SdfsError> + Send + 'static,
        T: Send + 'static,
    {
        let files = self.files.clone();
        tokio::task::spawn_blocking(move || op(&files))
            .await
            .map_err(|e| SdfsError::IO(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    #[inline]
    pub fn node(&self) -> &RingHandle {
        &self.node
    }

    #[inline]
    pub fn config(&self) -> &SdfsConfig {
        &self.config
    }

    /// The master of the name followed by its successors.
    pub fn replicas(&self, name: &str) -> Vec<Node> {
        self.node
            .ring()
            .replica_set(name, self.config.replication_factor)
    }

    pub(crate) fn client(&self, addr: SocketAddr) -> RpcClient<FileService> {
        RpcClient::new(self.node.network().get_or_connect(addr))
    }

    /// Finds the replica holding the newest version of the file.
    ///
    /// Waits for a read quorum of replies, replicas which do not answer
    /// within the read timeout are not considered.
    pub async fn latest_timestamp(&self, name: &str) -> Option<(SocketAddr, u64)> {
        let replicas = self.replicas(name);
        let required = self.config.read_quorum.min(replicas.len());
        let msg = GetTimeStamp {
            sdfs_name: name.to_string(),
        };

        let mut requests = replicas
            .iter()
            .map(|node| {
                let client = self.client(node.rpc_addr());
                let msg = &msg;
                async move { (node.rpc_addr(), client.send(msg).await) }
            })
            .collect::<FuturesUnordered<_>>();

        let deadline = Instant::now() + self.config.read_timeout;
        let mut num_replies = 0;
        let mut latest: Option<(SocketAddr, u64)> = None;
        while num_replies < required {
            match timeout_at(deadline, requests.next()).await {
                Ok(Some((addr, Ok(timestamp)))) => {
                    num_replies += 1;
                    let Some(timestamp) = timestamp else { continue };
                    if latest.map_or(true, |(_, newest)| timestamp > newest) {
                        latest = Some((addr, timestamp));
                    }
                },
                Ok(Some((addr, Err(status)))) => {
                    debug!(
                        target_node = %addr,
                        error = %status,
                        sdfs_name = name,
                        "Replica failed to report timestamp."
                    );
                },
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        sdfs_name = name,
                        replies = num_replies,
                        required = required,
                        "Timed out waiting for the read quorum."
                    );
                    break;
                },
            }
        }

        latest
    }

    /// Writes the file to its replicas.
    ///
    /// Unless forced, a file updated within the minimum update interval is not
    /// overwritten and [ResultCode::Prompt] is returned instead so the caller
    /// can confirm the update.
    pub async fn put(
        &self,
        name: &str,
        content: Vec<u8>,
        options: PutOptions,
    ) -> Result<ResultCode, SdfsError> {
        validate_name(name)?;

        let replicas = self.replicas(name);
        let master_node_id = replicas.first().ok_or(SdfsError::NoReplicas)?.id;

        if !options.force_update {
            if let Some((_, last_updated)) = self.latest_timestamp(name).await {
                let age = timestamp_millis().saturating_sub(last_updated);
                if age < self.config.min_update_interval.as_millis() as u64 {
                    info!(
                        sdfs_name = name,
                        age_ms = age,
                        "File was recently updated, confirmation required."
                    );
                    return Ok(ResultCode::Prompt);
                }
            }
        }

        let msg = Arc::new(StoreFileToLocal {
            master_node_id,
            sdfs_name: name.to_string(),
            timestamp: self.node.clock().get_time(),
            content,
            append: options.append,
            tmp: options.tmp,
        });

        // Writes are spawned so the replicas beyond the quorum still receive them.
        let mut requests = replicas
            .iter()
            .map(|node| {
                let addr = node.rpc_addr();
                let client = self.client(addr);
                let msg = msg.clone();
                tokio::spawn(async move { (addr, client.send(msg.as_ref()).await) })
            })
            .collect::<FuturesUnordered<_>>();

        let required = self.config.write_quorum.min(replicas.len());
        let deadline = Instant::now() + self.config.write_timeout;
        let mut acks = 0;
        while acks < required {
            let (addr, result) = match timeout_at(deadline, requests.next()).await {
                Ok(Some(Ok(reply))) => reply,
                Ok(Some(Err(e))) => {
                    error!(error = ?e, sdfs_name = name, "Replica write task failed.");
                    continue;
                },
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        sdfs_name = name,
                        acks = acks,
                        required = required,
                        "Timed out waiting for the write quorum."
                    );
                    break;
                },
            };

            match result {
                Ok(ResultCode::Success) => acks += 1,
                Ok(code) => {
                    warn!(
                        target_node = %addr,
                        code = ?code,
                        sdfs_name = name,
                        "Replica rejected write."
                    );
                },
                Err(status) if status.is_unreachable() => {
                    warn!(
                        target_node = %addr,
                        error = %status,
                        sdfs_name = name,
                        "Replica is unreachable, counting as acknowledged."
                    );
                    acks += 1;
                },
                Err(status) => {
                    warn!(
                        target_node = %addr,
                        error = %status,
                        sdfs_name = name,
                        "Replica failed to store file."
                    );
                },
            }
        }

        if acks < required {
            return Err(SdfsError::Quorum { acks, required });
        }

        debug!(sdfs_name = name, master_node_id = master_node_id, acks = acks, "Stored file.");
        Ok(ResultCode::Success)
    }

    /// Stores a local file, or every regular file of a local directory.
    ///
    /// A directory `d` is stored as `{name}/{file}` for each file it contains.
    pub async fn put_local(
        &self,
        local_path: &Path,
        name: &str,
        options: PutOptions,
    ) -> Result<ResultCode, SdfsError> {
        let metadata = tokio::fs::metadata(local_path).await?;
        if !metadata.is_dir() {
            let content = tokio::fs::read(local_path).await?;
            return self.put(name, content, options).await;
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(local_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let mut result = ResultCode::Success;
        for path in paths {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().to_string()) else {
                continue;
            };
            let target = format!("{}{}", dir_prefix(name), file_name);
            let content = tokio::fs::read(&path).await?;

            let code = self.put(&target, content, options).await?;
            if code != ResultCode::Success {
                result = code;
            }
        }

        Ok(result)
    }

    /// Reads the newest version of the file.
    pub async fn get(&self, name: &str) -> Result<Vec<u8>, SdfsError> {
        validate_name(name)?;

        let not_found = || SdfsError::NotFound(name.to_string());
        let (addr, _) = self.latest_timestamp(name).await.ok_or_else(not_found)?;

        let mut client = self.client(addr);
        client.set_timeout(self.config.write_timeout);
        let reply = client
            .send(&ServeLocalFile {
                sdfs_name: name.to_string(),
            })
            .await
            .map_err(|e| SdfsError::Rpc(addr, e))?;

        if reply.code != ResultCode::Success {
            return Err(not_found());
        }

        Ok(reply.content)
    }

    /// Reads the newest version of the file into a local path.
    pub async fn get_to_local(&self, name: &str, local_path: &Path) -> Result<(), SdfsError> {
        let content = self.get(name).await?;

        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    /// Deletes the file from every reachable replica.
    pub async fn delete(&self, name: &str) -> Result<(), SdfsError> {
        validate_name(name)?;

        let replicas = self.replicas(name);
        let msg = DeleteLocalFile {
            sdfs_name: name.to_string(),
        };
        let replies = self
            .fan_out(&replicas, &msg, self.config.write_timeout)
            .await;

        let (acks, required) = count_acks(replies, "delete file");
        if acks < required {
            return Err(SdfsError::Quorum { acks, required });
        }

        Ok(())
    }

    /// The RPC addresses of the replicas which hold the file.
    pub async fn ls(&self, name: &str) -> Vec<SocketAddr> {
        let replicas = self.replicas(name);
        let msg = CheckFileExists {
            sdfs_name: name.to_string(),
        };

        let mut holders = self
            .fan_out(&replicas, &msg, self.config.read_timeout)
            .await
            .into_iter()
            .filter_map(|(node, result)| matches!(result, Ok(true)).then(|| node.rpc_addr()))
            .collect::<Vec<_>>();
        holders.sort();
        holders
    }

    /// Lists every file within the directory across the cluster.
    pub async fn list_dir(&self, dir: &str) -> Vec<String> {
        let msg = ListFileInLocalDir {
            dir: dir.to_string(),
        };
        self.collect_names(&msg).await
    }

    /// Lists every file starting with the prefix across the cluster.
    pub async fn list_with_prefix(&self, prefix: &str) -> Vec<String> {
        let msg = ListLocalFilesWithPrefix {
            prefix: prefix.to_string(),
        };
        self.collect_names(&msg).await
    }

    async fn collect_names<Msg>(&self, msg: &Msg) -> Vec<String>
    where
        Msg: Archive + Serialize<AllocSerializer<SCRATCH_SPACE>> + Send + Sync + 'static,
        Msg::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Msg, SharedDeserializeMap>,
        FileService: Handler<Msg, Reply = Vec<String>>,
    {
        let members = self.node.ring().members();
        let mut names = BTreeSet::new();
        for (node, result) in self.fan_out(&members, msg, self.config.read_timeout).await {
            match result {
                Ok(found) => names.extend(found),
                Err(e) => {
                    warn!(
                        target_node = %node.rpc_addr(),
                        error = %e,
                        "Failed to list files of member."
                    )
                },
            }
        }
        names.into_iter().collect()
    }

    /// Deletes every file within the directory across the cluster.
    pub async fn delete_dir(&self, dir: &str) -> Result<(), SdfsError> {
        let members = self.node.ring().members();
        let msg = DeleteSdfsDir {
            dir: dir.to_string(),
        };
        let replies = self.fan_out(&members, &msg, self.config.write_timeout).await;

        let (acks, required) = count_acks(replies, "delete directory");
        if acks < required {
            return Err(SdfsError::Quorum { acks, required });
        }

        Ok(())
    }

    /// Merges the temporary shards of every member into their final files.
    pub async fn merge_dir(&self, timestamp: u64) -> Result<(), SdfsError> {
        let members = self.node.ring().members();
        let msg = MergeLocalDir { timestamp };
        let replies = self.fan_out(&members, &msg, self.config.write_timeout).await;

        let (acks, required) = count_acks(replies, "merge shards");
        if acks < required {
            return Err(SdfsError::Quorum { acks, required });
        }

        Ok(())
    }

    /// Merges the local shards and takes over the files within this node's range.
    pub(crate) fn merge_local(&self, timestamp: u64) -> Result<usize, SdfsError> {
        let merged = self.files.merge_tmp_files(timestamp)?;
        self.remaster_own_range();

        let store = self.clone();
        tokio::spawn(async move { rebalance::duplicate_replica(&store).await });

        Ok(merged)
    }

    /// Marks every file hashed within `(prev(self), self]` as mastered by this node.
    pub(crate) fn remaster_own_range(&self) {
        let me = self.node.me().id;
        let Some((prev, _)) = self.node.ring().neighbours(me) else {
            return;
        };

        let updated = self
            .files
            .update_master_id(me, |r| in_ownership_range(r.hash_id, prev, me));
        if updated > 0 {
            info!(node_id = me, num_files = updated, "Took over as master of files.");
        }
    }

    /// The final files held by this node.
    pub fn local_files(&self) -> Vec<LocalFile> {
        self.files
            .records()
            .into_iter()
            .map(|record| LocalFile {
                size: std::fs::metadata(&record.local_path)
                    .map(|m| m.len())
                    .unwrap_or_default(),
                sdfs_name: record.sdfs_name,
                timestamp: record.timestamp,
                master_node_id: record.master_node_id,
            })
            .collect()
    }

    /// Sends the message to every target concurrently and waits for all replies.
    pub(crate) async fn fan_out<Msg>(
        &self,
        targets: &[Node],
        msg: &Msg,
        timeout: Duration,
    ) -> Vec<(Node, Result<Reply<Msg>, Status>)>
    where
        Msg: Archive + Serialize<AllocSerializer<SCRATCH_SPACE>> + Send + Sync + 'static,
        Msg::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Msg, SharedDeserializeMap>,
        FileService: Handler<Msg>,
        <Reply<Msg> as Archive>::Archived: for<'a> CheckBytes<DefaultValidator<'a>>
            + Deserialize<Reply<Msg>, SharedDeserializeMap>,
    {
        targets
            .iter()
            .map(|node| {
                let mut client = self.client(node.rpc_addr());
                client.set_timeout(timeout);
                async move {
                    let result = client.send(msg).await;
                    (node.clone(), result)
                }
            })
            .collect::<FuturesUnordered<_>>()
            .collect()
            .await
    }
}

/// Counts the successful replies, skipping the nodes which are unreachable.
///
/// Returns the number of acknowledgements and the number of reachable nodes.
fn count_acks(replies: Vec<(Node, Result<ResultCode, Status>)>, op: &str) -> (usize, usize) {
    let mut acks = 0;
    let mut reachable = 0;
    for (node, result) in replies {
        match result {
            Ok(ResultCode::Success) => {
                acks += 1;
                reachable += 1;
            },
            Ok(code) => {
                reachable += 1;
                warn!(target_node = %node.rpc_addr(), code = ?code, "Member failed to {op}.");
            },
            Err(status) if status.is_unreachable() => {
                warn!(
                    target_node = %node.rpc_addr(),
                    error = %status,
                    "Member is unreachable, skipping."
                );
            },
            Err(status) => {
                reachable += 1;
                warn!(target_node = %node.rpc_addr(), error = %status, "Member failed to {op}.");
            },
        }
    }
    (acks, reachable)
}

