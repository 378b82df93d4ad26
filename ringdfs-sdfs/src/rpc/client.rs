use std::net::SocketAddr;

use ringdfs_rpc::{Channel, RpcClient, Status};

use crate::rpc::file_service::FileService;
use crate::rpc::messages::*;
use crate::ResultCode;

#[derive(Clone)]
/// A client of the file operations served by any store node.
///
/// The node receiving the request acts as the coordinator, local paths are
/// resolved on that node's disk.
pub struct FileClient {
    inner: RpcClient<FileService>,
}

impl FileClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: RpcClient::new(channel),
        }
    }

    /// Creates a client for the node serving RPC at the given address.
    pub fn connect(addr: SocketAddr) -> Self {
        Self::new(Channel::connect(addr))
    }

    pub async fn put_file(
        &self,
        local_path: &str,
        sdfs_name: &str,
        force_update: bool,
        append: bool,
    ) -> Result<ResultCode, Status> {
        let msg = PutFileRequest {
            local_path: local_path.to_string(),
            sdfs_name: sdfs_name.to_string(),
            force_update,
            append,
        };
        self.inner.send(&msg).await
    }

    pub async fn get_file(&self, sdfs_name: &str, local_path: &str) -> Result<ResultCode, Status> {
        let msg = GetFileRequest {
            sdfs_name: sdfs_name.to_string(),
            local_path: local_path.to_string(),
        };
        self.inner.send(&msg).await
    }

    pub async fn delete_file(&self, sdfs_name: &str) -> Result<ResultCode, Status> {
        let msg = DeleteFileRequest {
            sdfs_name: sdfs_name.to_string(),
        };
        self.inner.send(&msg).await
    }

    /// The addresses of the replicas holding the file.
    pub async fn ls(&self, sdfs_name: &str) -> Result<Vec<String>, Status> {
        let msg = Ls {
            sdfs_name: sdfs_name.to_string(),
        };
        self.inner.send(&msg).await
    }

    pub async fn list_dir(&self, dir: &str) -> Result<Vec<String>, Status> {
        let msg = ListFileInDirRequest {
            dir: dir.to_string(),
        };
        self.inner.send(&msg).await
    }

    pub async fn delete_dir(&self, dir: &str) -> Result<ResultCode, Status> {
        let msg = DeleteSdfsDirRequest {
            dir: dir.to_string(),
        };
        self.inner.send(&msg).await
    }

    /// The files held by the connected node.
    pub async fn local_store(&self) -> Result<Vec<LocalFile>, Status> {
        self.inner.send(&ListLocalStore).await
    }

    /// The version of the file held by the connected node.
    pub async fn timestamp(&self, sdfs_name: &str) -> Result<Option<u64>, Status> {
        let msg = GetTimeStamp {
            sdfs_name: sdfs_name.to_string(),
        };
        self.inner.send(&msg).await
    }
}
