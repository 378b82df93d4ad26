use std::path::Path;

use ringdfs_rpc::{Handler, Request, RpcService, ServiceRegistry, Status};

use crate::rpc::messages::*;
use crate::store::FileStoreHandle;
use crate::{PutOptions, ResultCode, SdfsError, StoreMode};

/// Serves both the client facing file operations and the replica
/// operations exchanged between store nodes.
///
/// Failures of the store itself are reported as [ResultCode::Fail], a
/// [Status] is only returned when the request could not be processed.
pub struct FileService {
    store: FileStoreHandle,
}

impl FileService {
    pub(crate) fn new(store: FileStoreHandle) -> Self {
        Self { store }
    }
}

impl RpcService for FileService {
    fn service_name() -> &'static str {
        "ringdfs_files"
    }

    fn register_handlers(registry: &mut ServiceRegistry<Self>) {
        registry.add_handler::<PutFileRequest>();
        registry.add_handler::<GetFileRequest>();
        registry.add_handler::<DeleteFileRequest>();
        registry.add_handler::<Ls>();
        registry.add_handler::<GetTimeStamp>();
        registry.add_handler::<StoreFileToLocal>();
        registry.add_handler::<ServeLocalFile>();
        registry.add_handler::<DeleteLocalFile>();
        registry.add_handler::<ListFileInLocalDir>();
        registry.add_handler::<ListLocalFilesWithPrefix>();
        registry.add_handler::<ListFileInDirRequest>();
        registry.add_handler::<DeleteSdfsDir>();
        registry.add_handler::<DeleteSdfsDirRequest>();
        registry.add_handler::<MergeLocalDir>();
        registry.add_handler::<CheckFileExists>();
        registry.add_handler::<ListLocalStore>();
    }
}

fn to_result_code(result: Result<ResultCode, SdfsError>, op: &str) -> ResultCode {
    match result {
        Ok(code) => code,
        Err(e) => {
            warn!(error = %e, "Failed to {op}.");
            ResultCode::Fail
        },
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<PutFileRequest> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<PutFileRequest>) -> Result<Self::Reply, Status> {
        let msg = msg.into_inner();
        let options = PutOptions {
            force_update: msg.force_update,
            append: msg.append,
            tmp: false,
        };

        let result = self
            .store
            .put_local(Path::new(&msg.local_path), &msg.sdfs_name, options)
            .await;
        Ok(to_result_code(result, "put file"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<GetFileRequest> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<GetFileRequest>) -> Result<Self::Reply, Status> {
        let result = self
            .store
            .get_to_local(&msg.sdfs_name, Path::new(&msg.local_path))
            .await
            .map(|_| ResultCode::Success);
        Ok(to_result_code(result, "get file"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<DeleteFileRequest> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<DeleteFileRequest>) -> Result<Self::Reply, Status> {
        let result = self
            .store
            .delete(&msg.sdfs_name)
            .await
            .map(|_| ResultCode::Success);
        Ok(to_result_code(result, "delete file"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<Ls> for FileService {
    type Reply = Vec<String>;

    async fn on_message(&self, msg: Request<Ls>) -> Result<Self::Reply, Status> {
        let holders = self.store.ls(&msg.sdfs_name).await;
        Ok(holders.into_iter().map(|addr| addr.to_string()).collect())
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<GetTimeStamp> for FileService {
    type Reply = Option<u64>;

    async fn on_message(&self, msg: Request<GetTimeStamp>) -> Result<Self::Reply, Status> {
        Ok(self.store.local().timestamp(&msg.sdfs_name))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<StoreFileToLocal> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<StoreFileToLocal>) -> Result<Self::Reply, Status> {
        let msg = msg.into_inner();
        let mode = StoreMode {
            append: msg.append,
            tmp: msg.tmp,
        };

        let result = self
            .store
            .with_local_blocking(move |files| {
                files.store(
                    &msg.sdfs_name,
                    msg.master_node_id,
                    msg.timestamp,
                    &msg.content,
                    mode,
                )
            })
            .await
            .map(|_| ResultCode::Success);
        Ok(to_result_code(result, "store replica"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ServeLocalFile> for FileService {
    type Reply = ServeLocalFileReply;

    async fn on_message(&self, msg: Request<ServeLocalFile>) -> Result<Self::Reply, Status> {
        let sdfs_name = msg.into_inner().sdfs_name;
        let name = sdfs_name.clone();
        let content = self
            .store
            .with_local_blocking(move |files| files.read(&name))
            .await;

        let reply = match content {
            Ok(Some(content)) => ServeLocalFileReply {
                code: ResultCode::Success,
                content,
            },
            Ok(None) => ServeLocalFileReply {
                code: ResultCode::Fail,
                content: Vec::new(),
            },
            Err(e) => {
                warn!(error = %e, sdfs_name = %sdfs_name, "Failed to read replica.");
                ServeLocalFileReply {
                    code: ResultCode::Fail,
                    content: Vec::new(),
                }
            },
        };

        Ok(reply)
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<DeleteLocalFile> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<DeleteLocalFile>) -> Result<Self::Reply, Status> {
        let result = self
            .store
            .local()
            .delete(&msg.sdfs_name)
            .map(|_| ResultCode::Success);
        Ok(to_result_code(result, "delete replica"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ListFileInLocalDir> for FileService {
    type Reply = Vec<String>;

    async fn on_message(&self, msg: Request<ListFileInLocalDir>) -> Result<Self::Reply, Status> {
        Ok(self.store.local().list_in_dir(&msg.dir))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ListLocalFilesWithPrefix> for FileService {
    type Reply = Vec<String>;

    async fn on_message(
        &self,
        msg: Request<ListLocalFilesWithPrefix>,
    ) -> Result<Self::Reply, Status> {
        Ok(self.store.local().list_with_prefix(&msg.prefix))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ListFileInDirRequest> for FileService {
    type Reply = Vec<String>;

    async fn on_message(
        &self,
        msg: Request<ListFileInDirRequest>,
    ) -> Result<Self::Reply, Status> {
        Ok(self.store.list_dir(&msg.dir).await)
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<DeleteSdfsDir> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<DeleteSdfsDir>) -> Result<Self::Reply, Status> {
        let result = self.store.local().delete_dir(&msg.dir).map(|removed| {
            debug!(dir = %msg.dir, num_files = removed, "Deleted local directory.");
            ResultCode::Success
        });
        Ok(to_result_code(result, "delete local directory"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<DeleteSdfsDirRequest> for FileService {
    type Reply = ResultCode;

    async fn on_message(
        &self,
        msg: Request<DeleteSdfsDirRequest>,
    ) -> Result<Self::Reply, Status> {
        let result = self
            .store
            .delete_dir(&msg.dir)
            .await
            .map(|_| ResultCode::Success);
        Ok(to_result_code(result, "delete directory"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<MergeLocalDir> for FileService {
    type Reply = ResultCode;

    async fn on_message(&self, msg: Request<MergeLocalDir>) -> Result<Self::Reply, Status> {
        let result = self.store.merge_local(msg.timestamp).map(|merged| {
            debug!(num_files = merged, "Merged local shards.");
            ResultCode::Success
        });
        Ok(to_result_code(result, "merge shards"))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<CheckFileExists> for FileService {
    type Reply = bool;

    async fn on_message(&self, msg: Request<CheckFileExists>) -> Result<Self::Reply, Status> {
        Ok(self.store.local().contains(&msg.sdfs_name))
    }
}

#[ringdfs_rpc::async_trait]
impl Handler<ListLocalStore> for FileService {
    type Reply = Vec<LocalFile>;

    async fn on_message(&self, _msg: Request<ListLocalStore>) -> Result<Self::Reply, Status> {
        Ok(self.store.local_files())
    }
}
