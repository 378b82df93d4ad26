use ringdfs_node::NodeId;
use rkyv::{Archive, Deserialize, Serialize};

use crate::ResultCode;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Stores a file or directory from the serving node's disk into the cluster.
pub struct PutFileRequest {
    pub local_path: String,
    pub sdfs_name: String,
    pub force_update: bool,
    pub append: bool,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Fetches a file from the cluster onto the serving node's disk.
pub struct GetFileRequest {
    pub sdfs_name: String,
    pub local_path: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Deletes a file from every replica.
pub struct DeleteFileRequest {
    pub sdfs_name: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Lists the RPC addresses of the replicas holding the file.
pub struct Ls {
    pub sdfs_name: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// The local version of a file, `None` if the node does not hold it.
pub struct GetTimeStamp {
    pub sdfs_name: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Writes a replica of a file onto the receiving node.
pub struct StoreFileToLocal {
    pub master_node_id: NodeId,
    pub sdfs_name: String,
    pub timestamp: u64,
    pub content: Vec<u8>,
    pub append: bool,
    pub tmp: bool,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct ServeLocalFile {
    pub sdfs_name: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct ServeLocalFileReply {
    pub code: ResultCode,
    pub content: Vec<u8>,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Deletes the local replica of a file, a missing file is not an error.
pub struct DeleteLocalFile {
    pub sdfs_name: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct ListFileInLocalDir {
    pub dir: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct ListLocalFilesWithPrefix {
    pub prefix: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Lists a directory across the whole cluster.
pub struct ListFileInDirRequest {
    pub dir: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct DeleteSdfsDir {
    pub dir: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Deletes a directory across the whole cluster.
pub struct DeleteSdfsDirRequest {
    pub dir: String,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Folds every temporary shard into its final file.
pub struct MergeLocalDir {
    pub timestamp: u64,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
pub struct CheckFileExists {
    pub sdfs_name: String,
}

#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, Default)]
#[archive(check_bytes)]
/// Lists the final files held by the node.
pub struct ListLocalStore;

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
pub struct LocalFile {
    pub sdfs_name: String,
    pub size: u64,
    pub timestamp: u64,
    pub master_node_id: NodeId,
}
