use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
/// Placement and quorum settings of the file store.
pub struct SdfsConfig {
    /// The directory holding the local replicas.
    ///
    /// Its contents are discarded when the store starts.
    pub data_dir: PathBuf,
    /// The number of nodes holding a copy of each file.
    pub replication_factor: usize,
    /// The replica acknowledgements a write waits for.
    pub write_quorum: usize,
    /// The replica timestamps a read waits for.
    pub read_quorum: usize,
    pub write_timeout: Duration,
    pub read_timeout: Duration,
    /// How long a replica is given to report its version before it is re-replicated to.
    pub probe_timeout: Duration,
    /// Writes to a file updated more recently than this require confirmation.
    pub min_update_interval: Duration,
}

impl SdfsConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }
}

impl Default for SdfsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("sdfs-data"),
            replication_factor: 4,
            write_quorum: 3,
            read_quorum: 2,
            write_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
            min_update_interval: Duration::from_secs(60),
        }
    }
}
