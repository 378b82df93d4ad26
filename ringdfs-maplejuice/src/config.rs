use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
/// Settings of the job scheduler.
pub struct MapleJuiceConfig {
    /// Where workers stage the inputs and outputs of their tasks.
    pub scratch_dir: PathBuf,
    /// The number of jobs the master queues before rejecting new ones.
    pub queue_capacity: usize,
    /// The number of input lines handed to a single maple call.
    pub maple_batch_size: usize,
    /// Bounds the time a job waits for its workers.
    pub job_timeout: Duration,
    pub notify_timeout: Duration,
}

impl MapleJuiceConfig {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            ..Default::default()
        }
    }
}

impl Default for MapleJuiceConfig {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir().join("ringdfs-scratch"),
            queue_capacity: 10,
            maple_batch_size: 10,
            job_timeout: Duration::from_secs(60 * 60),
            notify_timeout: Duration::from_secs(5),
        }
    }
}
