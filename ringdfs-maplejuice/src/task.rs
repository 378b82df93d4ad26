use std::fmt;

use ringdfs_node::hash_id;
use rkyv::{Archive, Deserialize, Serialize};

#[repr(u8)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[archive(check_bytes)]
#[archive_attr(derive(Debug, PartialEq, Eq))]
pub enum TaskPhase {
    Maple,
    Juice,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Maple => f.write_str("Maple"),
            Self::Juice => f.write_str("Juice"),
        }
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
/// A job submitted by a client.
pub struct MapleJuiceTaskArgs {
    pub phase: TaskPhase,
    /// The registered name of the app to run.
    pub exe: String,
    pub num_workers: u32,
    /// The source directory of a maple job, the intermediate prefix of a juice job.
    pub input_path: String,
    /// The intermediate prefix of a maple job, the destination file of a juice job.
    pub output_path: String,
    /// Where the completion line is written to, if anywhere.
    pub client_addr: Option<String>,
    /// Remove the intermediate files once a juice job completes.
    pub delete_input: bool,
}

impl MapleJuiceTaskArgs {
    /// A maple job reading every file of `src_dir` and writing keys under `prefix`.
    pub fn maple(
        exe: impl Into<String>,
        num_workers: u32,
        prefix: impl Into<String>,
        src_dir: impl Into<String>,
    ) -> Self {
        Self {
            phase: TaskPhase::Maple,
            exe: exe.into(),
            num_workers,
            input_path: src_dir.into(),
            output_path: prefix.into(),
            client_addr: None,
            delete_input: false,
        }
    }

    /// A juice job reducing every key under `prefix` into `dest`.
    pub fn juice(
        exe: impl Into<String>,
        num_workers: u32,
        prefix: impl Into<String>,
        dest: impl Into<String>,
        delete_input: bool,
    ) -> Self {
        Self {
            phase: TaskPhase::Juice,
            exe: exe.into(),
            num_workers,
            input_path: prefix.into(),
            output_path: dest.into(),
            client_addr: None,
            delete_input,
        }
    }

    /// Sets the address notified once the job has finished.
    pub fn notify(mut self, client_addr: impl Into<String>) -> Self {
        self.client_addr = Some(client_addr.into());
        self
    }
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone, PartialEq, Eq)]
#[archive(check_bytes)]
/// The share of a job assigned to a single worker.
pub struct TaskDescription {
    pub phase: TaskPhase,
    pub task_id: u32,
    /// Tells apart repeated dispatches of the same task within a job.
    pub attempt: u64,
    pub exe: String,
    pub input_files: Vec<String>,
    pub output_path: String,
}

impl TaskDescription {
    pub fn new(args: &MapleJuiceTaskArgs, input_files: Vec<String>, attempt: u64) -> Self {
        Self {
            phase: args.phase,
            task_id: task_id(&input_files),
            attempt,
            exe: args.exe.clone(),
            input_files,
            output_path: args.output_path.clone(),
        }
    }
}

/// Identifies the task by the files it processes.
pub fn task_id(files: &[String]) -> u32 {
    hash_id(&files.join(","))
}
