use rkyv::{Archive, Deserialize, Serialize};

use crate::task::{MapleJuiceTaskArgs, TaskDescription};

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Submits a job to any node, which passes it on to the master.
pub struct ForwardMapleJuiceRequest {
    pub args: MapleJuiceTaskArgs,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Queues a job on the master.
pub struct AddMapleJuiceTask {
    pub args: MapleJuiceTaskArgs,
}

#[repr(C)]
#[derive(Serialize, Deserialize, Archive, Debug, Clone)]
#[archive(check_bytes)]
/// Runs a task on a worker, replying once the task has finished.
pub struct StartMapleJuiceTask {
    pub task: TaskDescription,
}
