use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use rand::seq::IteratorRandom;
use ringdfs_node::{MembershipChange, MembershipRing, NodeId};
use ringdfs_sdfs::ResultCode;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::task::{MapleJuiceTaskArgs, TaskDescription};
use crate::JobError;

#[async_trait]
/// Runs a single task on a worker and waits for it to finish.
pub(crate) trait TaskRunner: Send + Sync + 'static {
    async fn run_task(
        &self,
        worker: NodeId,
        task: TaskDescription,
    ) -> Result<ResultCode, JobError>;
}

struct Assignment {
    files: Vec<String>,
    attempt: u64,
}

struct Completion {
    worker: NodeId,
    attempt: u64,
    task_id: u32,
    result: Result<ResultCode, JobError>,
}

/// Waits for every partition of a job to be processed.
///
/// A worker which leaves the ring, or can no longer be reached, has its
/// files handed to a random live member which is not working on the job.
/// Tasks are therefore run at least once.
pub(crate) struct Rendezvous<R: TaskRunner> {
    runner: Arc<R>,
    ring: Arc<MembershipRing>,
    args: MapleJuiceTaskArgs,
    pending: BTreeMap<NodeId, Assignment>,
    next_attempt: u64,
    completions_tx: flume::Sender<Completion>,
    completions_rx: flume::Receiver<Completion>,
    tasks: Vec<JoinHandle<()>>,
}

impl<R: TaskRunner> Rendezvous<R> {
    pub(crate) fn new(runner: Arc<R>, ring: Arc<MembershipRing>, args: MapleJuiceTaskArgs) -> Self {
        let (completions_tx, completions_rx) = flume::unbounded();
        Self {
            runner,
            ring,
            args,
            pending: BTreeMap::new(),
            next_attempt: 0,
            completions_tx,
            completions_rx,
            tasks: Vec::new(),
        }
    }

    /// Dispatches every non-empty partition and waits until all of them completed.
    pub(crate) async fn run(
        mut self,
        assignments: Vec<(NodeId, Vec<String>)>,
        mut changes: BroadcastStream<MembershipChange>,
        timeout: Duration,
    ) -> Result<(), JobError> {
        let deadline = Instant::now() + timeout;

        for (worker, files) in assignments {
            if files.is_empty() {
                debug!(worker = worker, "Worker has an empty partition.");
                continue;
            }
            self.dispatch(worker, files);
        }

        let mut feed_open = true;
        while !self.pending.is_empty() {
            tokio::select! {
                completion = self.completions_rx.recv_async() => {
                    // The rendezvous holds a sender, the channel never closes.
                    if let Ok(completion) = completion {
                        self.on_completion(completion)?;
                    }
                },
                change = changes.next(), if feed_open => match change {
                    Some(Ok(change)) => {
                        for node in change.left {
                            if self.pending.contains_key(&node.id) {
                                warn!(worker = node.id, "Worker left the cluster mid task.");
                                self.reassign(node.id)?;
                            }
                        }
                    },
                    Some(Err(BroadcastStreamRecvError::Lagged(missed))) => {
                        warn!(
                            missed = missed,
                            "Missed membership changes, checking worker liveness."
                        );
                        self.sweep()?;
                    },
                    None => feed_open = false,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(JobError::Timeout);
                },
            }
        }

        Ok(())
    }

    fn dispatch(&mut self, worker: NodeId, files: Vec<String>) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;

        let task = TaskDescription::new(&self.args, files.clone(), attempt);
        info!(
            worker = worker,
            task_id = task.task_id,
            attempt = attempt,
            num_files = files.len(),
            phase = %task.phase,
            "Dispatching task."
        );
        self.pending.insert(worker, Assignment { files, attempt });

        let runner = self.runner.clone();
        let completions = self.completions_tx.clone();
        let handle = tokio::spawn(async move {
            let task_id = task.task_id;
            let result = runner.run_task(worker, task).await;
            let _ = completions.send(Completion {
                worker,
                attempt,
                task_id,
                result,
            });
        });
        self.tasks.push(handle);
    }

    fn on_completion(&mut self, completion: Completion) -> Result<(), JobError> {
        let is_current = self
            .pending
            .get(&completion.worker)
            .map_or(false, |a| a.attempt == completion.attempt);
        if !is_current {
            debug!(
                worker = completion.worker,
                task_id = completion.task_id,
                "Ignoring outdated task completion."
            );
            return Ok(());
        }

        match completion.result {
            Ok(ResultCode::Dummy | ResultCode::Success) => {
                self.pending.remove(&completion.worker);
                info!(
                    worker = completion.worker,
                    task_id = completion.task_id,
                    remaining = self.pending.len(),
                    "Task completed."
                );
                Ok(())
            },
            Ok(code) => {
                error!(
                    worker = completion.worker,
                    task_id = completion.task_id,
                    code = ?code,
                    "Worker failed task."
                );
                Err(JobError::TaskFailed {
                    worker: completion.worker,
                    task_id: completion.task_id,
                })
            },
            Err(e) if e.is_transport() => {
                warn!(worker = completion.worker, error = %e, "Lost contact with worker.");
                self.reassign(completion.worker)
            },
            Err(e) => Err(e),
        }
    }

    /// Reassigns the tasks of every pending worker which is no longer a member.
    fn sweep(&mut self) -> Result<(), JobError> {
        let gone = self
            .pending
            .keys()
            .copied()
            .filter(|id| !self.ring.contains(*id))
            .collect::<Vec<_>>();

        for worker in gone {
            self.reassign(worker)?;
        }
        Ok(())
    }

    fn reassign(&mut self, failed: NodeId) -> Result<(), JobError> {
        let Some(assignment) = self.pending.remove(&failed) else {
            return Ok(());
        };

        let replacement = self
            .ring
            .members()
            .into_iter()
            .map(|node| node.id)
            .filter(|id| *id != failed && !self.pending.contains_key(id))
            .choose(&mut rand::thread_rng())
            .ok_or(JobError::NoFreeWorker(failed))?;

        info!(failed = failed, replacement = replacement, "Redispatching task.");
        self.dispatch(replacement, assignment.files);
        Ok(())
    }
}

impl<R: TaskRunner> Drop for Rendezvous<R> {
    fn drop(&mut self) {
        for task in self.tasks.iter() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::net::SocketAddr;

    use parking_lot::Mutex;
    use ringdfs_node::Node;
    use tokio::sync::broadcast;

    use super::*;

    fn node(id: NodeId) -> Node {
        let addr: SocketAddr = format!("127.0.0.1:{}", 9000 + id).parse().unwrap();
        Node::new(id, addr, 10000 + id as u16, "localhost")
    }

    fn ring_of(ids: &[NodeId]) -> Arc<MembershipRing> {
        let ring = MembershipRing::new(ids[0]);
        for id in ids {
            ring.insert_node(node(*id)).unwrap();
        }
        Arc::new(ring)
    }

    fn args() -> MapleJuiceTaskArgs {
        MapleJuiceTaskArgs::maple("wordcount", 3, "words", "input")
    }

    #[derive(Default)]
    /// Completes tasks immediately, except on the workers listed as hanging.
    struct FakeRunner {
        hanging: HashSet<NodeId>,
        failing: HashSet<NodeId>,
        unreachable: HashSet<NodeId>,
        runs: Mutex<Vec<(NodeId, Vec<String>)>>,
    }

    #[async_trait]
    impl TaskRunner for FakeRunner {
        async fn run_task(
            &self,
            worker: NodeId,
            task: TaskDescription,
        ) -> Result<ResultCode, JobError> {
            self.runs.lock().push((worker, task.input_files));

            if self.hanging.contains(&worker) {
                futures::future::pending::<()>().await;
            }
            if self.unreachable.contains(&worker) {
                return Err(JobError::WorkerGone(worker));
            }
            if self.failing.contains(&worker) {
                return Ok(ResultCode::Fail);
            }
            Ok(ResultCode::Dummy)
        }
    }

    fn assignments() -> Vec<(NodeId, Vec<String>)> {
        vec![
            (2, vec!["input/a".to_string()]),
            (3, vec!["input/b".to_string(), "input/c".to_string()]),
            (4, vec![]),
        ]
    }

    #[tokio::test]
    async fn test_all_workers_complete() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner::default());
        let (_tx, rx) = broadcast::channel(8);

        Rendezvous::new(runner.clone(), ring_of(&[1, 2, 3, 4]), args())
            .run(assignments(), BroadcastStream::new(rx), Duration::from_secs(5))
            .await?;

        let mut runs = runner.runs.lock().clone();
        runs.sort();
        assert_eq!(
            runs,
            vec![
                (2, vec!["input/a".to_string()]),
                (3, vec!["input/b".to_string(), "input/c".to_string()]),
            ],
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_worker_is_replaced() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            hanging: HashSet::from([3]),
            ..Default::default()
        });
        let ring = ring_of(&[1, 2, 3, 4]);
        let (tx, rx) = broadcast::channel(8);

        let job = tokio::spawn(
            Rendezvous::new(runner.clone(), ring.clone(), args()).run(
                assignments(),
                BroadcastStream::new(rx),
                Duration::from_secs(5),
            ),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let failed = ring.delete_node(3)?;
        tx.send(MembershipChange {
            joined: vec![],
            left: vec![failed],
        })?;

        job.await??;

        let runs = runner.runs.lock().clone();
        let redispatched = runs
            .iter()
            .filter(|(_, files)| files == &vec!["input/b".to_string(), "input/c".to_string()])
            .map(|(worker, _)| *worker)
            .collect::<Vec<_>>();
        assert_eq!(redispatched.len(), 2);
        assert_eq!(redispatched[0], 3);
        assert!([1, 2, 4].contains(&redispatched[1]));

        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_worker_is_replaced() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            unreachable: HashSet::from([2]),
            ..Default::default()
        });
        let (_tx, rx) = broadcast::channel(8);

        Rendezvous::new(runner.clone(), ring_of(&[1, 2, 3, 4]), args())
            .run(assignments(), BroadcastStream::new(rx), Duration::from_secs(5))
            .await?;

        let runs = runner.runs.lock().clone();
        let workers_of_a = runs
            .iter()
            .filter(|(_, files)| files == &vec!["input/a".to_string()])
            .map(|(worker, _)| *worker)
            .collect::<Vec<_>>();
        assert_eq!(workers_of_a.len(), 2);
        assert_eq!(workers_of_a[0], 2);
        assert_ne!(workers_of_a[1], 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_no_free_worker_fails_job() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            hanging: HashSet::from([2, 3]),
            ..Default::default()
        });
        let ring = ring_of(&[2, 3]);
        let (tx, rx) = broadcast::channel(8);

        let job = tokio::spawn(
            Rendezvous::new(runner, ring.clone(), args()).run(
                vec![
                    (2, vec!["input/a".to_string()]),
                    (3, vec!["input/b".to_string()]),
                ],
                BroadcastStream::new(rx),
                Duration::from_secs(5),
            ),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        let failed = ring.delete_node(3)?;
        tx.send(MembershipChange {
            joined: vec![],
            left: vec![failed],
        })?;

        let result = job.await?;
        assert!(matches!(result, Err(JobError::NoFreeWorker(3))));

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_task_fails_job() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            failing: HashSet::from([3]),
            ..Default::default()
        });
        let (_tx, rx) = broadcast::channel(8);

        let result = Rendezvous::new(runner, ring_of(&[1, 2, 3, 4]), args())
            .run(assignments(), BroadcastStream::new(rx), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(JobError::TaskFailed { worker: 3, .. })));

        Ok(())
    }

    #[tokio::test]
    async fn test_lagged_feed_sweeps_workers() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            hanging: HashSet::from([3]),
            ..Default::default()
        });
        let ring = ring_of(&[1, 2, 3, 4]);
        let (tx, rx) = broadcast::channel(1);

        let job = tokio::spawn(
            Rendezvous::new(runner.clone(), ring.clone(), args()).run(
                assignments(),
                BroadcastStream::new(rx),
                Duration::from_secs(5),
            ),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        ring.delete_node(3)?;
        // Overflow the feed so only the lag is observed.
        for _ in 0..3 {
            tx.send(MembershipChange::default())?;
        }

        job.await??;
        assert_eq!(runner.runs.lock().len(), 3);

        Ok(())
    }

    #[tokio::test]
    async fn test_job_timeout() -> anyhow::Result<()> {
        let runner = Arc::new(FakeRunner {
            hanging: HashSet::from([2]),
            ..Default::default()
        });
        let (_tx, rx) = broadcast::channel(8);

        let result = Rendezvous::new(runner, ring_of(&[1, 2, 3, 4]), args())
            .run(assignments(), BroadcastStream::new(rx), Duration::from_millis(200))
            .await;
        assert!(matches!(result, Err(JobError::Timeout)));

        Ok(())
    }
}
