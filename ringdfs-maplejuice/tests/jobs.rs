use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use ringdfs_maplejuice::{
    wait_for_completion,
    App,
    AppRegistry,
    Maple,
    MapleJuice,
    MapleJuiceClient,
    MapleJuiceConfig,
    MapleJuiceExtension,
    MapleJuiceService,
    MapleJuiceTaskArgs,
    StartMapleJuiceTask,
    TaskDescription,
    WordCount,
};
use ringdfs_node::{ConnectionConfig, MembershipConfig, NodeId, RingNode, RingNodeBuilder};
use ringdfs_rpc::{Channel, ErrorCode, RpcClient};
use ringdfs_sdfs::{FileStore, FileStoreHandle, PutOptions, ResultCode, SdfsConfig, SdfsExtension};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct TestNode {
    scheduler: MapleJuice,
    store: FileStore,
    node: RingNode,
    dir: TempDir,
}

impl TestNode {
    fn store(&self) -> FileStoreHandle {
        self.store.handle()
    }

    fn client(&self) -> MapleJuiceClient {
        MapleJuiceClient::connect(self.node.me().rpc_addr())
    }

    fn scratch_dir(&self) -> PathBuf {
        self.dir.path().join("scratch")
    }

    /// If a task is currently running on this node.
    fn is_busy(&self) -> bool {
        std::fs::read_dir(self.scratch_dir())
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

/// Counts words like `wordcount`, but takes its time for every batch.
struct SlowWordCount;

impl Maple for SlowWordCount {
    fn map(&self, lines: &[String]) -> BTreeMap<String, String> {
        std::thread::sleep(Duration::from_millis(1500));
        WordCount.map(lines)
    }
}

fn slow_registry() -> AppRegistry {
    let mut registry = AppRegistry::with_builtin();
    registry.register("slowcount", App::new(SlowWordCount, WordCount));
    registry
}

async fn start_node(id: NodeId, seeds: &[SocketAddr]) -> anyhow::Result<TestNode> {
    start_node_with(id, seeds, AppRegistry::with_builtin()).await
}

async fn start_node_with(
    id: NodeId,
    seeds: &[SocketAddr],
    registry: AppRegistry,
) -> anyhow::Result<TestNode> {
    let dir = tempfile::tempdir()?;
    let gossip_addr = test_helper::get_unused_addr();
    let rpc_addr = test_helper::get_unused_addr();
    let seeds = seeds.iter().map(|addr| addr.to_string()).collect::<Vec<_>>();

    let membership_cfg = MembershipConfig {
        heartbeat_interval: Duration::from_millis(200),
        failure_timeout: Duration::from_secs(1),
        ..MembershipConfig::default()
    };
    let node = RingNodeBuilder::new(ConnectionConfig::new(gossip_addr, rpc_addr, seeds))
        .with_node_id(id)
        .with_membership_config(membership_cfg)
        .connect()
        .await?;

    let store_cfg = SdfsConfig {
        write_timeout: Duration::from_secs(2),
        read_timeout: Duration::from_secs(1),
        ..SdfsConfig::new(dir.path().join("sdfs"))
    };
    let store = node.add_extension(SdfsExtension::new(store_cfg)).await?;

    let scheduler_cfg = MapleJuiceConfig {
        job_timeout: Duration::from_secs(30),
        ..MapleJuiceConfig::new(dir.path().join("scratch"))
    };
    let scheduler = node
        .add_extension(MapleJuiceExtension::with_registry(
            store.handle(),
            scheduler_cfg,
            registry,
        ))
        .await?;

    Ok(TestNode {
        scheduler,
        store,
        node,
        dir,
    })
}

async fn start_cluster(ids: &[NodeId]) -> anyhow::Result<Vec<TestNode>> {
    start_cluster_with(ids, AppRegistry::with_builtin()).await
}

async fn start_cluster_with(
    ids: &[NodeId],
    registry: AppRegistry,
) -> anyhow::Result<Vec<TestNode>> {
    let first = start_node_with(ids[0], &[], registry.clone()).await?;
    let seed = first.node.me().gossip_addr();

    let mut nodes = vec![first];
    for id in &ids[1..] {
        nodes.push(start_node_with(*id, &[seed], registry.clone()).await?);
    }

    for node in nodes.iter() {
        assert!(node.node.wait_for_members(ids.len(), Duration::from_secs(5)).await);
    }
    Ok(nodes)
}

/// Submits the job and waits for the line reporting its completion.
async fn run_job(node: &TestNode, args: MapleJuiceTaskArgs) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let args = args.notify(listener.local_addr()?.to_string());

    let code = node.client().submit(args).await?;
    assert_eq!(code, ResultCode::Success);

    let completion = wait_for_completion(&listener);
    Ok(tokio::time::timeout(Duration::from_secs(30), completion).await??)
}

fn parse_counts(content: &[u8]) -> BTreeMap<String, i64> {
    String::from_utf8_lossy(content)
        .lines()
        .filter_map(|line| {
            let (key, value) = line.rsplit_once(' ')?;
            Some((key.to_string(), value.parse().ok()?))
        })
        .collect()
}

#[tokio::test]
async fn test_wordcount_job() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let nodes = start_cluster(&[100, 400, 800]).await?;
    let store = nodes[0].store();

    let documents = [
        ("input/a.txt", "the quick brown fox\njumps over the lazy dog\n"),
        ("input/b.txt", "the dog barks\n"),
        ("input/c.txt", "a fox\n\nthe end\n"),
        ("input/d.txt", "over and over and over\n"),
    ];
    for (name, content) in documents {
        store
            .put(name, content.as_bytes().to_vec(), PutOptions::default())
            .await?;
    }

    let submitter = &nodes[2];
    let maple = MapleJuiceTaskArgs::maple("wordcount", 3, "words", "input");
    let line = run_job(submitter, maple).await?;
    assert_eq!(line, "[Maple Task] Finished!");

    let keys = store.list_dir("words").await;
    assert!(keys.contains(&"words/the".to_string()));
    assert!(keys.contains(&"words/over".to_string()));

    let line = run_job(
        submitter,
        MapleJuiceTaskArgs::juice("wordcount", 2, "words", "results/wordcount", true),
    )
    .await?;
    assert_eq!(line, "[Juice Task] Finished!");

    let counts = parse_counts(&store.get("results/wordcount").await?);
    let expected = BTreeMap::from([
        ("a".to_string(), 1),
        ("and".to_string(), 2),
        ("barks".to_string(), 1),
        ("brown".to_string(), 1),
        ("dog".to_string(), 2),
        ("end".to_string(), 1),
        ("fox".to_string(), 2),
        ("jumps".to_string(), 1),
        ("lazy".to_string(), 1),
        ("over".to_string(), 4),
        ("quick".to_string(), 1),
        ("the".to_string(), 4),
    ]);
    assert_eq!(counts, expected);

    // The intermediate files were deleted by the juice job.
    assert!(store.list_with_prefix("words").await.is_empty());
    assert_eq!(store.list_dir("input").await.len(), 4);

    drop(nodes);
    Ok(())
}

#[tokio::test]
async fn test_unknown_app_fails_job() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let nodes = start_cluster(&[100, 400]).await?;
    nodes[0]
        .store()
        .put("input/a.txt", b"hello".to_vec(), PutOptions::default())
        .await?;

    let line = run_job(&nodes[1], MapleJuiceTaskArgs::maple("grep", 2, "out", "input")).await?;
    assert!(line.starts_with("[Maple Task] Failed:"), "{line}");
    assert!(line.contains("grep"), "{line}");

    Ok(())
}

#[tokio::test]
async fn test_jobs_are_forwarded_to_master() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let nodes = start_cluster(&[100, 400, 800]).await?;
    for node in nodes.iter() {
        let master = node.scheduler.handle().master().expect("Cluster has a master");
        assert_eq!(master.id, 100);
    }

    // An empty source directory completes without dispatching any task.
    let maple = MapleJuiceTaskArgs::maple("wordcount", 3, "empty-out", "nothing");
    let line = run_job(&nodes[2], maple).await?;
    assert_eq!(line, "[Maple Task] Finished!");
    assert!(nodes[0].store().list_dir("empty-out").await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_worker_killed_during_maple() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let mut nodes = start_cluster_with(&[100, 200, 300, 400], slow_registry()).await?;
    let store = nodes[0].store();

    let documents = [
        ("input/1.txt", "red green\n"),
        ("input/2.txt", "green blue\n"),
        ("input/3.txt", "blue blue red\n"),
        ("input/4.txt", "red\n"),
        ("input/5.txt", "green green green\n"),
        ("input/6.txt", "blue red\n"),
    ];
    for (name, content) in documents {
        store
            .put(name, content.as_bytes().to_vec(), PutOptions::default())
            .await?;
    }

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let maple = MapleJuiceTaskArgs::maple("slowcount", 3, "colours", "input")
        .notify(listener.local_addr()?.to_string());
    assert_eq!(nodes[0].client().submit(maple).await?, ResultCode::Success);

    // Wait for a worker other than the master to pick up its task, then kill it.
    let busy = async {
        loop {
            if let Some(position) = nodes.iter().skip(1).position(TestNode::is_busy) {
                return position + 1;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    let victim = tokio::time::timeout(Duration::from_secs(10), busy).await?;
    let victim_id = nodes[victim].node.me().id;
    drop(nodes.remove(victim));

    let completion = wait_for_completion(&listener);
    let line = tokio::time::timeout(Duration::from_secs(30), completion).await??;
    assert_eq!(line, "[Maple Task] Finished!");

    for node in nodes.iter() {
        assert!(node.node.wait_for_members(3, Duration::from_secs(5)).await);
        assert!(!node.node.ring().contains(victim_id));
    }

    let line = run_job(
        &nodes[1],
        MapleJuiceTaskArgs::juice("wordcount", 2, "colours", "results/colours", true),
    )
    .await?;
    assert_eq!(line, "[Juice Task] Finished!");

    let counts = parse_counts(&store.get("results/colours").await?);
    let expected = BTreeMap::from([
        ("blue".to_string(), 4),
        ("green".to_string(), 5),
        ("red".to_string(), 4),
    ]);
    assert_eq!(counts, expected);

    Ok(())
}

#[tokio::test]
async fn test_worker_reply_reports_completion() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let node = start_node(100, &[]).await?;
    node.store()
        .put("input/a.txt", b"one two two\n".to_vec(), PutOptions::default())
        .await?;

    let client = RpcClient::<MapleJuiceService>::new(Channel::connect(node.node.me().rpc_addr()));
    let args = MapleJuiceTaskArgs::maple("wordcount", 1, "words", "input");
    let task = TaskDescription::new(&args, vec!["input/a.txt".to_string()], 0);

    let code = client.send(&StartMapleJuiceTask { task }).await?;
    assert_eq!(code, ResultCode::Dummy);

    node.store().merge_dir(node.node.clock().get_time()).await?;
    assert_eq!(node.store().list_dir("words").await, vec!["words/one", "words/two"]);
    assert!(!node.is_busy(), "Scratch state was left behind");

    let args = MapleJuiceTaskArgs::maple("grep", 1, "words", "input");
    let task = TaskDescription::new(&args, vec!["input/a.txt".to_string()], 1);
    let code = client.send(&StartMapleJuiceTask { task }).await?;
    assert_eq!(code, ResultCode::Fail);

    Ok(())
}

#[tokio::test]
async fn test_dropped_scheduler_cancels_running_task() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt::try_init();

    let node = start_node_with(100, &[], slow_registry()).await?;
    node.store()
        .put("input/a.txt", b"slow words\n".to_vec(), PutOptions::default())
        .await?;

    let client = RpcClient::<MapleJuiceService>::new(Channel::connect(node.node.me().rpc_addr()));
    let args = MapleJuiceTaskArgs::maple("slowcount", 1, "words", "input");
    let task = TaskDescription::new(&args, vec!["input/a.txt".to_string()], 0);
    let running = tokio::spawn(async move { client.send(&StartMapleJuiceTask { task }).await });

    let busy = async {
        while !node.is_busy() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), busy).await?;

    let TestNode {
        scheduler,
        store,
        node: ring_node,
        dir: _dir,
    } = node;
    drop(scheduler);

    let status = running
        .await?
        .expect_err("A cancelled task must not report completion");
    assert_eq!(status.code, ErrorCode::ServiceUnavailable, "{status}");

    // Nothing was pushed for the cancelled task.
    store.handle().merge_dir(ring_node.clock().get_time()).await?;
    assert!(store.handle().list_dir("words").await.is_empty());

    Ok(())
}
