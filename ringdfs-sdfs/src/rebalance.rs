use std::time::Duration;

use futures::StreamExt;
use ringdfs_node::{in_ownership_range, MembershipChange, Node};
use ringdfs_rpc::ErrorCode;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::filelist::FileRecord;
use crate::rpc::{GetTimeStamp, StoreFileToLocal};
use crate::store::FileStoreHandle;
use crate::ResultCode;

const STARTING_RETRIES: usize = 10;
const STARTING_BACKOFF: Duration = Duration::from_millis(100);

/// Keeps the local replicas in line with the ring as members come and go.
pub(crate) async fn watch_membership_changes(
    store: FileStoreHandle,
    changes: broadcast::Receiver<MembershipChange>,
) {
    let mut changes = BroadcastStream::new(changes);

    // The change which admitted this node fired before the store existed.
    initial_sync(&store).await;

    while let Some(change) = changes.next().await {
        match change {
            Ok(change) => on_membership_change(&store, change).await,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(missed = missed, "File store fell behind the membership changes, resyncing.");
                store.remaster_own_range();
            },
        }

        duplicate_replica(&store).await;

        if let Err(e) = delete_redundant_files(&store) {
            error!(error = ?e, "Failed to remove redundant replicas.");
        }
    }
}

/// Takes over the own range and hands the local files to the neighbours.
async fn initial_sync(store: &FileStoreHandle) {
    let me = store.node().me().id;
    store.remaster_own_range();

    let ring = store.node().ring();
    if let Some((prev, next)) = ring.neighbours(me) {
        let neighbours = [prev, next]
            .into_iter()
            .filter(|id| *id != me)
            .filter_map(|id| ring.get_node(id))
            .collect::<Vec<_>>();
        for node in neighbours.iter() {
            on_node_joined(store, node).await;
        }
    }

    duplicate_replica(store).await;
    debug!(
        node_id = me,
        num_files = store.local().records().len(),
        "Finished initial replica sync."
    );
}

async fn on_membership_change(store: &FileStoreHandle, change: MembershipChange) {
    for node in change.joined {
        on_node_joined(store, &node).await;
    }

    if !change.left.is_empty() {
        let left = change.left.iter().map(|n| n.id).collect::<Vec<_>>();
        debug!(left = ?left, "Taking over the files of departed members.");
        store.remaster_own_range();
    }
}

async fn on_node_joined(store: &FileStoreHandle, node: &Node) {
    let ring = store.node().ring();
    let me = store.node().me().id;
    let Some((prev, _)) = ring.neighbours(node.id) else {
        return;
    };

    let moved = store
        .local()
        .update_master_id(node.id, |r| in_ownership_range(r.hash_id, prev, node.id));
    if moved > 0 {
        info!(node_id = node.id, num_files = moved, "Files moved to new master.");
    }

    let Some((my_prev, my_next)) = ring.neighbours(me) else {
        return;
    };

    let targets = std::slice::from_ref(node);
    if my_next == node.id {
        for record in store.local().owned_records(me) {
            send_file_if_necessary(store, &record, targets).await;
        }
    }

    if my_prev == node.id {
        for record in store.local().owned_records(node.id) {
            send_file_if_necessary(store, &record, targets).await;
        }
    }
}

/// Makes sure the successors of this node hold the files it masters.
pub(crate) async fn duplicate_replica(store: &FileStoreHandle) {
    let me = store.node().me().id;
    let num_successors = store.config().replication_factor.saturating_sub(1);
    let successors = store.node().ring().get_next_k_nodes(me, num_successors);

    for record in store.local().owned_records(me) {
        send_file_if_necessary(store, &record, &successors).await;
    }
}

/// Drops the files which hash outside of the ranges this node replicates.
///
/// Nothing is removed while the ring is smaller than the replication
/// factor, every node replicates every file then.
pub(crate) fn delete_redundant_files(store: &FileStoreHandle) -> Result<(), crate::SdfsError> {
    let me = store.node().me().id;
    let rf = store.config().replication_factor;
    let prev = store.node().ring().get_prev_k_nodes(me, rf);
    if rf == 0 || prev.len() < rf {
        return Ok(());
    }

    let removed = store.local().delete_out_of_range(prev[rf - 1].id, me)?;
    if !removed.is_empty() {
        info!(num_files = removed.len(), files = ?removed, "Removed redundant replicas.");
    }

    Ok(())
}

/// Asks the targets for their version of the record.
///
/// Returns the targets which hold an older version or none at all. A node
/// which has joined but not yet started its file store is asked again.
async fn stale_replicas(
    store: &FileStoreHandle,
    record: &FileRecord,
    targets: &[Node],
) -> Vec<Node> {
    let probe = GetTimeStamp {
        sdfs_name: record.sdfs_name.clone(),
    };

    let mut stale = Vec::new();
    let mut pending = targets.to_vec();
    for attempt in 0..=STARTING_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(STARTING_BACKOFF).await;
        }

        let replies = store
            .fan_out(&pending, &probe, store.config().probe_timeout)
            .await;

        pending.clear();
        for (node, result) in replies {
            match result {
                Ok(None) => stale.push(node),
                Ok(Some(timestamp)) if timestamp < record.timestamp => stale.push(node),
                Ok(Some(_)) => {},
                Err(e) if e.code == ErrorCode::ServiceUnavailable => pending.push(node),
                Err(e) => {
                    debug!(
                        target_node = node.id,
                        error = %e,
                        sdfs_name = %record.sdfs_name,
                        "Replica did not report its version."
                    );
                },
            }
        }

        if pending.is_empty() {
            break;
        }
    }

    for node in pending {
        debug!(
            target_node = node.id,
            sdfs_name = %record.sdfs_name,
            "Replica store did not start in time."
        );
    }

    stale
}

/// Pushes the record to the targets which hold an older version, or none at all.
async fn send_file_if_necessary(store: &FileStoreHandle, record: &FileRecord, targets: &[Node]) {
    if targets.is_empty() {
        return;
    }

    let stale = stale_replicas(store, record, targets).await;
    if stale.is_empty() {
        return;
    }

    let content = match tokio::fs::read(&record.local_path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(error = ?e, sdfs_name = %record.sdfs_name, "Failed to read local replica.");
            return;
        },
    };

    let msg = StoreFileToLocal {
        master_node_id: record.master_node_id,
        sdfs_name: record.sdfs_name.clone(),
        timestamp: record.timestamp,
        content,
        append: false,
        tmp: false,
    };

    for (node, result) in store
        .fan_out(&stale, &msg, store.config().write_timeout)
        .await
    {
        match result {
            Ok(ResultCode::Success) => {
                debug!(target_node = node.id, sdfs_name = %record.sdfs_name, "Replicated file.");
            },
            Ok(code) => {
                warn!(
                    target_node = node.id,
                    code = ?code,
                    sdfs_name = %record.sdfs_name,
                    "Replica rejected file."
                );
            },
            Err(e) => {
                warn!(
                    target_node = node.id,
                    error = %e,
                    sdfs_name = %record.sdfs_name,
                    "Failed to replicate file."
                );
            },
        }
    }
}
