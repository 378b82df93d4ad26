use ringdfs_node::{hash_id, MembershipRing, NodeId};

use crate::task::TaskPhase;

/// Picks the workers of a job, walking the ring clockwise from the master.
///
/// The number of workers is clamped to `[1, ring size]`, the master only
/// works itself once every other member has been picked.
pub fn choose_workers(ring: &MembershipRing, master: NodeId, num_workers: usize) -> Vec<NodeId> {
    let size = ring.size();
    if size == 0 {
        return Vec::new();
    }

    let num_workers = num_workers.clamp(1, size);
    let mut workers = ring
        .get_next_k_nodes(master, num_workers)
        .into_iter()
        .map(|node| node.id)
        .collect::<Vec<_>>();

    if workers.len() < num_workers {
        workers.push(master);
    }
    workers
}

/// Splits the files into one partition per worker.
///
/// Maple input is spread by hash, juice input is cut into contiguous ranges.
pub fn partition(phase: TaskPhase, files: &[String], num_partitions: usize) -> Vec<Vec<String>> {
    match phase {
        TaskPhase::Maple => partition_hash(files, num_partitions),
        TaskPhase::Juice => partition_range(files, num_partitions),
    }
}

/// Places each file in partition `hash(file) mod n`.
pub fn partition_hash(files: &[String], num_partitions: usize) -> Vec<Vec<String>> {
    let mut partitions = vec![Vec::new(); num_partitions];
    if num_partitions == 0 {
        return partitions;
    }

    for file in files {
        let bucket = hash_id(file) as usize % num_partitions;
        partitions[bucket].push(file.clone());
    }
    partitions
}

/// Cuts the files into `n` contiguous chunks of `F / n` files, the first
/// `F mod n` chunks take one file more.
pub fn partition_range(files: &[String], num_partitions: usize) -> Vec<Vec<String>> {
    if num_partitions == 0 {
        return Vec::new();
    }

    let min_files = files.len() / num_partitions;
    let extra = files.len() % num_partitions;

    let mut remaining = files;
    (0..num_partitions)
        .map(|i| {
            let len = min_files + usize::from(i < extra);
            let (chunk, rest) = remaining.split_at(len);
            remaining = rest;
            chunk.to_vec()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use ringdfs_node::Node;

    use super::*;

    fn ring_of(ids: &[NodeId]) -> MembershipRing {
        let ring = MembershipRing::new(ids[0]);
        for (i, id) in ids.iter().enumerate() {
            let addr: SocketAddr = format!("127.0.0.1:{}", 9000 + i).parse().unwrap();
            ring.insert_node(Node::new(*id, addr, 10000 + i as u16, "localhost".to_string()))
                .unwrap();
        }
        ring
    }

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("input/{i:03}")).collect()
    }

    #[test]
    fn test_choose_workers_walks_successors() {
        let ring = ring_of(&[10, 20, 30, 40]);

        assert_eq!(choose_workers(&ring, 10, 2), vec![20, 30]);
        assert_eq!(choose_workers(&ring, 30, 2), vec![40, 10]);
        assert_eq!(choose_workers(&ring, 10, 3), vec![20, 30, 40]);
    }

    #[test]
    fn test_choose_workers_includes_master_last() {
        let ring = ring_of(&[10, 20, 30, 40]);
        assert_eq!(choose_workers(&ring, 10, 4), vec![20, 30, 40, 10]);
        assert_eq!(choose_workers(&ring, 10, 100), vec![20, 30, 40, 10]);
    }

    #[test]
    fn test_choose_workers_clamps_to_one() {
        let ring = ring_of(&[10, 20]);
        assert_eq!(choose_workers(&ring, 10, 0), vec![20]);

        let ring = ring_of(&[10]);
        assert_eq!(choose_workers(&ring, 10, 3), vec![10]);
    }

    #[test]
    fn test_partition_hash() {
        let files = files(50);
        let partitions = partition_hash(&files, 4);

        assert_eq!(partitions.len(), 4);
        assert_eq!(partitions.iter().map(Vec::len).sum::<usize>(), 50);
        for (bucket, partition) in partitions.iter().enumerate() {
            for file in partition {
                assert_eq!(hash_id(file) as usize % 4, bucket);
            }
        }
    }

    #[test]
    fn test_partition_range() {
        let files = files(10);
        let partitions = partition_range(&files, 4);

        let sizes = partitions.iter().map(Vec::len).collect::<Vec<_>>();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
        assert_eq!(partitions.concat(), files);
    }

    #[test]
    fn test_partition_range_more_workers_than_files() {
        let files = files(2);
        let partitions = partition_range(&files, 4);

        let sizes = partitions.iter().map(Vec::len).collect::<Vec<_>>();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_partition_by_phase() {
        let files = files(6);
        assert_eq!(partition(TaskPhase::Juice, &files, 3), partition_range(&files, 3));
        assert_eq!(partition(TaskPhase::Maple, &files, 3), partition_hash(&files, 3));
    }
}
