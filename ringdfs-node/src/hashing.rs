use crate::NodeId;

/// The number of positions on the ring.
pub const RING_CAPACITY: u32 = 1024;

/// Hashes a key onto the ring.
///
/// Node ids and file placement share this function, so a file named
/// `x` and a node addressed as `x` land on the same position.
pub fn hash_id(key: &str) -> NodeId {
    crc32fast::hash(key.as_bytes()) % RING_CAPACITY
}

/// Returns if `id` lies within the closed circular interval `[start, end]`.
///
/// An interval where `start > end` wraps past the end of the ring and
/// `start == end` only holds `start` itself.
pub fn in_circle_range(id: NodeId, start: NodeId, end: NodeId) -> bool {
    if start <= end {
        start <= id && id <= end
    } else {
        start <= id || id <= end
    }
}

/// Returns if `id` lies within the half open circular interval `(after, upto]`.
///
/// This is the ownership range of a node given its predecessor,
/// `after == upto` covers the whole ring as the node is alone.
pub fn in_ownership_range(id: NodeId, after: NodeId, upto: NodeId) -> bool {
    if after == upto {
        return true;
    }

    if after < upto {
        after < id && id <= upto
    } else {
        after < id || id <= upto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_within_capacity() {
        for key in ["testname1", "127.0.0.1:8000", "", "d/f"] {
            assert!(hash_id(key) < RING_CAPACITY);
        }
        assert_eq!(hash_id("testname1"), hash_id("testname1"));
    }

    #[test]
    fn test_circle_range() {
        assert!(in_circle_range(5, 1, 10));
        assert!(in_circle_range(1, 1, 10));
        assert!(in_circle_range(10, 1, 10));
        assert!(!in_circle_range(11, 1, 10));

        assert!(in_circle_range(1020, 1000, 3));
        assert!(in_circle_range(2, 1000, 3));
        assert!(!in_circle_range(500, 1000, 3));

        assert!(in_circle_range(7, 7, 7));
        assert!(!in_circle_range(8, 7, 7));
    }

    #[test]
    fn test_ownership_range() {
        assert!(in_ownership_range(5, 4, 5));
        assert!(!in_ownership_range(4, 4, 5));
        assert!(in_ownership_range(0, 1000, 3));
        assert!(in_ownership_range(1023, 1000, 3));
        assert!(!in_ownership_range(1000, 1000, 3));
        assert!(in_ownership_range(42, 9, 9), "single node owns the ring");
    }
}
