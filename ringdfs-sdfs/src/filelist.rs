use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use parking_lot::Mutex;
use ringdfs_node::{hash_id, in_ownership_range, NodeId};

use crate::SdfsError;

const FINAL_DIR: &str = "files";
const TMP_DIR: &str = "tmp";

#[derive(Debug, Clone, PartialEq, Eq)]
/// The metadata of a file held by this node.
pub struct FileRecord {
    /// The ring position of the file name.
    pub hash_id: NodeId,
    pub sdfs_name: String,
    /// Where the bytes live on the local disk.
    pub local_path: PathBuf,
    /// The version of the file, in milliseconds.
    pub timestamp: u64,
    /// The node which is responsible for keeping the replicas up to date.
    pub master_node_id: NodeId,
    /// If the record is a shard waiting to be merged into the final file.
    pub tmp: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// How bytes are written to the local store.
pub struct StoreMode {
    /// Append to the existing file rather than replacing it.
    pub append: bool,
    /// Write to the temporary shard of the name.
    pub tmp: bool,
}

#[derive(Default)]
struct Records {
    files: BTreeMap<String, FileRecord>,
    tmp: BTreeMap<String, FileRecord>,
}

impl Records {
    fn map_mut(&mut self, tmp: bool) -> &mut BTreeMap<String, FileRecord> {
        if tmp {
            &mut self.tmp
        } else {
            &mut self.files
        }
    }
}

/// The files replicated onto this node.
///
/// Final files and temporary shards are tracked separately, a shard and a
/// final file may share a name until the shard is merged.
pub struct FileList {
    root: PathBuf,
    records: Mutex<Records>,
}

impl FileList {
    /// Opens an empty store within the given directory.
    ///
    /// Any data left in the directory from a previous run is discarded,
    /// a restarted node receives its replicas again from the cluster.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        for dir in [FINAL_DIR, TMP_DIR] {
            let path = root.join(dir);
            if path.exists() {
                fs::remove_dir_all(&path)?;
            }
            fs::create_dir_all(&path)?;
        }

        Ok(Self {
            root,
            records: Mutex::new(Records::default()),
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn local_path(&self, name: &str, tmp: bool) -> PathBuf {
        let dir = if tmp { TMP_DIR } else { FINAL_DIR };
        self.root.join(dir).join(name)
    }

    /// Writes the bytes of a file and records its metadata.
    pub fn store(
        &self,
        name: &str,
        master_node_id: NodeId,
        timestamp: u64,
        content: &[u8],
        mode: StoreMode,
    ) -> Result<(), SdfsError> {
        validate_name(name)?;

        let local_path = self.local_path(name, mode.tmp);
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(mode.append)
            .truncate(!mode.append)
            .open(&local_path)?;
        file.write_all(content)?;

        let record = FileRecord {
            hash_id: hash_id(name),
            sdfs_name: name.to_string(),
            local_path,
            timestamp,
            master_node_id,
            tmp: mode.tmp,
        };
        self.records
            .lock()
            .map_mut(mode.tmp)
            .insert(name.to_string(), record);

        Ok(())
    }

    /// The record of a final file.
    pub fn get(&self, name: &str) -> Option<FileRecord> {
        self.records.lock().files.get(name).cloned()
    }

    pub fn get_tmp(&self, name: &str) -> Option<FileRecord> {
        self.records.lock().tmp.get(name).cloned()
    }

    /// Reads the bytes of a final file.
    pub fn read(&self, name: &str) -> Result<Option<Vec<u8>>, SdfsError> {
        match self.get(name) {
            None => Ok(None),
            Some(record) => Ok(Some(fs::read(record.local_path)?)),
        }
    }

    /// The version of a final file.
    pub fn timestamp(&self, name: &str) -> Option<u64> {
        self.records.lock().files.get(name).map(|r| r.timestamp)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.lock().files.contains_key(name)
    }

    /// Removes a final file, returns `false` if it did not exist.
    pub fn delete(&self, name: &str) -> Result<bool, SdfsError> {
        let removed = self.records.lock().files.remove(name);
        match removed {
            None => Ok(false),
            Some(record) => {
                remove_file(&record.local_path)?;
                Ok(true)
            },
        }
    }

    /// The names of the final files whose hash lies within `(after, upto]`.
    pub fn files_in_range(&self, after: NodeId, upto: NodeId) -> Vec<String> {
        self.records
            .lock()
            .files
            .values()
            .filter(|r| in_ownership_range(r.hash_id, after, upto))
            .map(|r| r.sdfs_name.clone())
            .collect()
    }

    /// Removes every final file whose hash lies outside `(after, upto]`.
    pub fn delete_out_of_range(
        &self,
        after: NodeId,
        upto: NodeId,
    ) -> Result<Vec<String>, SdfsError> {
        let removed = {
            let mut records = self.records.lock();
            let (keep, removed) = std::mem::take(&mut records.files)
                .into_iter()
                .partition::<BTreeMap<_, _>, _>(|(_, r)| {
                    in_ownership_range(r.hash_id, after, upto)
                });
            records.files = keep;
            removed
        };

        for record in removed.values() {
            remove_file(&record.local_path)?;
        }

        Ok(removed.into_keys().collect())
    }

    /// Sets the master of every record matching the predicate.
    ///
    /// Returns the number of updated records.
    pub fn update_master_id(
        &self,
        master_node_id: NodeId,
        predicate: impl Fn(&FileRecord) -> bool,
    ) -> usize {
        let mut records = self.records.lock();
        let mut updated = 0;
        for record in records.files.values_mut() {
            if predicate(record) && record.master_node_id != master_node_id {
                record.master_node_id = master_node_id;
                updated += 1;
            }
        }
        updated
    }

    /// The final files mastered by the given node.
    pub fn owned_records(&self, master_node_id: NodeId) -> Vec<FileRecord> {
        self.records
            .lock()
            .files
            .values()
            .filter(|r| r.master_node_id == master_node_id)
            .cloned()
            .collect()
    }

    /// All final records in name order.
    pub fn records(&self) -> Vec<FileRecord> {
        self.records.lock().files.values().cloned().collect()
    }

    /// The final files within the directory, including nested ones.
    pub fn list_in_dir(&self, dir: &str) -> Vec<String> {
        self.list_with_prefix(&dir_prefix(dir))
    }

    pub fn list_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.records
            .lock()
            .files
            .range(prefix.to_string()..)
            .take_while(|(name, _)| name.starts_with(prefix))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Removes every final file within the directory.
    pub fn delete_dir(&self, dir: &str) -> Result<usize, SdfsError> {
        let names = self.list_in_dir(dir);
        let mut removed = 0;
        for name in names {
            if self.delete(&name)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Appends every temporary shard to its final file.
    ///
    /// Merged files take the given timestamp and the shards are removed.
    /// A shard whose final file does not exist yet becomes the final file.
    pub fn merge_tmp_files(&self, timestamp: u64) -> Result<usize, SdfsError> {
        let shards = std::mem::take(&mut self.records.lock().tmp);
        let num_shards = shards.len();

        for (name, shard) in shards {
            let content = fs::read(&shard.local_path)?;
            let master_node_id = self
                .get(&name)
                .map(|r| r.master_node_id)
                .unwrap_or(shard.master_node_id);

            self.store(
                &name,
                master_node_id,
                timestamp,
                &content,
                StoreMode {
                    append: true,
                    tmp: false,
                },
            )?;
            remove_file(&shard.local_path)?;
        }

        Ok(num_shards)
    }
}

fn remove_file(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// The name prefix shared by every file within the directory.
pub fn dir_prefix(dir: &str) -> String {
    format!("{}/", dir.trim_end_matches('/'))
}

/// Checks a file name is a relative path which stays within the store.
pub fn validate_name(name: &str) -> Result<(), SdfsError> {
    let invalid = || SdfsError::InvalidName(name.to_string());

    if name.is_empty() || name.starts_with('/') || name.contains('\\') {
        return Err(invalid());
    }

    if name.split('/').any(|part| part.is_empty()) {
        return Err(invalid());
    }

    let all_normal = Path::new(name)
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !all_normal || name.split('/').any(|part| part == "." || part == "..") {
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overwrite() -> StoreMode {
        StoreMode::default()
    }

    fn append() -> StoreMode {
        StoreMode {
            append: true,
            tmp: false,
        }
    }

    fn tmp_append() -> StoreMode {
        StoreMode {
            append: true,
            tmp: true,
        }
    }

    #[test]
    fn test_store_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();

        files.store("f1", 3, 100, b"hello", overwrite()).unwrap();
        assert_eq!(files.read("f1").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(files.timestamp("f1"), Some(100));

        files.store("f1", 3, 200, b"world", overwrite()).unwrap();
        assert_eq!(files.read("f1").unwrap(), Some(b"world".to_vec()));
        assert_eq!(files.timestamp("f1"), Some(200));

        files.store("f1", 3, 300, b"!", append()).unwrap();
        assert_eq!(files.read("f1").unwrap(), Some(b"world!".to_vec()));
        assert_eq!(files.timestamp("f1"), Some(300));

        let record = files.get("f1").unwrap();
        assert_eq!(record.hash_id, hash_id("f1"));
        assert_eq!(record.master_node_id, 3);
        assert!(!record.tmp);

        assert_eq!(files.read("missing").unwrap(), None);
        assert_eq!(files.timestamp("missing"), None);
    }

    #[test]
    fn test_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();

        files.store("out/a", 1, 1, b"1\n", overwrite()).unwrap();
        files.store("out/b", 1, 1, b"2\n", overwrite()).unwrap();
        files.store("out/nested/c", 1, 1, b"3\n", overwrite()).unwrap();
        files.store("outer", 1, 1, b"4\n", overwrite()).unwrap();

        assert_eq!(
            files.list_in_dir("out"),
            vec!["out/a", "out/b", "out/nested/c"]
        );
        assert_eq!(files.list_in_dir("out/"), files.list_in_dir("out"));
        assert_eq!(files.list_with_prefix("out"), vec!["out/a", "out/b", "out/nested/c", "outer"]);

        assert_eq!(files.delete_dir("out").unwrap(), 3);
        assert_eq!(files.list_with_prefix(""), vec!["outer"]);
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "/abs", "a/../b", "..", ".", "a//b", "a/", "./a"] {
            assert!(
                matches!(validate_name(name), Err(SdfsError::InvalidName(_))),
                "{name:?} should be rejected"
            );
        }
        for name in ["a", "a/b", "a.txt", "dir/.hidden", "k%2Fv"] {
            assert!(validate_name(name).is_ok(), "{name:?} should be accepted");
        }

        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();
        assert!(files.store("../escape", 1, 1, b"", overwrite()).is_err());
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();

        files.store("f1", 1, 1, b"x", overwrite()).unwrap();
        let path = files.get("f1").unwrap().local_path;
        assert!(path.exists());

        assert!(files.delete("f1").unwrap());
        assert!(!path.exists());
        assert!(!files.delete("f1").unwrap());
    }

    #[test]
    fn test_tmp_shards_merge() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();

        files.store("out/k", 1, 10, b"existing\n", overwrite()).unwrap();
        files.store("out/k", 1, 20, b"a\n", tmp_append()).unwrap();
        files.store("out/k", 1, 30, b"b\n", tmp_append()).unwrap();
        files.store("out/new", 1, 30, b"c\n", tmp_append()).unwrap();

        // Shards are invisible until merged.
        assert_eq!(files.read("out/k").unwrap(), Some(b"existing\n".to_vec()));
        assert!(!files.contains("out/new"));
        assert!(files.get_tmp("out/k").is_some());

        assert_eq!(files.merge_tmp_files(99).unwrap(), 2);
        assert_eq!(
            files.read("out/k").unwrap(),
            Some(b"existing\na\nb\n".to_vec())
        );
        assert_eq!(files.read("out/new").unwrap(), Some(b"c\n".to_vec()));
        assert_eq!(files.timestamp("out/k"), Some(99));
        assert_eq!(files.timestamp("out/new"), Some(99));
        assert!(files.get_tmp("out/k").is_none());

        assert_eq!(files.merge_tmp_files(100).unwrap(), 0);
    }

    #[test]
    fn test_ranges_and_masters() {
        let dir = tempfile::tempdir().unwrap();
        let files = FileList::open(dir.path()).unwrap();

        let names = (0..50).map(|i| format!("file-{i}")).collect::<Vec<_>>();
        for name in names.iter() {
            files.store(name, 0, 1, b"x", overwrite()).unwrap();
        }

        let in_range = files.files_in_range(100, 600);
        for name in names.iter() {
            let hash = hash_id(name);
            assert_eq!(in_range.contains(name), hash > 100 && hash <= 600);
        }

        let updated = files.update_master_id(7, |r| in_ownership_range(r.hash_id, 100, 600));
        assert_eq!(updated, in_range.len());
        assert_eq!(files.owned_records(7).len(), in_range.len());
        assert_eq!(files.owned_records(0).len(), names.len() - in_range.len());

        let removed = files.delete_out_of_range(100, 600).unwrap();
        assert_eq!(removed.len(), names.len() - in_range.len());
        assert_eq!(files.records().len(), in_range.len());
    }

    #[test]
    fn test_open_discards_previous_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let files = FileList::open(dir.path()).unwrap();
            files.store("f1", 1, 1, b"x", overwrite()).unwrap();
        }

        let files = FileList::open(dir.path()).unwrap();
        assert!(files.records().is_empty());
        assert!(!dir.path().join(FINAL_DIR).join("f1").exists());
    }
}
