use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use ringdfs_sdfs::{FileStoreHandle, PutOptions, ResultCode};

use crate::apps::{App, AppRegistry, Juice, Maple};
use crate::keys::{decode_key, encode_key};
use crate::task::{TaskDescription, TaskPhase};
use crate::{JobError, MapleJuiceConfig};

/// The local directories a task works in.
struct Scratch {
    input_dir: PathBuf,
    /// A directory of key files for maple tasks, a single file for juice tasks.
    output: PathBuf,
}

impl Scratch {
    fn new(scratch_dir: &Path, task: &TaskDescription) -> Self {
        let output_name = encode_key(&task.output_path).unwrap_or_default();
        let suffix = format!("{}___{}___{}", task.task_id, task.attempt, output_name);
        Self {
            input_dir: scratch_dir.join(format!("input___{suffix}")),
            output: scratch_dir.join(format!("output___{suffix}")),
        }
    }

    async fn prepare(&self, phase: TaskPhase) -> io::Result<()> {
        self.cleanup().await?;
        tokio::fs::create_dir_all(&self.input_dir).await?;
        match phase {
            TaskPhase::Maple => tokio::fs::create_dir_all(&self.output).await,
            TaskPhase::Juice => {
                if let Some(parent) = self.output.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                Ok(())
            },
        }
    }

    async fn cleanup(&self) -> io::Result<()> {
        remove_path(&self.input_dir).await?;
        remove_path(&self.output).await
    }
}

async fn remove_path(path: &Path) -> io::Result<()> {
    let result = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) => Err(e),
    };

    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Runs a single task on this node.
///
/// The inputs are fetched from the store, processed by the registered app
/// and the results are appended to the temporary shards of the outputs,
/// which become visible once the master merges them.
pub(crate) async fn run_task(
    store: &FileStoreHandle,
    registry: &AppRegistry,
    config: &MapleJuiceConfig,
    task: &TaskDescription,
) -> Result<(), JobError> {
    let app = registry
        .get(&task.exe)
        .cloned()
        .ok_or_else(|| JobError::UnknownApp(task.exe.clone()))?;

    let scratch = Scratch::new(&config.scratch_dir, task);
    scratch.prepare(task.phase).await?;

    let result = run_in_scratch(store, &app, config, task, &scratch).await;

    if let Err(e) = scratch.cleanup().await {
        warn!(error = ?e, task_id = task.task_id, "Failed to remove scratch files.");
    }

    result
}

async fn run_in_scratch(
    store: &FileStoreHandle,
    app: &App,
    config: &MapleJuiceConfig,
    task: &TaskDescription,
    scratch: &Scratch,
) -> Result<(), JobError> {
    for name in task.input_files.iter() {
        let content = store.get(name).await?;
        let base_name = name.rsplit('/').next().unwrap_or(name);
        tokio::fs::write(scratch.input_dir.join(base_name), content).await?;
    }
    debug!(task_id = task.task_id, num_files = task.input_files.len(), "Fetched task inputs.");

    let input_dir = scratch.input_dir.clone();
    let output = scratch.output.clone();
    let batch_size = config.maple_batch_size.max(1);
    let computation = match task.phase {
        TaskPhase::Maple => {
            let maple = app.maple().clone();
            tokio::task::spawn_blocking(move || {
                run_maple(maple.as_ref(), &input_dir, &output, batch_size)
            })
        },
        TaskPhase::Juice => {
            let juice = app.juice().clone();
            tokio::task::spawn_blocking(move || run_juice(juice.as_ref(), &input_dir, &output))
        },
    };
    computation
        .await
        .map_err(|e| JobError::Panicked(e.to_string()))??;

    let options = PutOptions {
        force_update: true,
        append: true,
        tmp: true,
    };
    if tokio::fs::metadata(&scratch.output).await.is_ok() {
        let code = store
            .put_local(&scratch.output, &task.output_path, options)
            .await?;
        if code != ResultCode::Success {
            return Err(JobError::TaskFailed {
                worker: store.node().me().id,
                task_id: task.task_id,
            });
        }
    }

    info!(task_id = task.task_id, phase = %task.phase, "Task finished.");
    Ok(())
}

/// Input files in name order.
fn sorted_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Feeds every input file to the maple function in batches of lines and
/// appends each emitted value to the file of its key.
pub(crate) fn run_maple(
    maple: &dyn Maple,
    input_dir: &Path,
    output_dir: &Path,
    batch_size: usize,
) -> io::Result<()> {
    for path in sorted_files(input_dir)? {
        let reader = BufReader::new(File::open(&path)?);
        let mut batch = Vec::with_capacity(batch_size);

        for line in reader.lines() {
            batch.push(line?);
            if batch.len() == batch_size {
                write_pairs(output_dir, maple.map(&batch))?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            write_pairs(output_dir, maple.map(&batch))?;
        }
    }

    Ok(())
}

fn write_pairs(output_dir: &Path, pairs: BTreeMap<String, String>) -> io::Result<()> {
    for (key, value) in pairs {
        let Some(file_name) = encode_key(&key) else {
            continue;
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join(file_name))?;
        writeln!(file, "{value}")?;
    }
    Ok(())
}

/// Reduces every key file into a `key value` line of the output file.
pub(crate) fn run_juice(juice: &dyn Juice, input_dir: &Path, output_file: &Path) -> io::Result<()> {
    let files = sorted_files(input_dir)?;
    if files.is_empty() {
        return Ok(());
    }

    let mut output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_file)?;

    for path in files {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let key = decode_key(file_name);

        let content = fs::read_to_string(&path)?;
        let values = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect::<Vec<_>>();

        writeln!(output, "{key} {}", juice.reduce(&key, &values))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apps::{UrlPercent, WordCount};
    use crate::task::MapleJuiceTaskArgs;

    #[tokio::test]
    async fn test_scratch_is_unique_per_attempt() -> anyhow::Result<()> {
        let scratch_dir = tempfile::tempdir()?;
        let args = MapleJuiceTaskArgs::maple("wordcount", 2, "words", "input");
        let files = vec!["input/a.txt".to_string()];
        let first = TaskDescription::new(&args, files.clone(), 0);
        let second = TaskDescription::new(&args, files, 1);

        let running = Scratch::new(scratch_dir.path(), &first);
        running.prepare(TaskPhase::Maple).await?;
        fs::write(running.input_dir.join("a.txt"), "still in use")?;

        // A redispatch of the same task to this node leaves the first attempt alone.
        let redispatched = Scratch::new(scratch_dir.path(), &second);
        assert_ne!(redispatched.input_dir, running.input_dir);
        assert_ne!(redispatched.output, running.output);
        redispatched.prepare(TaskPhase::Maple).await?;
        redispatched.cleanup().await?;

        assert_eq!(fs::read_to_string(running.input_dir.join("a.txt"))?, "still in use");
        assert!(running.output.is_dir());

        Ok(())
    }

    #[test]
    fn test_maple_writes_key_files() -> anyhow::Result<()> {
        let input = tempfile::tempdir()?;
        let output = tempfile::tempdir()?;
        fs::write(input.path().join("a.txt"), "the cat\nthe dog\n")?;
        fs::write(input.path().join("b.txt"), "a/b the\n")?;

        run_maple(&WordCount, input.path(), output.path(), 10)?;

        let the = fs::read_to_string(output.path().join("the"))?;
        let mut counts = the.lines().collect::<Vec<_>>();
        counts.sort();
        assert_eq!(counts, vec!["1", "2"]);
        assert_eq!(fs::read_to_string(output.path().join("a%2Fb"))?, "1\n");

        Ok(())
    }

    #[test]
    fn test_maple_batches_lines() -> anyhow::Result<()> {
        let input = tempfile::tempdir()?;
        let output = tempfile::tempdir()?;
        let lines = (0..25).map(|_| "word\n").collect::<String>();
        fs::write(input.path().join("words.txt"), lines)?;

        run_maple(&WordCount, input.path(), output.path(), 10)?;

        let counts = fs::read_to_string(output.path().join("word"))?;
        assert_eq!(counts, "10\n10\n5\n");

        Ok(())
    }

    #[test]
    fn test_juice_reduces_key_files() -> anyhow::Result<()> {
        let input = tempfile::tempdir()?;
        let output = tempfile::tempdir()?;
        fs::write(input.path().join("the"), "2\n1\n\n")?;
        fs::write(input.path().join("a%2Fb"), " 4 \n")?;

        let output_file = output.path().join("result");
        run_juice(&WordCount, input.path(), &output_file)?;

        assert_eq!(fs::read_to_string(&output_file)?, "a/b 4\nthe 3\n");

        Ok(())
    }

    #[test]
    fn test_juice_with_url_percent() -> anyhow::Result<()> {
        let input = tempfile::tempdir()?;
        let output = tempfile::tempdir()?;
        fs::write(input.path().join("allurl"), "/a 1___/b 3\n")?;

        let output_file = output.path().join("result");
        run_juice(&UrlPercent, input.path(), &output_file)?;

        assert_eq!(
            fs::read_to_string(&output_file)?,
            "allurl /a 25.00%, /b 75.00%\n"
        );

        Ok(())
    }

    #[test]
    fn test_juice_without_inputs_writes_nothing() -> anyhow::Result<()> {
        let input = tempfile::tempdir()?;
        let output = tempfile::tempdir()?;

        let output_file = output.path().join("result");
        run_juice(&WordCount, input.path(), &output_file)?;
        assert!(!output_file.exists());

        Ok(())
    }
}
