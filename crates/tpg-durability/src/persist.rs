//! JSON-lines persistence of committed groups and snapshots
//!
//! Layout under the root directory:
//!
//! ```text
//! thread-0/group-0000000003.log   one LogRecord per line
//! snapshots/snapshot-0000000001.json
//! ```
//!
//! Every file is written to a temporary sibling, synced, then renamed into
//! place, so a reader sees either the old content or the complete new one.

use crate::error::{DurabilityError, DurabilityResult};
use crate::record::LogRecord;
use crate::snapshot::SnapshotDescriptor;
use crate::GroupId;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tpg_primitives::ThreadId;
use tpg_storage::StoreSnapshot;
use tracing::{debug, warn};

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    descriptor: SnapshotDescriptor,
    snapshot: StoreSnapshot,
}

/// Root directory of persisted logs
#[derive(Clone, Debug)]
pub struct LogDirectory {
    root: PathBuf,
}

impl LogDirectory {
    /// Open (creating if needed) a log directory
    pub fn open(root: impl AsRef<Path>) -> DurabilityResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("snapshots"))?;
        Ok(Self { root })
    }

    /// Root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn thread_dir(&self, thread: ThreadId) -> PathBuf {
        self.root.join(format!("thread-{}", thread))
    }

    /// Persist one thread's records of a group
    pub fn write_group(
        &self,
        thread: ThreadId,
        group: GroupId,
        records: &[LogRecord],
    ) -> DurabilityResult<()> {
        let dir = self.thread_dir(thread);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("group-{:010}.log", group));
        write_atomic(&dir, &path, |writer| {
            for record in records {
                serde_json::to_writer(&mut *writer, record)?;
                writer.write_all(b"\n")?;
            }
            Ok(())
        })?;
        debug!(thread, group, records = records.len(), "Persisted log group");
        Ok(())
    }

    /// Read one thread's groups newer than `after` in group order
    ///
    /// `None` reads every group.
    pub fn read_thread(
        &self,
        thread: ThreadId,
        after: Option<GroupId>,
    ) -> DurabilityResult<Vec<(GroupId, Vec<LogRecord>)>> {
        let dir = self.thread_dir(thread);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut groups = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(group) = parse_group(&path) else {
                continue;
            };
            if after.map_or(true, |a| group > a) {
                groups.push((group, read_records(&path)?));
            }
        }
        groups.sort_by_key(|(g, _)| *g);
        Ok(groups)
    }

    /// Threads that have a log directory
    pub fn threads(&self) -> DurabilityResult<Vec<ThreadId>> {
        let mut threads = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let name = entry?.file_name();
            if let Some(t) = name
                .to_str()
                .and_then(|n| n.strip_prefix("thread-"))
                .and_then(|n| n.parse().ok())
            {
                threads.push(t);
            }
        }
        threads.sort_unstable();
        Ok(threads)
    }

    /// Persist a snapshot
    pub fn write_snapshot(
        &self,
        descriptor: &SnapshotDescriptor,
        snapshot: &StoreSnapshot,
    ) -> DurabilityResult<()> {
        let dir = self.root.join("snapshots");
        let path = dir.join(format!("snapshot-{:010}.json", descriptor.snapshot_id));
        let file = SnapshotFile {
            descriptor: *descriptor,
            snapshot: snapshot.clone(),
        };
        write_atomic(&dir, &path, |writer| {
            serde_json::to_writer(&mut *writer, &file)?;
            Ok(())
        })
    }

    /// Read every readable snapshot
    ///
    /// A snapshot file that does not parse is skipped, so recovery falls
    /// back to an older snapshot or to the initial state.
    pub fn read_snapshots(&self) -> DurabilityResult<Vec<(SnapshotDescriptor, StoreSnapshot)>> {
        let mut snapshots = Vec::new();
        for entry in fs::read_dir(self.root.join("snapshots"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let reader = BufReader::new(File::open(&path)?);
            match serde_json::from_reader::<_, SnapshotFile>(reader) {
                Ok(file) => snapshots.push((file.descriptor, file.snapshot)),
                Err(e) => warn!(path = ?path, error = %e, "Skipping unreadable snapshot"),
            }
        }
        snapshots.sort_by_key(|(d, _)| d.snapshot_id);
        Ok(snapshots)
    }
}

fn write_atomic<F>(dir: &Path, path: &Path, write: F) -> DurabilityResult<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> DurabilityResult<()>,
{
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| DurabilityError::Io(e.error))?;
    Ok(())
}

fn parse_group(path: &Path) -> Option<GroupId> {
    path.file_name()?
        .to_str()?
        .strip_prefix("group-")?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

fn read_records(path: &Path) -> DurabilityResult<Vec<LogRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| DurabilityError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            reason: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}
