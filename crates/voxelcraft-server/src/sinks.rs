//! File-backed sinks.
//!
//! Each world gets a directory with a `snapshots/` folder (one JSON file
//! per archived tick), `audit.jsonl` and `ticks.jsonl`. Writers run as
//! their own tasks and drain until every sender is dropped, so the world
//! owner never waits on disk.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use voxelcraft_core::{AuditEntry, Sinks, SnapshotV1, TickEntry};

use crate::error::ServerError;

const SNAPSHOT_PREFIX: &str = "snapshot_";
const SNAPSHOT_SUFFIX: &str = ".json";

/// Snapshot file name for `tick`; zero-padded so names sort by tick.
pub fn snapshot_file_name(tick: u64) -> String {
    format!("{SNAPSHOT_PREFIX}{tick:020}{SNAPSHOT_SUFFIX}")
}

fn parse_snapshot_tick(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?
        .parse()
        .ok()
}

/// Writer tasks for one world.
#[derive(Debug)]
pub struct SinkWriters {
    tasks: Vec<JoinHandle<()>>,
}

impl SinkWriters {
    /// Wait for every writer to drain.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Sink writer ended abnormally");
            }
        }
    }
}

/// Create the world directory and start one writer per sink.
pub async fn open(dir: &Path, world_id: &str, buffer: usize) -> Result<(Sinks, SinkWriters), ServerError> {
    let snapshots_dir = dir.join("snapshots");
    fs::create_dir_all(&snapshots_dir)
        .await
        .map_err(|source| ServerError::Io {
            path: snapshots_dir.clone(),
            source,
        })?;

    let (snap_tx, snap_rx) = mpsc::channel(buffer);
    let (audit_tx, audit_rx) = mpsc::channel(buffer);
    let (tick_tx, tick_rx) = mpsc::channel(buffer);
    let tasks = vec![
        tokio::spawn(write_snapshots(snapshots_dir, world_id.to_owned(), snap_rx)),
        tokio::spawn(write_jsonl::<AuditEntry>(dir.join("audit.jsonl"), audit_rx)),
        tokio::spawn(write_jsonl::<TickEntry>(dir.join("ticks.jsonl"), tick_rx)),
    ];
    let sinks = Sinks {
        snapshots: Some(snap_tx),
        audit: Some(audit_tx),
        ticks: Some(tick_tx),
    };
    Ok((sinks, SinkWriters { tasks }))
}

async fn write_snapshots(dir: PathBuf, world_id: String, mut rx: mpsc::Receiver<SnapshotV1>) {
    while let Some(snap) = rx.recv().await {
        let tick = snap.tick();
        if let Err(e) = write_snapshot(&dir, &snap).await {
            warn!(world_id = %world_id, tick, error = %e, "Snapshot write failed");
            continue;
        }
        info!(world_id = %world_id, tick, "Snapshot written");
    }
    debug!(world_id = %world_id, "Snapshot writer stopped");
}

/// Write `snap` into `dir` under its tick's file name.
pub async fn write_snapshot(dir: &Path, snap: &SnapshotV1) -> Result<PathBuf, ServerError> {
    let path = dir.join(snapshot_file_name(snap.tick()));
    let bytes = snap.to_json().map_err(|source| ServerError::Snapshot {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, bytes).await.map_err(|source| ServerError::Io {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

async fn write_jsonl<T: Serialize>(path: PathBuf, mut rx: mpsc::Receiver<T>) {
    let mut file = match OpenOptions::new().create(true).append(true).open(&path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Log sink unavailable");
            // Keep draining so senders never see a closed channel.
            while rx.recv().await.is_some() {}
            return;
        }
    };
    while let Some(entry) = rx.recv().await {
        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Log entry encode failed");
                continue;
            }
        };
        line.push(b'\n');
        if let Err(e) = file.write_all(&line).await {
            warn!(path = %path.display(), error = %e, "Log write failed");
        }
    }
    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "Log flush failed");
    }
}

/// Newest snapshot file in `dir`, if any.
pub fn latest_snapshot(dir: &Path) -> Result<Option<PathBuf>, ServerError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ServerError::Io {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let newest = entries
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name();
            parse_snapshot_tick(name.to_str()?).map(|tick| (tick, e.path()))
        })
        .max_by_key(|(tick, _)| *tick);
    Ok(newest.map(|(_, path)| path))
}

/// Read and decode the snapshot at `path`.
pub fn load_snapshot(path: &Path) -> Result<SnapshotV1, ServerError> {
    let bytes = std::fs::read(path).map_err(|source| ServerError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    SnapshotV1::from_json(&bytes).map_err(|source| ServerError::Snapshot {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use voxelcraft_core::{World, WorldConfig};
    use voxelcraft_types::Vec3i;
    use voxelcraft_world::Catalogs;

    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("voxelcraft-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn world() -> World {
        World::new(WorldConfig::default(), Arc::new(Catalogs::builtin().unwrap())).unwrap()
    }

    #[test]
    fn snapshot_names_sort_by_tick() {
        assert!(snapshot_file_name(9) < snapshot_file_name(10));
        assert_eq!(parse_snapshot_tick(&snapshot_file_name(1234)), Some(1234));
        assert_eq!(parse_snapshot_tick("audit.jsonl"), None);
    }

    #[tokio::test]
    async fn writers_persist_every_sink() {
        let dir = scratch("sinks");
        let (sinks, writers) = open(&dir, "W", 8).await.unwrap();
        let w = world();
        sinks.snapshots.as_ref().unwrap().send(w.export_snapshot(7)).await.unwrap();
        let entry = w.audit_entry("A1", "SET_BLOCK", Vec3i::ZERO, "TEST");
        sinks.audit.as_ref().unwrap().send(entry).await.unwrap();
        drop(sinks);
        writers.join().await;

        let latest = latest_snapshot(&dir.join("snapshots")).unwrap().unwrap();
        assert!(latest.ends_with(snapshot_file_name(7)));
        let audit = std::fs::read_to_string(dir.join("audit.jsonl")).unwrap();
        assert_eq!(audit.lines().count(), 1);
        assert!(audit.contains("SET_BLOCK"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn newest_snapshot_is_found_and_decoded() {
        let dir = scratch("resume");
        std::fs::create_dir_all(&dir).unwrap();
        let src = world();
        write_snapshot(&dir, &src.export_snapshot(3)).await.unwrap();
        write_snapshot(&dir, &src.export_snapshot(11)).await.unwrap();
        let path = latest_snapshot(&dir).unwrap().unwrap();
        let snap = load_snapshot(&path).unwrap();
        assert_eq!(snap.tick(), 11);
        let mut dst = world();
        dst.import_snapshot(snap).unwrap();
        assert_eq!(dst.tick(), 12);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_directory_has_no_snapshot() {
        assert!(latest_snapshot(&scratch("missing")).unwrap().is_none());
    }
}
