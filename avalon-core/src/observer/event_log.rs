use std::{
    fs,
    mem,
    path::{
        Path,
        PathBuf,
    },
    sync::Mutex,
};

use anyhow::Result;
use avalon_data::{
    EventRecord,
    EventType,
};
use serde_json::Value;

use crate::error::WrapResultError;

/// Reads a JSON array file, or treats a missing file as an empty array, matching
/// `observer.py`'s `_append_to_archive_file` initialization behavior.
fn read_json_array(path: &Path) -> Result<Vec<Value>> {
    match fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes).wrap_error_with_message("corrupt log file")?),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).wrap_error_with_message("reading log file"),
    }
}

/// Appends `value` to the JSON array at `path`, durably.
///
/// Reads the current array, appends, serializes to `<path>.tmp`, then renames over `path`. A
/// crash between these steps leaves either the pre- or post-append state on disk, never a torn
/// file, per `spec.md` §4.1's durability rule.
fn append_json_array_atomic(path: &Path, value: Value) -> Result<()> {
    let mut records = read_json_array(path)?;
    records.push(value);
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, serde_json::to_vec(&records)?).wrap_error_with_message("writing tmp log file")?;
    fs::rename(&tmp_path, path).wrap_error_with_message("renaming tmp log file into place")?;
    Ok(())
}

/// Per-battle file layout on disk, per `spec.md` §6.
pub struct ObserverPaths {
    pub public: PathBuf,
    pub archive: PathBuf,
    pub private: Vec<PathBuf>,
}

impl ObserverPaths {
    pub fn new(dir: &Path, battle_id: &str) -> Self {
        Self {
            public: dir.join(format!("public_game_{battle_id}.json")),
            archive: dir.join(format!("archive_game_{battle_id}.json")),
            private: (1..=7)
                .map(|p| dir.join(format!("private_player_{p}_game_{battle_id}.json")))
                .collect(),
        }
    }
}

/// Whether an event type is part of the public, player-visible trace.
///
/// `PrivateSpeech` and the `tokens`/LLM-accounting events are archive-only; everything else is
/// both public and archived, matching the public/private/archive split described in
/// `observer.py`.
fn is_public(event_type: EventType) -> bool {
    !matches!(event_type, EventType::PrivateSpeech | EventType::Tokens)
}

/// Records one battle's timeline to disk and surfaces a live, drain-on-read tail.
///
/// Owned exclusively by the worker driving this battle's referee for the battle's lifetime;
/// external readers (the snapshot-drain poller) only ever see in-memory copies, never the file
/// directly, per `spec.md` §3's ownership rule.
pub struct Observer {
    battle_id: String,
    paths: ObserverPaths,
    snapshots: Mutex<Vec<EventRecord>>,
}

impl Observer {
    pub fn new(dir: &Path, battle_id: String) -> Self {
        let paths = ObserverPaths::new(dir, &battle_id);
        Self {
            battle_id,
            paths,
            snapshots: Mutex::new(Vec::new()),
        }
    }

    pub fn battle_id(&self) -> &str {
        &self.battle_id
    }

    /// Appends a record atomically to the archive (and, if public, the public trace), and
    /// pushes a copy into the in-memory snapshot queue.
    ///
    /// Safe under concurrent callers: the snapshot queue is guarded by a mutex, and each disk
    /// append is independently atomic. One writer is typical, but a cancellation path may race
    /// with the in-flight referee worker to emit a final `game_terminated` record.
    pub fn record(&self, event_type: EventType, event_data: Value) -> Result<()> {
        let record = EventRecord::new(event_type, event_data);
        let value = serde_json::to_value(&record)?;
        append_json_array_atomic(&self.paths.archive, value.clone())?;
        if is_public(event_type) {
            append_json_array_atomic(&self.paths.public, value)?;
        }
        self.snapshots.lock().unwrap().push(record);
        Ok(())
    }

    /// Appends a record to one player's private scratch file only (LLM history, call counts).
    /// Never touches the public trace or snapshot queue.
    pub fn record_private(&self, position: u8, value: Value) -> Result<()> {
        let path = self
            .paths
            .private
            .get(position as usize - 1)
            .ok_or_else(|| anyhow::anyhow!("position {position} out of range"))?;
        append_json_array_atomic(path, value)
    }

    /// Returns and clears the in-memory tail. A second back-to-back call returns an empty
    /// sequence, per `spec.md` §8.
    pub fn drain_snapshots(&self) -> Vec<EventRecord> {
        mem::take(&mut *self.snapshots.lock().unwrap())
    }

    /// Ensures every backing file exists and is a valid JSON array, creating empty ones as
    /// needed. Called once the battle reaches a terminal status.
    pub fn finalize(&self) -> Result<()> {
        for path in std::iter::once(&self.paths.public)
            .chain(std::iter::once(&self.paths.archive))
            .chain(self.paths.private.iter())
        {
            if !path.exists() {
                fs::write(path, b"[]").wrap_error_with_message("initializing log file")?;
            }
        }
        Ok(())
    }
}
