//! Hash-chained, append-only reference implementation of the §4.4
//! `Memory`/`RunStore` interfaces.
//!
//! Grounded in the teacher's `thought_chain::ThoughtChain`: every [`LogEntry`]
//! is SHA-256 hash-chained to the previous entry and persisted as one line of
//! newline-delimited JSON, append-only. Unlike `ThoughtChain` (which has no
//! run-status concept), this crate also keeps a small run-record table
//! alongside the event log, because §4.4 names both a `Memory` (event log)
//! and a `RunStore` (run metadata) interface and the teacher has no existing
//! analogue for the latter.
//!
//! This crate does not depend on `agentloom` — it ships its own `Event`/
//! `RunRecord` shapes matching §3/§6.5's stable serialization surface, so it
//! can be adopted independently of the core crate. `agentloom` depends on
//! `eventlog` (not the other way around) and adapts these shapes to its own
//! `Memory`/`RunStore` traits at the call site.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One append-only entry in the durable event log (§3 "Event", §6.5).
/// `data` MUST be JSON-encodable, matching the persistence contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub kind: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

/// One hash-chained line in the on-disk log: an [`Event`] plus the chain
/// metadata needed to detect tampering or truncation (mirrors
/// `thought_chain::Thought`'s `prev_hash`/`hash` pair).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: u64,
    pub event: Event,
    pub prev_hash: String,
    pub hash: String,
}

fn compute_hash(index: u64, event: &Event, prev_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(index.to_le_bytes());
    hasher.update(event.timestamp.to_rfc3339().as_bytes());
    hasher.update(event.kind.as_bytes());
    hasher.update(serde_json::to_vec(&event.data).unwrap_or_default());
    hasher.update(prev_hash.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Status of one run record (§4.4, §6.5), mirrored from the core's `RunStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Paused,
}

/// A run's metadata row, independent of its event log (§6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub agent_id: String,
    pub run_id: String,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A hash-chained, append-only event log for one `(agent_id, run_id)` pair,
/// persisted as `.jsonl` under a directory keyed by both ids (§4.4 `Memory`).
pub struct EventLog {
    entries: Vec<LogEntry>,
    file_path: PathBuf,
    auto_flush: bool,
}

impl EventLog {
    /// Open the log file for `(agent_id, run_id)` under `dir`, loading any
    /// previously persisted entries back into memory. Creates an empty log
    /// if the file does not yet exist.
    pub fn open(dir: &Path, agent_id: &str, run_id: &str) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file_path = dir.join(log_filename(agent_id, run_id));

        let entries = if file_path.exists() {
            let file = fs::File::open(&file_path)?;
            let reader = BufReader::new(file);
            let mut entries = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let entry: LogEntry = serde_json::from_str(&line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("corrupt event log line: {}", e)))?;
                entries.push(entry);
            }
            entries
        } else {
            Vec::new()
        };

        Ok(EventLog {
            entries,
            file_path,
            auto_flush: true,
        })
    }

    /// Append one event, hash-chaining it to the previous entry and, unless
    /// `set_auto_flush(false)` was called, writing it to disk immediately.
    pub fn append(&mut self, event: Event) -> io::Result<&LogEntry> {
        let index = self.entries.len() as u64;
        let prev_hash = self.entries.last().map(|e| e.hash.clone()).unwrap_or_default();
        let hash = compute_hash(index, &event, &prev_hash);
        let entry = LogEntry {
            index,
            event,
            prev_hash,
            hash,
        };

        if self.auto_flush {
            let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
            let json = serde_json::to_string(&entry)
                .map_err(|e| io::Error::other(format!("failed to serialize log entry: {}", e)))?;
            writeln!(file, "{}", json)?;
        }

        self.entries.push(entry);
        Ok(self.entries.last().unwrap())
    }

    /// Append every event in `events`, in order. §4.4's `AppendEvents` is
    /// defined over a batch; this is the batch form of [`EventLog::append`].
    pub fn append_all(&mut self, events: impl IntoIterator<Item = Event>) -> io::Result<()> {
        for event in events {
            self.append(event)?;
        }
        Ok(())
    }

    /// Verify every entry's hash matches its recomputed value and that the
    /// chain of `prev_hash`es is unbroken. `false` on the first mismatch.
    pub fn verify_integrity(&self) -> bool {
        let mut prev_hash = String::new();
        for entry in &self.entries {
            if entry.prev_hash != prev_hash {
                return false;
            }
            if entry.hash != compute_hash(entry.index, &entry.event, &entry.prev_hash) {
                return false;
            }
            prev_hash = entry.hash.clone();
        }
        true
    }

    /// All events currently in the log, in append order.
    pub fn events(&self) -> Vec<Event> {
        self.entries.iter().map(|e| e.event.clone()).collect()
    }

    pub fn set_auto_flush(&mut self, auto_flush: bool) {
        self.auto_flush = auto_flush;
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

fn log_filename(agent_id: &str, run_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(b"::");
    hasher.update(run_id.as_bytes());
    format!("{:x}.jsonl", hasher.finalize())
}

/// Append-only run-record table (§4.4 `RunStore`), persisted as one JSONL
/// file with the latest record per `(agent_id, run_id)` resolved by scanning
/// to the last matching line on load — a deliberately simple table; a
/// production store would index this.
pub struct RunTable {
    records: HashMap<(String, String), RunRecord>,
    file_path: PathBuf,
}

impl RunTable {
    pub fn open(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let file_path = dir.join("runs.jsonl");
        let mut records = HashMap::new();

        if file_path.exists() {
            let file = fs::File::open(&file_path)?;
            let reader = BufReader::new(file);
            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: RunRecord = serde_json::from_str(&line)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("corrupt run record: {}", e)))?;
                records.insert((record.agent_id.clone(), record.run_id.clone()), record);
            }
        }

        Ok(RunTable { records, file_path })
    }

    /// Insert or replace the record for `(record.agent_id, record.run_id)`,
    /// appending the new state to disk. The on-disk file accumulates one line
    /// per upsert; [`RunTable::open`] resolves the latest by overwrite order.
    pub fn upsert(&mut self, record: RunRecord) -> io::Result<()> {
        let key = (record.agent_id.clone(), record.run_id.clone());
        let mut file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
        let json = serde_json::to_string(&record)
            .map_err(|e| io::Error::other(format!("failed to serialize run record: {}", e)))?;
        writeln!(file, "{}", json)?;
        self.records.insert(key, record);
        Ok(())
    }

    pub fn get(&self, agent_id: &str, run_id: &str) -> Option<&RunRecord> {
        self.records.get(&(agent_id.to_string(), run_id.to_string()))
    }
}
