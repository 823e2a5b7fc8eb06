// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSONL message log with size/count rotation.
//!
//! One directory per project: `messages_current.jsonl` plus rotated
//! `messages_<UTC-stamp>.jsonl` archives. Each record is a single line
//! of JSON with a trailing newline; malformed or truncated lines are
//! skipped on read, so a crash mid-write never breaks the reader.

use pa_core::{clock, LogRecord};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Name of the active log file inside a log directory.
pub const CURRENT_FILE: &str = "messages_current.jsonl";

const ROTATED_PREFIX: &str = "messages_";
const ROTATED_SUFFIX: &str = ".jsonl";

/// Errors from log operations.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rotation ceilings for one log.
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    pub max_size_bytes: u64,
    pub max_records: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { max_size_bytes: 100 * 1024 * 1024, max_records: 10_000 }
    }
}

#[derive(Debug)]
struct Writer {
    file: File,
    size: u64,
    records: u64,
}

/// Append-only rotating message log for one project.
///
/// Appends are serialized by the internal mutex. Reads take the mutex
/// only long enough to snapshot the directory listing, then stream the
/// files without blocking writers.
#[derive(Debug)]
pub struct MessageLog {
    dir: PathBuf,
    config: LogConfig,
    writer: Mutex<Writer>,
}

impl MessageLog {
    /// Open (or create) the log directory and its current file.
    ///
    /// Scans the current file to recover the record count, and repairs a
    /// missing trailing newline left by a crash mid-write so the next
    /// append starts on a fresh line.
    pub fn open(dir: impl Into<PathBuf>, config: LogConfig) -> Result<Self, LogError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let current = dir.join(CURRENT_FILE);
        let mut file = OpenOptions::new().create(true).read(true).append(true).open(&current)?;

        let (size, records) = Self::scan_current(&mut file)?;
        let mut writer = Writer { file, size, records };
        if size > 0 && !Self::ends_with_newline(&mut writer.file)? {
            writer.file.write_all(b"\n")?;
            writer.size += 1;
        }

        Ok(Self { dir, config, writer: Mutex::new(writer) })
    }

    /// Append one record.
    ///
    /// Rotates first when the record would cross the size ceiling or the
    /// current file has reached the record ceiling, so the new record
    /// always lands in the fresh file. On write error the in-memory
    /// count is not advanced and the error propagates.
    pub fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();

        let over_size = writer.size + line.len() as u64 > self.config.max_size_bytes;
        let over_count = writer.records >= self.config.max_records;
        if writer.records > 0 && (over_size || over_count) {
            self.rotate_locked(&mut writer)?;
        }

        writer.file.write_all(&line)?;
        writer.size += line.len() as u64;
        writer.records += 1;
        Ok(())
    }

    /// Read records with `timestamp_ms >= cutoff_ms`, oldest first,
    /// across rotated files and current, optionally capped at `limit`.
    ///
    /// Malformed lines (including a crash-truncated tail) are skipped
    /// with a diagnostic log entry.
    pub fn since(&self, cutoff_ms: u64, limit: Option<usize>) -> Result<Vec<LogRecord>, LogError> {
        // Snapshot the file list under the lock so a concurrent rotation
        // cannot produce duplicates or gaps in the enumeration.
        let files = {
            let _writer = self.writer.lock();
            self.ordered_files()?
        };

        let mut out = Vec::new();
        for path in files {
            let file = match File::open(&path) {
                Ok(f) => f,
                // Rotated away or deleted between snapshot and open.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut reader = BufReader::new(file);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                        warn!(path = %path.display(), "non-UTF-8 bytes in log, stopping file read");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<LogRecord>(trimmed) {
                    Ok(rec) => {
                        if rec.timestamp_ms >= cutoff_ms {
                            out.push(rec);
                            if limit.is_some_and(|cap| out.len() >= cap) {
                                return Ok(out);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "skipping malformed log line");
                    }
                }
            }
        }
        Ok(out)
    }

    /// The most recent `count` records (used for join snapshots).
    pub fn tail(&self, count: usize) -> Result<Vec<LogRecord>, LogError> {
        let mut all = self.since(0, None)?;
        if all.len() > count {
            all.drain(..all.len() - count);
        }
        Ok(all)
    }

    /// Number of records in the current (unrotated) file.
    pub fn current_records(&self) -> u64 {
        self.writer.lock().records
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rotated files in chronological order, then current.
    fn ordered_files(&self) -> Result<Vec<PathBuf>, LogError> {
        let mut rotated: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == CURRENT_FILE {
                continue;
            }
            if name.starts_with(ROTATED_PREFIX) && name.ends_with(ROTATED_SUFFIX) {
                rotated.push(name);
            }
        }
        // Stamped names sort lexicographically in chronological order.
        rotated.sort();

        let mut files: Vec<PathBuf> = rotated.into_iter().map(|n| self.dir.join(n)).collect();
        files.push(self.dir.join(CURRENT_FILE));
        Ok(files)
    }

    /// Rename current to a stamped archive and open a fresh current file.
    ///
    /// Rename-then-recreate is atomic on POSIX; readers holding the old
    /// handle keep reading the renamed file.
    fn rotate_locked(&self, writer: &mut Writer) -> Result<(), LogError> {
        let archive = self.archive_path();
        std::fs::rename(self.dir.join(CURRENT_FILE), &archive)?;

        writer.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.dir.join(CURRENT_FILE))?;
        writer.size = 0;
        writer.records = 0;
        Ok(())
    }

    /// Stamped archive name, disambiguated when two rotations land in
    /// the same millisecond.
    fn archive_path(&self) -> PathBuf {
        let stamp = clock::file_stamp();
        let base = self.dir.join(format!("{ROTATED_PREFIX}{stamp}{ROTATED_SUFFIX}"));
        if !base.exists() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = self.dir.join(format!("{ROTATED_PREFIX}{stamp}_{n}{ROTATED_SUFFIX}"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn scan_current(file: &mut File) -> Result<(u64, u64), LogError> {
        let size = file.metadata()?.len();
        let mut records = 0u64;

        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    if !line.trim().is_empty() {
                        records += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok((size, records))
    }

    fn ends_with_newline(file: &mut File) -> Result<bool, LogError> {
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(true);
        }
        let mut reader = file.try_clone()?;
        reader.seek(SeekFrom::End(-1))?;
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        Ok(byte[0] == b'\n')
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
