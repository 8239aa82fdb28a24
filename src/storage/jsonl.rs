// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Append-only JSON-lines event store.
//!
//! One [`EventLogEntry`] per line. Reopening a file resumes after its last
//! readable entry; unreadable lines (e.g. a torn write after a crash) are
//! skipped with a warning rather than failing the whole log.

use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::traits::{EventIter, EventLogEntry, EventStore, PersistenceError, SequenceNo};

struct Writer {
    file: BufWriter<File>,
    last: Option<SequenceNo>,
    /// A previous write may have left a partial line behind
    torn: bool,
}

pub struct JsonlEventStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    sync_on_append: bool,
}

impl JsonlEventStore {
    /// Open (or create) a log file. Parent directories are created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let (last, entries) = scan(&path)?;
        let torn = !ends_with_newline(&path)?;
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!(path = %path.display(), entries, last = ?last, "Opened event log file");
        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file: BufWriter::new(file),
                last,
                torn,
            }),
            sync_on_append: false,
        })
    }

    /// fsync after every append. Slower; survives power loss.
    #[must_use]
    pub fn with_sync_on_append(mut self, sync: bool) -> Self {
        self.sync_on_append = sync;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventStore for JsonlEventStore {
    fn append(&self, entry: &EventLogEntry) -> Result<SequenceNo, PersistenceError> {
        let mut w = self.writer.lock();
        if let Some(last) = w.last {
            if entry.sequence <= last {
                return Err(PersistenceError::OutOfOrder {
                    last,
                    got: entry.sequence,
                });
            }
        }

        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        if w.torn {
            line.insert(0, '\n');
        }

        let written = w
            .file
            .write_all(line.as_bytes())
            .and_then(|()| w.file.flush())
            .and_then(|()| {
                if self.sync_on_append {
                    w.file.get_ref().sync_data()
                } else {
                    Ok(())
                }
            });
        if let Err(e) = written {
            w.torn = true;
            return Err(e.into());
        }

        w.torn = false;
        w.last = Some(entry.sequence);
        debug!(sequence = %entry.sequence, "Event appended to file");
        Ok(entry.sequence)
    }

    fn replay(&self, since: SequenceNo) -> Result<EventIter<'_>, PersistenceError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Box::new(std::iter::empty())),
            Err(e) => return Err(e.into()),
        };

        let iter = BufReader::new(file)
            .split(b'\n')
            .map_while(|line| match line {
                Ok(l) => Some(l),
                Err(e) => {
                    warn!(error = %e, "Event log read failed, stopping replay");
                    None
                }
            })
            .enumerate()
            .filter_map(|(idx, l)| parse_line(idx + 1, &l))
            .filter(move |entry| entry.sequence >= since);
        Ok(Box::new(iter))
    }

    fn last_sequence(&self) -> Result<Option<SequenceNo>, PersistenceError> {
        Ok(self.writer.lock().last)
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

fn scan(path: &Path) -> Result<(Option<SequenceNo>, usize), PersistenceError> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((None, 0)),
        Err(e) => return Err(e.into()),
    };

    let mut last = None;
    let mut entries = 0;
    for (idx, line) in BufReader::new(file).split(b'\n').enumerate() {
        if let Some(entry) = parse_line(idx + 1, &line?) {
            last = Some(entry.sequence);
            entries += 1;
        }
    }
    Ok((last, entries))
}

/// Lines are parsed as raw bytes so a write torn mid-character is skipped
/// like any other malformed line.
fn parse_line(line_no: usize, line: &[u8]) -> Option<EventLogEntry> {
    if line.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    match serde_json::from_slice::<EventLogEntry>(line) {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(line = line_no, error = %e, "Skipping unreadable event log line");
            None
        }
    }
}

fn ends_with_newline(path: &Path) -> Result<bool, PersistenceError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(e.into()),
    };
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
