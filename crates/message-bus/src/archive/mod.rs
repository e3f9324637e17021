//! # Message Archive
//!
//! Per-publisher append-only log of encoded messages with time-range
//! retrieval.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ──save()──→ Open(window) ──budget exceeded──→ rotate ──→ Open(new window)
//!   │                   │
//!   └──────close()──────┴──→ Closed
//! ```
//!
//! ## Retention
//!
//! Capacity-bounded. Budgets come from [`ArchiveConfig`] applied to the
//! memory available at the time of the rotation decision. After a rotation,
//! the oldest windows are deleted until the total size fits the budget again.
//! The window being written is never deleted.
//!
//! ## Ordering
//!
//! Every index record carries its message's own timestamp, so saves may
//! arrive out of order. A new window starts at the newest timestamp seen so
//! far, which bounds every record of a window by the next window's start.
//! Records older than their window's start are allowed, so a query can skip
//! a window only when its successor starts before the range.

mod index;
mod window;

pub use index::{get_data_size, IndexRecord, BLOCK_HEADER_LEN, RECORD_LEN};

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::message::Message;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use sysinfo::System;
use tracing::{debug, info, warn};
use window::{file_prefix, list_windows, OpenWindow, WindowFiles};

/// Memory currently available to the process, in bytes. `None` if unknown.
#[must_use]
pub fn available_memory() -> Option<u64> {
    let mut system = System::new();
    system.refresh_memory();
    match system.available_memory() {
        0 => None,
        bytes => Some(bytes),
    }
}

#[derive(Debug, Clone, Copy)]
struct Budget {
    window: u64,
    total: u64,
}

#[derive(Debug)]
enum ArchiveState {
    Idle,
    Open(OpenWindow),
    Closed,
}

#[derive(Debug)]
struct Inner {
    state: ArchiveState,
    /// Budget from the last rotation decision.
    budget: Option<Budget>,
}

/// Append-only message log for one publisher.
#[derive(Debug)]
pub struct MessageArchive {
    publisher: String,
    prefix: String,
    config: ArchiveConfig,
    inner: Mutex<Inner>,
}

impl MessageArchive {
    /// Create an archive for `publisher`. No file is touched until the first save.
    #[must_use]
    pub fn new(publisher: impl Into<String>, config: ArchiveConfig) -> Self {
        let publisher = publisher.into();
        Self {
            prefix: file_prefix(&publisher),
            publisher,
            config,
            inner: Mutex::new(Inner {
                state: ArchiveState::Idle,
                budget: None,
            }),
        }
    }

    #[must_use]
    pub fn publisher(&self) -> &str {
        &self.publisher
    }

    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.config.base_dir
    }

    /// Append an encoded message indexed under `timestamp`.
    pub fn save(&self, bytes: &[u8], timestamp: i64) -> Result<(), ArchiveError> {
        let length =
            i32::try_from(bytes.len()).map_err(|_| ArchiveError::BlockTooLarge { len: bytes.len() })?;

        let mut inner = self.inner.lock();
        if matches!(inner.state, ArchiveState::Closed) {
            return Err(self.closed());
        }
        if matches!(inner.state, ArchiveState::Idle) {
            inner.state = ArchiveState::Open(self.open_window(timestamp)?);
        }

        let Inner { state, budget } = &mut *inner;
        let ArchiveState::Open(window) = state else {
            return Err(self.closed());
        };

        let threshold = budget.map_or(0, |b| b.window);
        if window.size() >= threshold {
            let fresh = self.current_budget();
            *budget = Some(fresh);
            let next_start = timestamp.max(window.max_timestamp());
            if window.size() >= fresh.window && next_start > window.start() {
                self.rotate(window, next_start, fresh);
            }
        }

        window.append(bytes, length, timestamp)?;
        Ok(())
    }

    /// Messages indexed within `[from, to]`, ascending by timestamp.
    pub fn message_query(&self, from: i64, to: i64) -> Result<Vec<Message>, ArchiveError> {
        // Held for the whole scan so no save interleaves with it.
        let inner = self.inner.lock();
        if matches!(inner.state, ArchiveState::Closed) {
            return Err(self.closed());
        }
        if from > to {
            return Ok(Vec::new());
        }

        let windows = list_windows(&self.config.base_dir, &self.prefix)?;
        let mut found: Vec<(i64, Message)> = Vec::new();
        let mut skipped = 0usize;

        for (i, files) in windows.iter().enumerate() {
            let newest = windows.get(i + 1).map_or(i64::MAX, |next| next.start);
            if newest < from {
                continue;
            }
            match scan_window(files, from, to, &mut found) {
                Ok(bad) => skipped += bad,
                Err(e) => {
                    warn!(publisher = %self.publisher, window = files.start, error = %e, "Skipping unreadable archive window");
                }
            }
        }
        drop(inner);

        if skipped > 0 {
            warn!(publisher = %self.publisher, skipped, "Skipped corrupt archive entries");
        }
        found.sort_by_key(|(timestamp, _)| *timestamp);
        Ok(found.into_iter().map(|(_, message)| message).collect())
    }

    /// Flush and release file handles. Idempotent.
    pub fn close(&self) -> Result<(), ArchiveError> {
        let mut inner = self.inner.lock();
        let previous = std::mem::replace(&mut inner.state, ArchiveState::Closed);
        if let ArchiveState::Open(mut window) = previous {
            window.sync()?;
            debug!(publisher = %self.publisher, window = window.start(), "Archive closed");
        }
        Ok(())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.lock().state, ArchiveState::Closed)
    }

    /// Number of window pairs on disk.
    pub fn window_count(&self) -> Result<usize, ArchiveError> {
        Ok(list_windows(&self.config.base_dir, &self.prefix)?.len())
    }

    fn closed(&self) -> ArchiveError {
        ArchiveError::Closed {
            publisher: self.publisher.clone(),
        }
    }

    fn current_budget(&self) -> Budget {
        let available = available_memory().unwrap_or(self.config.ceiling_bytes);
        Budget {
            window: self.config.window_budget(available),
            total: self.config.total_budget(available),
        }
    }

    /// Resume the newest window on disk, or start one at `timestamp`.
    fn open_window(&self, timestamp: i64) -> Result<OpenWindow, ArchiveError> {
        fs::create_dir_all(&self.config.base_dir)?;
        let latest = list_windows(&self.config.base_dir, &self.prefix)?.pop();
        let start = match latest {
            Some(files) => {
                let newest = files.start;
                match OpenWindow::resume(files) {
                    Ok(window) => {
                        info!(publisher = %self.publisher, window = newest, "Resuming archive window");
                        return Ok(window);
                    }
                    Err(e) => {
                        warn!(
                            publisher = %self.publisher,
                            window = newest,
                            error = %e,
                            "Archive window not resumable, starting a new one"
                        );
                        timestamp.max(newest.saturating_add(1))
                    }
                }
            }
            None => timestamp,
        };
        Ok(OpenWindow::create(WindowFiles::new(
            &self.config.base_dir,
            &self.prefix,
            start,
        ))?)
    }

    /// Switch to a new window starting at `start` and evict. Failures keep
    /// the current window in use.
    fn rotate(&self, window: &mut OpenWindow, start: i64, budget: Budget) {
        if let Err(e) = window.sync() {
            warn!(publisher = %self.publisher, window = window.start(), error = %e, "Archive window sync failed");
        }
        let next = match OpenWindow::create(WindowFiles::new(&self.config.base_dir, &self.prefix, start)) {
            Ok(next) => next,
            Err(e) => {
                warn!(publisher = %self.publisher, error = %e, "Archive rotation failed, keeping current window");
                return;
            }
        };
        let previous = std::mem::replace(window, next);
        debug!(
            publisher = %self.publisher,
            from = previous.start(),
            to = start,
            "Archive window rotated"
        );
        drop(previous);
        self.evict(budget.total, start);
    }

    /// Delete oldest windows until the total fits `total`, keeping `current`.
    /// A window that cannot be removed is skipped.
    fn evict(&self, total: u64, current: i64) {
        let windows = match list_windows(&self.config.base_dir, &self.prefix) {
            Ok(windows) => windows,
            Err(e) => {
                warn!(publisher = %self.publisher, error = %e, "Archive eviction skipped");
                return;
            }
        };
        let mut size: u64 = windows.iter().map(WindowFiles::size).sum();
        for files in windows.iter().filter(|w| w.start != current) {
            if size <= total {
                break;
            }
            let before = files.size();
            let removed = files.remove();
            let freed = before.saturating_sub(files.size());
            size = size.saturating_sub(freed);
            match removed {
                Ok(()) => {
                    info!(publisher = %self.publisher, window = files.start, freed, "Evicted archive window");
                }
                Err(e) => {
                    warn!(publisher = %self.publisher, window = files.start, error = %e, "Archive window eviction failed");
                }
            }
        }
    }
}

/// Read the matching records of one window into `found`; returns the number
/// of entries skipped as corrupt.
fn scan_window(
    files: &WindowFiles,
    from: i64,
    to: i64,
    found: &mut Vec<(i64, Message)>,
) -> Result<usize, ArchiveError> {
    let index = fs::read(&files.index_path)?;
    let mut data = File::open(&files.data_path)?;
    let data_len = data.metadata()?.len();

    let chunks = index.chunks(RECORD_LEN);
    let mut skipped = 0;
    for chunk in chunks {
        let Some(record) = IndexRecord::from_bytes(chunk) else {
            skipped += 1;
            continue;
        };
        if record.timestamp < from || record.timestamp > to {
            continue;
        }
        match read_block(&mut data, data_len, &record) {
            Some(message) => found.push((record.timestamp, message)),
            None => skipped += 1,
        }
    }
    Ok(skipped)
}

fn read_block(data: &mut File, data_len: u64, record: &IndexRecord) -> Option<Message> {
    if !record.is_plausible() {
        return None;
    }
    let offset = u64::try_from(record.data_offset).ok()?;
    let length = usize::try_from(record.length).ok()?;
    let end = offset
        .checked_add(BLOCK_HEADER_LEN as u64)?
        .checked_add(length as u64)?;
    if end > data_len {
        return None;
    }

    let mut header = [0u8; BLOCK_HEADER_LEN];
    data.seek(SeekFrom::Start(offset)).ok()?;
    data.read_exact(&mut header).ok()?;
    if get_data_size(&header) != length {
        return None;
    }

    let mut bytes = vec![0u8; length];
    data.read_exact(&mut bytes).ok()?;
    Message::decode(&bytes).ok()
}
