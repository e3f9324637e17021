//! Archive windows: one `.idx` + `.data` file pair per rotation period.
//!
//! Files are named `<publisher>_<start>.idx` / `<publisher>_<start>.data`,
//! where `<start>` is the window's first timestamp zero-padded to 20 digits,
//! so lexical order of names is chronological order.

use super::index::{block_header, IndexRecord, BLOCK_HEADER_LEN, RECORD_LEN};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const INDEX_EXT: &str = "idx";
const DATA_EXT: &str = "data";

/// Path-safe file prefix for a publisher identity.
pub fn file_prefix(publisher: &str) -> String {
    publisher
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '-',
            other => other,
        })
        .collect()
}

/// A window pair found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowFiles {
    pub start: i64,
    pub index_path: PathBuf,
    pub data_path: PathBuf,
}

impl WindowFiles {
    pub fn new(dir: &Path, prefix: &str, start: i64) -> Self {
        let stem = format!("{prefix}_{:020}", start.max(0));
        Self {
            start: start.max(0),
            index_path: dir.join(format!("{stem}.{INDEX_EXT}")),
            data_path: dir.join(format!("{stem}.{DATA_EXT}")),
        }
    }

    /// Combined size of both files; missing files count as empty.
    pub fn size(&self) -> u64 {
        let len = |p: &Path| fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        len(&self.index_path) + len(&self.data_path)
    }

    /// Delete both files, attempting each even if the other fails. A file
    /// that is already gone is not an error.
    pub fn remove(&self) -> io::Result<()> {
        let mut first_error = None;
        for path in [&self.index_path, &self.data_path] {
            match fs::remove_file(path) {
                Err(e) if e.kind() != io::ErrorKind::NotFound => {
                    first_error.get_or_insert(e);
                }
                _ => {}
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// All windows of `prefix` under `dir`, oldest first.
pub fn list_windows(dir: &Path, prefix: &str) -> io::Result<Vec<WindowFiles>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let lead = format!("{prefix}_");
    let mut windows = Vec::new();
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(digits) = name
            .strip_prefix(&lead)
            .and_then(|rest| rest.strip_suffix(&format!(".{INDEX_EXT}")))
        else {
            continue;
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(start) = digits.parse::<i64>() {
            windows.push(WindowFiles::new(dir, prefix, start));
        }
    }
    windows.sort_by_key(|w| w.start);
    Ok(windows)
}

/// The window currently being appended to.
#[derive(Debug)]
pub struct OpenWindow {
    pub files: WindowFiles,
    index: File,
    data: File,
    data_len: u64,
    index_len: u64,
    /// Newest timestamp indexed so far (the window start when empty).
    max_timestamp: i64,
}

impl OpenWindow {
    /// Create a fresh, empty window.
    pub fn create(files: WindowFiles) -> io::Result<Self> {
        let index = append_file(&files.index_path)?;
        let data = append_file(&files.data_path)?;
        index.set_len(0)?;
        data.set_len(0)?;
        Ok(Self {
            max_timestamp: files.start,
            files,
            index,
            data,
            data_len: 0,
            index_len: 0,
        })
    }

    /// Reopen an existing window for appending.
    ///
    /// A trailing partial index record is truncated away.
    pub fn resume(files: WindowFiles) -> io::Result<Self> {
        let mut index = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&files.index_path)?;
        let data = append_file(&files.data_path)?;

        let raw_len = index.metadata()?.len();
        let index_len = raw_len - raw_len % RECORD_LEN as u64;
        if index_len != raw_len {
            index.set_len(index_len)?;
        }

        // Records keep their own timestamps, so the newest one can sit anywhere.
        let mut max_timestamp = files.start;
        let mut raw = Vec::with_capacity(usize::try_from(index_len).unwrap_or(0));
        index.seek(SeekFrom::Start(0))?;
        (&mut index).take(index_len).read_to_end(&mut raw)?;
        for chunk in raw.chunks_exact(RECORD_LEN) {
            if let Some(record) = IndexRecord::from_bytes(chunk) {
                max_timestamp = max_timestamp.max(record.timestamp);
            }
        }
        index.seek(SeekFrom::End(0))?;

        let data_len = data.metadata()?.len();
        Ok(Self {
            files,
            index,
            data,
            data_len,
            index_len,
            max_timestamp,
        })
    }

    pub fn start(&self) -> i64 {
        self.files.start
    }

    pub fn max_timestamp(&self) -> i64 {
        self.max_timestamp
    }

    pub fn size(&self) -> u64 {
        self.data_len + self.index_len
    }

    /// Append one block and its index record.
    ///
    /// The data block is written first so the index never points past the
    /// end of the data file. A failed write is rolled back to the previous
    /// lengths.
    pub fn append(&mut self, bytes: &[u8], length: i32, timestamp: i64) -> io::Result<()> {
        self.resync()?;
        let record = IndexRecord {
            data_offset: i64::try_from(self.data_len)
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "data file too large"))?,
            length,
            timestamp,
        };

        let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + bytes.len());
        block.extend_from_slice(&block_header(length));
        block.extend_from_slice(bytes);
        // A rollback that fails is caught by the next resync.
        if let Err(e) = self.data.write_all(&block) {
            let _ = self.data.set_len(self.data_len);
            return Err(e);
        }
        if let Err(e) = self.index.write_all(&record.to_bytes()) {
            let _ = self.index.set_len(self.index_len);
            let _ = self.data.set_len(self.data_len);
            return Err(e);
        }

        self.data_len += block.len() as u64;
        self.index_len += RECORD_LEN as u64;
        self.max_timestamp = self.max_timestamp.max(timestamp);
        Ok(())
    }

    /// Take the real file lengths as the next offsets.
    ///
    /// Bytes left behind by an earlier failed write (or anything else that
    /// grew the files) would otherwise shift every later record. A trailing
    /// partial index record is cut off.
    fn resync(&mut self) -> io::Result<()> {
        self.data_len = self.data.metadata()?.len();
        let raw_len = self.index.metadata()?.len();
        let index_len = raw_len - raw_len % RECORD_LEN as u64;
        if index_len != raw_len {
            self.index.set_len(index_len)?;
        }
        self.index_len = index_len;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.data.flush()?;
        self.index.flush()?;
        self.data.sync_all()?;
        self.index.sync_all()
    }
}

fn append_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_window_names_sort_chronologically() {
        let dir = TempDir::new().unwrap();
        for start in [900, 10_000, 1_700_000_000_000] {
            OpenWindow::create(WindowFiles::new(dir.path(), "A", start)).unwrap();
        }
        OpenWindow::create(WindowFiles::new(dir.path(), "A_B", 5)).unwrap();

        let windows = list_windows(dir.path(), "A").unwrap();
        let starts: Vec<i64> = windows.iter().map(|w| w.start).collect();
        assert_eq!(starts, vec![900, 10_000, 1_700_000_000_000]);
        assert!(windows[0]
            .index_path
            .ends_with("A_00000000000000000900.idx"));
    }

    #[test]
    fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_windows(&missing, "A").unwrap().is_empty());
    }

    #[test]
    fn test_resume_truncates_partial_record() {
        let dir = TempDir::new().unwrap();
        let files = WindowFiles::new(dir.path(), "A", 100);
        {
            let mut window = OpenWindow::create(files.clone()).unwrap();
            window.append(b"hello", 5, 100).unwrap();
            window.append(b"world", 5, 150).unwrap();
        }
        let mut index = append_file(&files.index_path).unwrap();
        index.write_all(&[1, 2, 3]).unwrap();

        let window = OpenWindow::resume(files.clone()).unwrap();
        assert_eq!(window.max_timestamp(), 150);
        assert_eq!(window.size(), 2 * (RECORD_LEN as u64) + 2 * 9);
        assert_eq!(
            fs::metadata(&files.index_path).unwrap().len(),
            2 * RECORD_LEN as u64
        );
    }

    #[test]
    fn test_resume_finds_newest_timestamp_anywhere() {
        let dir = TempDir::new().unwrap();
        let files = WindowFiles::new(dir.path(), "A", 100);
        {
            let mut window = OpenWindow::create(files.clone()).unwrap();
            window.append(b"late", 4, 300).unwrap();
            window.append(b"early", 5, 120).unwrap();
            assert_eq!(window.max_timestamp(), 300);
        }
        assert_eq!(OpenWindow::resume(files).unwrap().max_timestamp(), 300);
    }

    #[test]
    fn test_append_after_stray_bytes_uses_real_offsets() {
        let dir = TempDir::new().unwrap();
        let files = WindowFiles::new(dir.path(), "A", 100);
        let mut window = OpenWindow::create(files.clone()).unwrap();
        window.append(b"one", 3, 100).unwrap();

        append_file(&files.data_path).unwrap().write_all(&[0xee; 5]).unwrap();
        append_file(&files.index_path).unwrap().write_all(&[0xee; 3]).unwrap();
        window.append(b"two", 3, 110).unwrap();

        let index = fs::read(&files.index_path).unwrap();
        assert_eq!(index.len(), 2 * RECORD_LEN);
        let second = IndexRecord::from_bytes(&index[RECORD_LEN..]).unwrap();
        assert_eq!(second.data_offset, (BLOCK_HEADER_LEN + 3 + 5) as i64);
        assert_eq!(second.timestamp, 110);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let files = WindowFiles::new(dir.path(), "A", 1);
        OpenWindow::create(files.clone()).unwrap();
        files.remove().unwrap();
        files.remove().unwrap();
        assert_eq!(files.size(), 0);
    }

    #[test]
    fn test_file_prefix_strips_separators() {
        assert_eq!(file_prefix("a/b\\c:d"), "a-b-c-d");
        assert_eq!(file_prefix("sensor-1"), "sensor-1");
    }
}
