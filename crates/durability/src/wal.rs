//! Write-ahead log.
//!
//! Append-only log of length-prefixed records with a one-byte flag carrying
//! both the record kind and its commit state:
//!
//! ```text
//! [key_size u32 LE][val_size u32 LE][flag u8][key bytes][value bytes]
//! ```
//!
//! Flag values: `'P'` pending write, `'C'` committed, `'D'` delete
//! (`val_size` is always 0 for deletes).
//!
//! Every append is fsynced before the call returns. `mark_committed` flips
//! the flag byte of every record appended since the previous commit to `'C'`
//! and fsyncs once; `replay` yields only records whose flag is not `'C'`.
//! A partial record at the tail (crash mid-append) is detected by bounded
//! reads and truncated away on open, never surfaced as an error.
//!
//! All operations are serialized by an internal mutex.

use axon_core::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Record flag: appended, not yet committed
const FLAG_PENDING: u8 = b'P';
/// Record flag: durably applied to the engine
const FLAG_COMMITTED: u8 = b'C';
/// Record flag: delete marker (no value bytes)
const FLAG_DELETE: u8 = b'D';

/// Fixed bytes before the key: two u32 sizes plus the flag
const RECORD_HEADER: u64 = 9;

/// File size beyond which the owner should checkpoint and clear
const CHECKPOINT_THRESHOLD: u64 = 1024 * 1024;

/// One replayed record: key bytes and value bytes (empty for deletes)
pub type ReplayEntry = (Vec<u8>, Vec<u8>);

struct WalInner {
    file: File,
    path: PathBuf,
    /// Current file length, also the next append offset
    len: u64,
    /// Offsets of records whose flag is not `'C'`
    pending: Vec<u64>,
}

/// Write-ahead log over a single file
pub struct Wal {
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open an existing log or create an empty one.
    ///
    /// Scans the file once to find the true end of the record stream and to
    /// rebuild the set of uncommitted records. A truncated tail is cut off.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let (end, pending) = scan_records(&mut file, file_len)?;
        if end < file_len {
            warn!(
                path = %path.display(),
                dropped = file_len - end,
                "truncated partial record at log tail"
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok(Wal {
            inner: Mutex::new(WalInner {
                file,
                path,
                len: end,
                pending,
            }),
        })
    }

    /// Append a pending write record and fsync.
    pub fn write_entry(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.append(FLAG_PENDING, key, value)
    }

    /// Append a delete record and fsync.
    pub fn write_delete(&self, key: &[u8]) -> Result<()> {
        self.append(FLAG_DELETE, key, &[])
    }

    fn append(&self, flag: u8, key: &[u8], value: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let offset = inner.len;

        let mut buf = Vec::with_capacity(RECORD_HEADER as usize + key.len() + value.len());
        buf.write_u32::<LittleEndian>(key.len() as u32)?;
        buf.write_u32::<LittleEndian>(value.len() as u32)?;
        buf.push(flag);
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);

        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(&buf)?;
        inner.file.sync_data()?;

        inner.len = offset + buf.len() as u64;
        inner.pending.push(offset);
        Ok(())
    }

    /// Flip every record appended since the previous commit to `'C'`,
    /// then fsync once.
    pub fn mark_committed(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.pending.is_empty() {
            return Ok(());
        }
        let offsets = std::mem::take(&mut inner.pending);
        for offset in &offsets {
            inner.file.seek(SeekFrom::Start(offset + 8))?;
            inner.file.write_all(&[FLAG_COMMITTED])?;
        }
        inner.file.sync_data()?;
        Ok(())
    }

    /// Stream records from the start, yielding every non-committed record as
    /// `(key, value)`. Deletes yield an empty value. A truncated tail ends
    /// the stream silently.
    pub fn replay(&self) -> Result<Vec<ReplayEntry>> {
        let inner = self.inner.lock();
        let mut reader = BufReader::new(inner.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut entries = Vec::new();
        let mut pos = 0u64;
        while pos < inner.len {
            let remaining = inner.len - pos;
            if remaining < RECORD_HEADER {
                break;
            }
            let key_size = reader.read_u32::<LittleEndian>()? as u64;
            let val_size = reader.read_u32::<LittleEndian>()? as u64;
            let flag = reader.read_u8()?;
            if key_size + val_size > remaining - RECORD_HEADER {
                break;
            }

            let mut key = vec![0u8; key_size as usize];
            reader.read_exact(&mut key)?;
            let mut value = vec![0u8; val_size as usize];
            reader.read_exact(&mut value)?;

            if flag != FLAG_COMMITTED {
                entries.push((key, value));
            }
            pos += RECORD_HEADER + key_size + val_size;
        }
        Ok(entries)
    }

    /// Truncate the log to zero length.
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.set_len(0)?;
        inner.file.sync_all()?;
        inner.len = 0;
        inner.pending.clear();
        Ok(())
    }

    /// True once the file is large enough that the owner should checkpoint.
    pub fn should_checkpoint(&self) -> bool {
        self.inner.lock().len >= CHECKPOINT_THRESHOLD
    }

    /// Current log size in bytes.
    pub fn size(&self) -> u64 {
        self.inner.lock().len
    }

    /// Log file path.
    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }
}

/// Scan the record stream from the start.
///
/// Returns the offset just past the last complete record, plus the offsets
/// of all records whose flag is not `'C'`.
fn scan_records(file: &mut File, file_len: u64) -> Result<(u64, Vec<u64>)> {
    let mut reader = BufReader::new(file.try_clone()?);
    reader.seek(SeekFrom::Start(0))?;

    let mut pending = Vec::new();
    let mut pos = 0u64;
    loop {
        let remaining = file_len - pos;
        if remaining < RECORD_HEADER {
            break;
        }
        let key_size = match reader.read_u32::<LittleEndian>() {
            Ok(n) => n as u64,
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(Error::Io(e)),
        };
        let val_size = reader.read_u32::<LittleEndian>()? as u64;
        let flag = reader.read_u8()?;
        if key_size + val_size > remaining - RECORD_HEADER {
            break;
        }
        reader.seek(SeekFrom::Current((key_size + val_size) as i64))?;

        if flag != FLAG_COMMITTED {
            pending.push(pos);
        }
        pos += RECORD_HEADER + key_size + val_size;
    }
    Ok((pos, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_wal(dir: &TempDir) -> Wal {
        Wal::open(dir.path().join("wal.db")).unwrap()
    }

    #[test]
    fn test_open_new_is_empty() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);
        assert_eq!(wal.size(), 0);
        assert!(wal.replay().unwrap().is_empty());
    }

    #[test]
    fn test_replay_returns_uncommitted_entries() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.write_entry(b"alpha", b"1").unwrap();
        wal.write_entry(b"beta", b"2").unwrap();

        let entries = wal.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], (b"alpha".to_vec(), b"1".to_vec()));
        assert_eq!(entries[1], (b"beta".to_vec(), b"2".to_vec()));
    }

    #[test]
    fn test_committed_entries_are_skipped() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.write_entry(b"alpha", b"1").unwrap();
        wal.write_entry(b"beta", b"2").unwrap();
        wal.mark_committed().unwrap();

        assert!(wal.replay().unwrap().is_empty());

        // Records appended after the commit are replayed again
        wal.write_entry(b"gamma", b"3").unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries, vec![(b"gamma".to_vec(), b"3".to_vec())]);
    }

    #[test]
    fn test_delete_record_yields_empty_value() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.write_delete(b"alpha").unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries, vec![(b"alpha".to_vec(), Vec::new())]);
    }

    #[test]
    fn test_commit_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");

        {
            let wal = Wal::open(&path).unwrap();
            wal.write_entry(b"a", b"1").unwrap();
            wal.mark_committed().unwrap();
            wal.write_entry(b"b", b"2").unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries, vec![(b"b".to_vec(), b"2".to_vec())]);
    }

    #[test]
    fn test_truncated_tail_is_dropped_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.db");

        {
            let wal = Wal::open(&path).unwrap();
            wal.write_entry(b"whole", b"record").unwrap();
        }

        // Simulate a crash mid-append: a header claiming more bytes than exist
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_u32::<LittleEndian>(100).unwrap();
            file.write_u32::<LittleEndian>(100).unwrap();
            file.write_all(&[FLAG_PENDING]).unwrap();
            file.write_all(b"short").unwrap();
        }

        let wal = Wal::open(&path).unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries, vec![(b"whole".to_vec(), b"record".to_vec())]);

        // Appends after recovery land where the good data ends
        wal.write_entry(b"next", b"ok").unwrap();
        assert_eq!(wal.replay().unwrap().len(), 2);
    }

    #[test]
    fn test_clear_truncates() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.write_entry(b"a", b"1").unwrap();
        wal.clear().unwrap();
        assert_eq!(wal.size(), 0);
        assert!(wal.replay().unwrap().is_empty());
    }

    #[test]
    fn test_should_checkpoint_by_size() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);
        assert!(!wal.should_checkpoint());

        let value = vec![0u8; 128 * 1024];
        for i in 0..9u8 {
            wal.write_entry(&[i], &value).unwrap();
        }
        assert!(wal.should_checkpoint());
    }

    #[test]
    fn test_empty_key_and_value() {
        let dir = TempDir::new().unwrap();
        let wal = open_wal(&dir);

        wal.write_entry(b"", b"").unwrap();
        let entries = wal.replay().unwrap();
        assert_eq!(entries, vec![(Vec::new(), Vec::new())]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            /// replay(write(entries)) == entries
            #[test]
            fn replay_returns_what_was_written(
                entries in proptest::collection::vec(
                    (proptest::collection::vec(any::<u8>(), 0..64),
                     proptest::collection::vec(any::<u8>(), 0..256)),
                    0..16,
                )
            ) {
                let dir = TempDir::new().unwrap();
                let wal = Wal::open(dir.path().join("wal.db")).unwrap();
                for (k, v) in &entries {
                    wal.write_entry(k, v).unwrap();
                }
                prop_assert_eq!(wal.replay().unwrap(), entries);
            }

            /// replay(write(entries); mark_committed()) == []
            #[test]
            fn commit_empties_replay(
                entries in proptest::collection::vec(
                    (proptest::collection::vec(any::<u8>(), 0..64),
                     proptest::collection::vec(any::<u8>(), 0..256)),
                    0..16,
                )
            ) {
                let dir = TempDir::new().unwrap();
                let wal = Wal::open(dir.path().join("wal.db")).unwrap();
                for (k, v) in &entries {
                    wal.write_entry(k, v).unwrap();
                }
                wal.mark_committed().unwrap();
                prop_assert!(wal.replay().unwrap().is_empty());
            }
        }
    }
}
