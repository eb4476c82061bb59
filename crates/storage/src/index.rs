//! Disk-backed ordered key index.
//!
//! An in-memory `BTreeMap<String, u64>` mapping keys to byte offsets in the
//! data file, persisted through a memory-mapped append log:
//!
//! ```text
//! [magic "AXIX" 4B][version u32 LE]
//! [entry: key_size u32 LE | offset u64 LE | key bytes]*
//! ```
//!
//! Appends go straight into the mapped region and are msynced; the region
//! grows geometrically (double, plus the entry, plus one page) when
//! exhausted. `remove` compacts: the surviving entries are rewritten from
//! the start in ascending key order and the tail is zeroed. A zero
//! `key_size` marks the end of the entry stream on load.
//!
//! The offset field is 64 bits wide; version 2 of the format marks the
//! widening from the earlier 32-bit layout.
//!
//! Locking: the tree is behind a read/write lock, the mapped region behind
//! its own mutex. Writers take both (tree first); readers only the tree.

use axon_core::error::{Error, Result};
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::Path;

const MAGIC: &[u8; 4] = b"AXIX";
const VERSION: u32 = 2;
const HEADER_SIZE: usize = 8;

/// Fixed bytes per entry before the key: u32 size + u64 offset
const ENTRY_HEADER: usize = 12;

/// Initial file size for a fresh index log
const INITIAL_SIZE: u64 = 64 * 1024;

/// Growth slack beyond doubling, one page
const GROW_SLACK: usize = 4096;

struct Region {
    file: File,
    mmap: MmapMut,
    /// Next append position
    write_off: usize,
}

/// Ordered map from string keys to data-file offsets, mmap-persisted
pub struct OrderedIndex {
    map: RwLock<BTreeMap<String, u64>>,
    region: Mutex<Region>,
}

impl OrderedIndex {
    /// Open an index log, creating it if missing, and rebuild the in-memory
    /// map by scanning the region (last write per key wins).
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let fresh = file.metadata()?.len() < HEADER_SIZE as u64;
        if fresh {
            file.set_len(INITIAL_SIZE)?;
        }
        // SAFETY: the file stays open for the lifetime of the mapping and is
        // only resized while the region mutex is held.
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };

        if fresh {
            mmap[0..4].copy_from_slice(MAGIC);
            mmap[4..8].copy_from_slice(&VERSION.to_le_bytes());
            mmap.flush_range(0, HEADER_SIZE)?;
        } else {
            if &mmap[0..4] != MAGIC {
                return Err(Error::Corruption(format!(
                    "bad index magic in {}",
                    path.display()
                )));
            }
            let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
            if version != VERSION {
                return Err(Error::Corruption(format!(
                    "unsupported index format version {} in {}",
                    version,
                    path.display()
                )));
            }
        }

        let (map, write_off) = load_entries(&mmap);
        Ok(OrderedIndex {
            map: RwLock::new(map),
            region: Mutex::new(Region {
                file,
                mmap,
                write_off,
            }),
        })
    }

    /// Replace-or-insert a key's offset and append the entry to the log.
    pub fn add(&self, key: &str, pos: u64) -> Result<()> {
        let mut map = self.map.write();
        map.insert(key.to_string(), pos);

        let mut region = self.region.lock();
        let entry_size = ENTRY_HEADER + key.len();
        if region.write_off + entry_size > region.mmap.len() {
            grow(&mut region, entry_size)?;
        }
        let off = region.write_off;
        write_entry(&mut region.mmap, off, key, pos);
        region.mmap.flush_range(off, entry_size)?;
        region.write_off = off + entry_size;
        Ok(())
    }

    /// Look up a key's offset.
    pub fn get(&self, key: &str) -> Option<u64> {
        self.map.read().get(key).copied()
    }

    /// Delete a key and compact the log: surviving entries are rewritten in
    /// ascending key order and the tail zeroed.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut map = self.map.write();
        if map.remove(key).is_none() {
            return Ok(());
        }

        let mut region = self.region.lock();
        let mut pos = HEADER_SIZE;
        let needed: usize = map.iter().map(|(k, _)| ENTRY_HEADER + k.len()).sum();
        if HEADER_SIZE + needed > region.mmap.len() {
            grow(&mut region, needed)?;
        }
        for (k, &off) in map.iter() {
            write_entry(&mut region.mmap, pos, k, off);
            pos += ENTRY_HEADER + k.len();
        }
        let end = region.write_off.max(pos);
        region.mmap[pos..end].fill(0);
        region.write_off = pos;
        region.mmap.flush()?;
        Ok(())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// True when no keys are present.
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }

    /// All live keys in ascending order.
    pub fn keys(&self) -> Vec<String> {
        self.map.read().keys().cloned().collect()
    }

    /// Flush the mapped region and drop nothing; the mapping unmaps on drop.
    pub fn close(&self) -> Result<()> {
        self.region.lock().mmap.flush()?;
        Ok(())
    }
}

/// Scan the region from the header, reconstructing the map.
///
/// Returns the map plus the next write offset. Stops at a zero `key_size`
/// (zeroed tail), a bound violation, or non-UTF-8 key bytes.
fn load_entries(mmap: &MmapMut) -> (BTreeMap<String, u64>, usize) {
    let mut map = BTreeMap::new();
    let mut pos = HEADER_SIZE;
    while pos + ENTRY_HEADER <= mmap.len() {
        let key_size = u32::from_le_bytes(mmap[pos..pos + 4].try_into().unwrap()) as usize;
        if key_size == 0 {
            break;
        }
        if pos + ENTRY_HEADER + key_size > mmap.len() {
            break;
        }
        let offset = u64::from_le_bytes(mmap[pos + 4..pos + 12].try_into().unwrap());
        let key_bytes = &mmap[pos + ENTRY_HEADER..pos + ENTRY_HEADER + key_size];
        match std::str::from_utf8(key_bytes) {
            Ok(key) => map.insert(key.to_string(), offset),
            Err(_) => break,
        };
        pos += ENTRY_HEADER + key_size;
    }
    (map, pos)
}

fn write_entry(mmap: &mut MmapMut, pos: usize, key: &str, offset: u64) {
    mmap[pos..pos + 4].copy_from_slice(&(key.len() as u32).to_le_bytes());
    mmap[pos + 4..pos + 12].copy_from_slice(&offset.to_le_bytes());
    mmap[pos + 12..pos + 12 + key.len()].copy_from_slice(key.as_bytes());
}

/// Grow the file geometrically and remap. The old mapping is replaced, so
/// no references into it survive this call.
fn grow(region: &mut Region, entry_size: usize) -> Result<()> {
    let new_len = (region.mmap.len() * 2 + entry_size + GROW_SLACK) as u64;
    region.mmap.flush()?;
    region.file.set_len(new_len)?;
    // SAFETY: same file, resized above; the stale mapping is dropped on
    // assignment before anyone can read through it.
    region.mmap = unsafe { MmapMut::map_mut(&region.file)? };
    Ok(())
}
