//! Local photo queue backed by a cache directory.
//!
//! Every capture lands in `<cache-root>/temp_images/temp_photo_<N>.jpg`. The
//! sequence counter is owned here and rebuilt from the directory listing on
//! first use, so files left behind by a previous run are never overwritten.

use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use log::{debug, info, warn};

pub const CACHE_DIR_NAME: &str = "temp_images";
const FILE_PREFIX: &str = "temp_photo_";
const FILE_SUFFIX: &str = ".jpg";
const PARTIAL_SUFFIX: &str = ".part";

/// A photo sitting in the local queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPhoto {
    pub sequence: u32,
    pub path: PathBuf,
}

impl CachedPhoto {
    /// File name as it appears in the cache directory, e.g. `temp_photo_3.jpg`.
    pub fn file_name(&self) -> String {
        file_name_for(self.sequence)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to {action} {}: {source}", path.display())]
    CacheIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("photo sequence numbers are exhausted; clear the cache to start over")]
    SequenceExhausted,
}

impl StoreError {
    fn io(action: &'static str, path: &Path, source: io::Error) -> Self {
        StoreError::CacheIo {
            action,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Directory of numbered temp photos plus the in-memory "next slot" counter.
#[derive(Debug)]
pub struct PhotoStore {
    dir: PathBuf,
    // None until the directory has been scanned once.
    next: Mutex<Option<u32>>,
}

impl PhotoStore {
    pub fn new(cache_root: impl AsRef<Path>) -> Self {
        Self {
            dir: cache_root.as_ref().join(CACHE_DIR_NAME),
            next: Mutex::new(None),
        }
    }

    /// Reserves the next sequence number.
    ///
    /// The first call scans the cache directory and continues from
    /// `max(existing) + 1`; later calls count up in memory.
    pub fn next_slot(&self) -> Result<u32, StoreError> {
        let mut next = self.counter();
        let slot = match *next {
            Some(slot) => slot,
            None => self.recover_next()?,
        };
        *next = Some(slot.checked_add(1).ok_or(StoreError::SequenceExhausted)?);
        debug!("Reserved photo slot {slot}");
        Ok(slot)
    }

    /// Writes `bytes` to the path for `sequence`, replacing any existing file.
    ///
    /// On failure the reservation made by [`PhotoStore::next_slot`] is handed
    /// back, as long as no later slot has been reserved in the meantime.
    pub fn save(&self, bytes: &[u8], sequence: u32) -> Result<PathBuf, StoreError> {
        match self.write_photo(bytes, sequence) {
            Ok(path) => {
                let mut next = self.counter();
                if let Some(after) = sequence.checked_add(1) {
                    if next.is_none_or(|n| n <= sequence) {
                        *next = Some(after);
                    }
                }
                info!("Saved photo {} ({} bytes)", path.display(), bytes.len());
                Ok(path)
            }
            Err(err) => {
                let mut next = self.counter();
                if sequence.checked_add(1).is_some_and(|after| *next == Some(after)) {
                    *next = Some(sequence);
                }
                warn!("Failed to save photo {sequence}: {err}");
                Err(err)
            }
        }
    }

    /// All cached photos, ordered by sequence number.
    pub fn list_all(&self) -> Result<Vec<CachedPhoto>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io("read", &self.dir, err)),
        };

        let mut photos: Vec<CachedPhoto> = entries
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let sequence = parse_sequence(name.to_str()?)?;
                Some(CachedPhoto {
                    sequence,
                    path: entry.path(),
                })
            })
            .collect();
        photos.sort_by_key(|p| p.sequence);
        Ok(photos)
    }

    /// Removes the cache directory and resets the counter to 0.
    ///
    /// Returns `false` when there was nothing to remove.
    pub fn clear(&self) -> Result<bool, StoreError> {
        let mut next = self.counter();
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => {
                *next = Some(0);
                info!("Cleared photo cache {}", self.dir.display());
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                *next = Some(0);
                info!("Photo cache {} does not exist, nothing to clear", self.dir.display());
                Ok(false)
            }
            Err(err) => Err(StoreError::io("remove", &self.dir, err)),
        }
    }

    fn write_photo(&self, bytes: &[u8], sequence: u32) -> Result<PathBuf, StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io("create", &self.dir, e))?;

        let path = self.dir.join(file_name_for(sequence));
        let partial = self
            .dir
            .join(format!("{}{PARTIAL_SUFFIX}", file_name_for(sequence)));
        fs::write(&partial, bytes).map_err(|e| StoreError::io("write", &partial, e))?;
        if let Err(err) = fs::rename(&partial, &path) {
            let _ = fs::remove_file(&partial);
            return Err(StoreError::io("move", &path, err));
        }
        Ok(path)
    }

    fn recover_next(&self) -> Result<u32, StoreError> {
        let next = match self.list_all()?.last() {
            Some(photo) => photo
                .sequence
                .checked_add(1)
                .ok_or(StoreError::SequenceExhausted)?,
            None => 0,
        };
        if next > 0 {
            info!("Recovered photo counter at {next} from {}", self.dir.display());
        }
        Ok(next)
    }

    fn counter(&self) -> MutexGuard<'_, Option<u32>> {
        // The guarded value is a plain integer, so a poisoned lock is still usable.
        self.next.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn file_name_for(sequence: u32) -> String {
    format!("{FILE_PREFIX}{sequence}{FILE_SUFFIX}")
}

/// Extracts `N` from `temp_photo_<N>.jpg`; anything else is not ours.
fn parse_sequence(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
