//! Durable store backed by a checksummed journal.
//!
//! Every committed transaction becomes one journal entry:
//!
//! ```text
//! | len: u32 LE | ops: MessagePack | crc32: u32 LE |
//! ```
//!
//! The full key set is kept in memory and rebuilt by replaying the journal on
//! open. A torn entry can only ever be the last one: replay truncates an
//! entry that runs past end-of-file, or fails its checksum as the final
//! entry. Any other unreadable entry is corruption and fails the open.

use super::staged::{apply_writes, scan, StagedTransaction, Writes};
use super::{KvRead, KvStore, Transaction};
use crate::error::StorageError;
use crate::types::{KeyKind, StorageKey};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the manifest and journal headers.
const JOURNAL_MAGIC: &[u8; 4] = b"DJL\0";

/// Current on-disk format version.
const JOURNAL_VERSION: u8 = 1;

/// Size of the journal header (magic + version).
const HEADER_LEN: u64 = 5;

/// Upper bound on a single journal entry, enforced on write and on replay.
#[cfg(not(test))]
const MAX_ENTRY_LEN: usize = 256 * 1024 * 1024;
#[cfg(test)]
const MAX_ENTRY_LEN: usize = 64 * 1024;

/// Framing around an entry body (length + checksum).
const FRAME_LEN: u64 = 8;

const JOURNAL_FILE: &str = "journal.log";
const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";

/// One mutation inside a journal entry.
#[derive(Debug, Serialize, Deserialize)]
enum JournalOp {
    Put { key: StorageKey, value: Vec<u8> },
    Delete { key: StorageKey },
}

/// Outcome of reading one framed entry during replay.
enum EntryRead {
    Entry(Vec<JournalOp>, u64),
    End,
    Torn(&'static str),
}

/// Transactional store persisted in a directory.
pub struct FileStore {
    path: PathBuf,

    /// Lock file for exclusive access.
    _lock_file: File,

    /// Committed entries.
    data: RwLock<BTreeMap<StorageKey, Vec<u8>>>,

    /// Journal append handle; held for the whole lifetime of a write
    /// transaction.
    journal: Mutex<File>,
}

impl FileStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if path.join(MANIFEST_FILE).exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Create a new, empty store.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;

        let lock_file = Self::acquire_lock(&path)?;
        if path.join(MANIFEST_FILE).exists() {
            return Err(StorageError::AlreadyExists(path.display().to_string()));
        }
        Self::write_header(&path.join(MANIFEST_FILE))?;
        Self::write_header(&path.join(JOURNAL_FILE))?;

        let journal = OpenOptions::new()
            .append(true)
            .open(path.join(JOURNAL_FILE))?;

        Ok(Self {
            path,
            _lock_file: lock_file,
            data: RwLock::new(BTreeMap::new()),
            journal: Mutex::new(journal),
        })
    }

    /// Open an existing store, replaying its journal.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let lock_file = Self::acquire_lock(&path)?;
        Self::verify_header(&mut File::open(path.join(MANIFEST_FILE))?)?;

        let journal_path = path.join(JOURNAL_FILE);
        let (data, valid_len) = Self::replay(&journal_path)?;

        let file = OpenOptions::new().write(true).open(&journal_path)?;
        let actual_len = file.metadata()?.len();
        if actual_len > valid_len {
            tracing::warn!(
                path = %journal_path.display(),
                dropped = actual_len - valid_len,
                "truncating torn journal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        drop(file);

        let journal = OpenOptions::new().append(true).open(&journal_path)?;

        tracing::debug!(path = %path.display(), keys = data.len(), "opened file store");

        Ok(Self {
            path,
            _lock_file: lock_file,
            data: RwLock::new(data),
            journal: Mutex::new(journal),
        })
    }

    /// Directory holding the store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current journal size in bytes, header included.
    pub fn journal_len(&self) -> Result<u64, StorageError> {
        Ok(fs::metadata(self.path.join(JOURNAL_FILE))?.len())
    }

    /// Rewrite the journal as a single entry holding the live key set.
    ///
    /// Compactions delete pending records, but their puts and deletes stay in
    /// the journal until it is checkpointed.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        let mut journal = self.journal.lock();

        let ops: Vec<JournalOp> = self
            .data
            .read()
            .iter()
            .map(|(key, value)| JournalOp::Put {
                key: *key,
                value: value.clone(),
            })
            .collect();

        let tmp_path = self.path.join(format!("{}.tmp", JOURNAL_FILE));
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(JOURNAL_MAGIC)?;
            writer.write_all(&[JOURNAL_VERSION])?;
            if !ops.is_empty() {
                Self::write_entry(&mut writer, &ops)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        let journal_path = self.path.join(JOURNAL_FILE);
        fs::rename(&tmp_path, &journal_path)?;
        *journal = OpenOptions::new().append(true).open(&journal_path)?;

        tracing::info!(path = %self.path.display(), keys = ops.len(), "checkpointed journal");
        Ok(())
    }

    fn replay(path: &Path) -> Result<(BTreeMap<StorageKey, Vec<u8>>, u64), StorageError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        Self::verify_header(&mut reader)?;

        let mut data = BTreeMap::new();
        let mut offset = HEADER_LEN;

        loop {
            match Self::read_entry(&mut reader, offset, file_len - offset)? {
                EntryRead::Entry(ops, len) => {
                    for op in ops {
                        match op {
                            JournalOp::Put { key, value } => {
                                data.insert(key, value);
                            }
                            JournalOp::Delete { key } => {
                                data.remove(&key);
                            }
                        }
                    }
                    offset += len;
                }
                EntryRead::End => break,
                EntryRead::Torn(reason) => {
                    tracing::warn!(offset, reason, "found torn journal tail");
                    break;
                }
            }
        }

        Ok((data, offset))
    }

    fn write_entry<W: Write>(writer: &mut W, ops: &[JournalOp]) -> Result<(), StorageError> {
        let encoded = rmp_serde::to_vec(ops)?;

        let too_large = || StorageError::EntryTooLarge {
            len: encoded.len(),
            max: MAX_ENTRY_LEN,
        };
        if encoded.len() > MAX_ENTRY_LEN {
            return Err(too_large());
        }
        let len = u32::try_from(encoded.len()).map_err(|_| too_large())?;

        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&encoded)?;

        let checksum = crc32fast::hash(&encoded);
        writer.write_all(&checksum.to_le_bytes())?;

        Ok(())
    }

    /// Read the entry at `offset`, with `remaining` bytes left in the file.
    fn read_entry<R: Read>(
        reader: &mut R,
        offset: u64,
        remaining: u64,
    ) -> Result<EntryRead, StorageError> {
        if remaining == 0 {
            return Ok(EntryRead::End);
        }
        if remaining < 4 {
            return Ok(EntryRead::Torn("partial length prefix"));
        }

        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        let framed = len as u64 + FRAME_LEN;
        if framed > remaining {
            return Ok(EntryRead::Torn("entry runs past end of journal"));
        }
        if len > MAX_ENTRY_LEN {
            return Err(StorageError::Corruption(format!(
                "Journal entry at offset {} claims {} bytes",
                offset, len
            )));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            if framed == remaining {
                return Ok(EntryRead::Torn("checksum mismatch on final entry"));
            }
            return Err(StorageError::Corruption(format!(
                "Journal checksum mismatch at offset {}",
                offset
            )));
        }

        let ops = rmp_serde::from_slice(&encoded)?;
        Ok(EntryRead::Entry(ops, framed))
    }

    fn write_header(path: &Path) -> Result<(), StorageError> {
        let mut file = File::create(path)?;
        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_header<R: Read>(reader: &mut R) -> Result<(), StorageError> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != JOURNAL_MAGIC {
            return Err(StorageError::InvalidFormat("Invalid journal magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StorageError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File, StorageError> {
        let lock_file = File::create(path.join(LOCK_FILE))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| StorageError::Locked)?;
        Ok(lock_file)
    }

    /// Append and sync one entry. On failure the journal is cut back to
    /// where it stood so a half-written entry never precedes later ones.
    fn persist(journal: &mut File, writes: &Writes) -> Result<(), StorageError> {
        let ops: Vec<JournalOp> = writes
            .iter()
            .map(|(key, staged)| match staged {
                Some(value) => JournalOp::Put {
                    key: *key,
                    value: value.clone(),
                },
                None => JournalOp::Delete { key: *key },
            })
            .collect();

        let mut entry = Vec::new();
        Self::write_entry(&mut entry, &ops)?;

        let start = journal.seek(SeekFrom::End(0))?;
        let result = journal
            .write_all(&entry)
            .and_then(|()| journal.sync_data());

        if let Err(e) = result {
            journal.set_len(start)?;
            return Err(e.into());
        }
        Ok(())
    }
}

impl KvRead for FileStore {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn list(&self, kind: KeyKind) -> Result<BTreeMap<StorageKey, Vec<u8>>, StorageError> {
        Ok(scan(&self.data.read(), kind))
    }
}

impl KvStore for FileStore {
    fn put(&self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError> {
        self.transaction(|tx| tx.put(key, value))
    }

    fn delete(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        self.transaction(|tx| tx.delete(keys))
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut journal = self.journal.lock();

        let (output, writes) = {
            let committed = self.data.read();
            let mut tx = StagedTransaction::new(&committed);
            let output = f(&mut tx)?;
            (output, tx.into_writes())
        };

        if !writes.is_empty() {
            Self::persist(&mut journal, &writes)?;
            apply_writes(&mut self.data.write(), writes);
        }
        Ok(output)
    }
}
