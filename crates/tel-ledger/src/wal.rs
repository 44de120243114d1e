use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tel_types::{ChainScope, Digest, Payload};
use tracing::{debug, warn};

use crate::error::LedgerError;
use crate::records::LedgerEntry;

/// Flush/sync strategy for WAL segments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// `fsync` after every append (an acknowledged entry survives power loss).
    #[default]
    EveryWrite,
    /// Flush to the OS page cache only.
    OsDefault,
}

/// Configuration for the write-ahead log.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalConfig {
    pub sync_mode: SyncMode,
}

/// Header size: 4 bytes length + 4 bytes body CRC + 4 bytes header CRC.
pub(crate) const HEADER_SIZE: usize = 12;

/// Upper bound on a single frame; anything larger is a corrupt length field.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Segment file extension.
pub const SEGMENT_EXTENSION: &str = "wal";

/// Frame body. The payload travels as JSON text because bincode cannot
/// carry self-describing values.
#[derive(Serialize, Deserialize)]
struct WalRecord {
    chain_scope: String,
    sequence: u64,
    created_at_micros: i64,
    previous_hash: [u8; 32],
    entry_hash: [u8; 32],
    payload_json: String,
}

impl WalRecord {
    fn from_entry(entry: &LedgerEntry) -> Result<Self, LedgerError> {
        Ok(Self {
            chain_scope: entry.chain_scope.as_str().to_owned(),
            sequence: entry.sequence,
            created_at_micros: entry.created_at.timestamp_micros(),
            previous_hash: (*entry.previous_hash.as_bytes()),
            entry_hash: (*entry.entry_hash.as_bytes()),
            payload_json: serde_json::to_string(&entry.payload)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry, String> {
        let chain_scope = ChainScope::new(self.chain_scope).map_err(|e| e.to_string())?;
        let payload: Payload =
            serde_json::from_str(&self.payload_json).map_err(|e| e.to_string())?;
        Ok(LedgerEntry {
            chain_scope,
            sequence: self.sequence,
            payload,
            created_at: from_micros(self.created_at_micros)
                .ok_or_else(|| format!("timestamp out of range: {}", self.created_at_micros))?,
            previous_hash: Digest::from_hash(self.previous_hash),
            entry_hash: Digest::from_hash(self.entry_hash),
        })
    }
}

fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    Utc.timestamp_opt(secs, nanos).single()
}

/// Outcome of reading a segment front to back.
#[derive(Debug)]
pub struct RecoveredSegment {
    pub entries: Vec<LedgerEntry>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// Byte length of the file as found.
    pub file_len: u64,
}

impl RecoveredSegment {
    /// Returns `true` if a torn tail was found after the valid prefix.
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.file_len
    }

    /// Fail with [`LedgerError::ChainIntegrity`] if the segment has a torn tail.
    pub fn require_clean(&self, scope: &ChainScope) -> Result<(), LedgerError> {
        if self.has_torn_tail() {
            return Err(LedgerError::ChainIntegrity {
                scope: scope.clone(),
                reason: format!(
                    "torn write: {} unreadable trailing bytes after offset {} (run `tel fsck --repair`)",
                    self.file_len - self.valid_len,
                    self.valid_len
                ),
            });
        }
        Ok(())
    }
}

fn frame_header(body: &[u8]) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[..4].copy_from_slice(&(body.len() as u32).to_le_bytes());
    header[4..8].copy_from_slice(&crc32fast::hash(body).to_le_bytes());
    let header_crc = crc32fast::hash(&header[..8]);
    header[8..].copy_from_slice(&header_crc.to_le_bytes());
    header
}

/// Append-only, CRC-framed log holding one chain scope.
///
/// On-disk format, repeated per entry:
/// ```text
/// [4 bytes: body length (little-endian u32)]
/// [4 bytes: CRC32 of body (little-endian u32)]
/// [4 bytes: CRC32 of the previous 8 header bytes (little-endian u32)]
/// [N bytes: body (bincode-serialized record)]
/// ```
///
/// Exclusive access comes from the owning scope's writer lock, so the log
/// itself carries no mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    offset: u64,
    config: WalConfig,
    /// Set when a failed write could not be rolled back. No further appends.
    broken: bool,
}

impl WriteAheadLog {
    /// Open (or create) a segment for appending at its current end.
    pub fn open(path: &Path, config: WalConfig) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            file,
            offset,
            config,
            broken: false,
        })
    }

    /// Append an entry. Returns the byte offset of its frame.
    pub fn append(&mut self, entry: &LedgerEntry) -> Result<u64, LedgerError> {
        if self.broken {
            return Err(LedgerError::Storage(format!(
                "{} has a partial frame that could not be rolled back",
                self.path.display()
            )));
        }
        let body = bincode::serialize(&WalRecord::from_entry(entry)?)
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;
        if body.len() > MAX_FRAME_LEN as usize {
            return Err(LedgerError::InvalidInput(format!(
                "entry of {} bytes exceeds the {MAX_FRAME_LEN} byte frame limit",
                body.len()
            )));
        }

        let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
        frame.extend_from_slice(&frame_header(&body));
        frame.extend_from_slice(&body);
        let entry_offset = self.offset;

        if let Err(err) = self.write_frame(&frame) {
            // Drop any partial frame so the next append starts on a boundary.
            if let Err(rollback) = self.file.set_len(entry_offset) {
                warn!(path = %self.path.display(), error = %rollback, "WAL rollback failed");
                self.broken = true;
            }
            return Err(err);
        }

        self.offset += (HEADER_SIZE + body.len()) as u64;

        debug!(
            path = %self.path.display(),
            offset = entry_offset,
            sequence = entry.sequence,
            len = body.len(),
            "WAL append"
        );
        Ok(entry_offset)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), LedgerError> {
        self.file.write_all(frame)?;
        match self.config.sync_mode {
            SyncMode::EveryWrite => self.file.sync_data()?,
            SyncMode::OsDefault => self.file.flush()?,
        }
        Ok(())
    }

    /// Returns `true` once a failed write has left a partial frame behind.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every frame of a segment.
    ///
    /// Only a short write at the end is tolerated: a partial header, or an
    /// intact header whose body runs past the end of the file. The valid
    /// prefix is returned and the caller decides what to do with the tail.
    /// A header or body CRC failure anywhere, an undecodable frame, a
    /// sequence gap or a foreign scope is a [`LedgerError::ChainIntegrity`].
    pub fn read_segment(path: &Path, scope: &ChainScope) -> Result<RecoveredSegment, LedgerError> {
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        let file_len = data.len() as u64;

        let integrity = |reason: String| LedgerError::ChainIntegrity {
            scope: scope.clone(),
            reason,
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let remaining = data.len() - offset;
            if remaining < HEADER_SIZE {
                warn!(offset, remaining, path = %path.display(), "truncated WAL header at tail");
                break;
            }

            let header = &data[offset..offset + HEADER_SIZE];
            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let header_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

            if crc32fast::hash(&header[..8]) != header_crc {
                return Err(integrity(format!("corrupt frame header at offset {offset}")));
            }

            if length == 0 || length > MAX_FRAME_LEN {
                return Err(integrity(format!(
                    "invalid frame length {length} at offset {offset}"
                )));
            }

            let body_start = offset + HEADER_SIZE;
            let body_end = body_start + length as usize;
            if body_end > data.len() {
                warn!(offset, length, path = %path.display(), "truncated WAL frame at tail");
                break;
            }

            let body = &data[body_start..body_end];
            let actual_crc = crc32fast::hash(body);
            if actual_crc != expected_crc {
                return Err(integrity(format!(
                    "CRC mismatch at offset {offset}: expected {expected_crc:#010x}, got {actual_crc:#010x}"
                )));
            }

            let record: WalRecord = bincode::deserialize(body)
                .map_err(|e| integrity(format!("undecodable frame at offset {offset}: {e}")))?;
            let entry = record
                .into_entry()
                .map_err(|e| integrity(format!("invalid record at offset {offset}: {e}")))?;

            if entry.chain_scope != *scope {
                return Err(integrity(format!(
                    "frame at offset {offset} belongs to scope {}",
                    entry.chain_scope
                )));
            }
            let expected_seq = entries.len() as u64;
            if entry.sequence != expected_seq {
                return Err(integrity(format!(
                    "expected sequence {expected_seq} at offset {offset}, found {}",
                    entry.sequence
                )));
            }

            entries.push(entry);
            offset = body_end;
        }

        debug!(path = %path.display(), recovered = entries.len(), "WAL segment read");
        Ok(RecoveredSegment {
            entries,
            valid_len: offset as u64,
            file_len,
        })
    }

    /// Cut a segment back to its valid prefix after a torn write.
    ///
    /// Administrative repair only; nothing calls this on open.
    pub fn truncate_to(path: &Path, len: u64) -> Result<(), LedgerError> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Seek, SeekFrom};

    use super::*;
    use crate::records::next_timestamp;

    fn scope() -> ChainScope {
        ChainScope::new("org-wal").unwrap()
    }

    fn chain(count: u64) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for seq in 0..count {
            let mut payload = Payload::new();
            payload.insert("event".into(), serde_json::json!(format!("e{seq}")));
            payload.insert("ratio".into(), serde_json::json!(0.1 * seq as f64));
            let prev = entries.last();
            let entry = LedgerEntry::seal(
                scope(),
                seq,
                payload,
                next_timestamp(prev.map(|e| &e.created_at)),
                prev.map(|e| e.entry_hash).unwrap_or_else(Digest::zero),
            );
            entries.push(entry);
        }
        entries
    }

    fn write_all(path: &Path, entries: &[LedgerEntry]) -> Vec<u64> {
        let mut wal = WriteAheadLog::open(path, WalConfig::default()).unwrap();
        entries.iter().map(|e| wal.append(e).unwrap()).collect()
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wal");
        let entries = chain(3);
        write_all(&path, &entries);

        let recovered = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert_eq!(recovered.entries, entries);
        assert!(!recovered.has_torn_tail());
        assert!(recovered.entries.iter().all(LedgerEntry::hash_is_valid));
    }

    #[test]
    fn read_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wal");
        WriteAheadLog::open(&path, WalConfig::default()).unwrap();
        let recovered = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert!(recovered.entries.is_empty());
    }

    #[test]
    fn offsets_increase() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offsets.wal");
        let offsets = write_all(&path, &chain(3));
        assert_eq!(offsets[0], 0);
        assert!(offsets[1] > offsets[0]);
        assert!(offsets[2] > offsets[1]);
    }

    #[test]
    fn reopen_appends_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.wal");
        let entries = chain(2);
        write_all(&path, &entries[..1]);
        write_all(&path, &entries[1..]);
        let recovered = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert_eq!(recovered.entries.len(), 2);
    }

    #[test]
    fn torn_tail_is_tolerated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tail.wal");
        write_all(&path, &chain(2));
        let total = std::fs::metadata(&path).unwrap().len();
        OpenOptions::new().write(true).open(&path).unwrap().set_len(total - 4).unwrap();

        let recovered = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert_eq!(recovered.entries.len(), 1);
        assert!(recovered.has_torn_tail());

        WriteAheadLog::truncate_to(&path, recovered.valid_len).unwrap();
        let again = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert_eq!(again.entries.len(), 1);
        assert!(!again.has_torn_tail());
    }

    #[test]
    fn partial_header_is_a_torn_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("header.wal");
        let offsets = write_all(&path, &chain(2));
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(offsets[1] + 5)
            .unwrap();

        let recovered = WriteAheadLog::read_segment(&path, &scope()).unwrap();
        assert_eq!(recovered.entries.len(), 1);
        assert_eq!(recovered.valid_len, offsets[1]);
        assert!(recovered.require_clean(&scope()).is_err());
    }

    #[test]
    fn crc_failure_on_final_frame_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last.wal");
        let offsets = write_all(&path, &chain(2));
        flip_byte(&path, offsets[1] + HEADER_SIZE as u64);

        let err = WriteAheadLog::read_segment(&path, &scope()).unwrap_err();
        assert!(matches!(err, LedgerError::ChainIntegrity { reason, .. } if reason.contains("CRC")));
    }

    #[test]
    fn corrupt_length_is_integrity_error_not_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("length.wal");
        let offsets = write_all(&path, &chain(3));
        let before = std::fs::metadata(&path).unwrap().len();

        for frame in [offsets[0], offsets[1]] {
            // Length high byte: the frame would now claim to run past EOF.
            flip_byte(&path, frame + 2);
            let err = WriteAheadLog::read_segment(&path, &scope()).unwrap_err();
            assert!(
                matches!(&err, LedgerError::ChainIntegrity { reason, .. } if reason.contains("header")),
                "{err:?}"
            );
            flip_byte(&path, frame + 2);
        }
        assert_eq!(std::fs::metadata(&path).unwrap().len(), before);
    }

    #[test]
    fn crc_failure_mid_log_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mid.wal");
        write_all(&path, &chain(3));
        flip_byte(&path, HEADER_SIZE as u64);

        let err = WriteAheadLog::read_segment(&path, &scope()).unwrap_err();
        assert!(matches!(err, LedgerError::ChainIntegrity { reason, .. } if reason.contains("CRC")));
    }

    #[test]
    fn sequence_discontinuity_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gap.wal");
        let entries = chain(3);
        write_all(&path, &[entries[0].clone(), entries[2].clone()]);

        let err = WriteAheadLog::read_segment(&path, &scope()).unwrap_err();
        assert!(matches!(err, LedgerError::ChainIntegrity { .. }));
    }

    #[test]
    fn foreign_scope_is_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foreign.wal");
        write_all(&path, &chain(1));

        let other = ChainScope::new("org-other").unwrap();
        let err = WriteAheadLog::read_segment(&path, &other).unwrap_err();
        assert!(matches!(err, LedgerError::ChainIntegrity { .. }));
    }

    #[test]
    fn header_checksum_covers_length_and_body_crc() {
        let header = frame_header(b"abc");
        assert_eq!(u32::from_le_bytes([header[0], header[1], header[2], header[3]]), 3);
        let mut bad = header;
        bad[0] ^= 0x01;
        assert_ne!(
            crc32fast::hash(&bad[..8]),
            u32::from_le_bytes([bad[8], bad[9], bad[10], bad[11]])
        );
    }

    #[test]
    fn micros_conversion_handles_pre_epoch() {
        let ts = from_micros(-1).unwrap();
        assert_eq!(ts.timestamp_micros(), -1);
    }

    fn flip_byte(path: &Path, at: u64) {
        let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
        file.seek(SeekFrom::Start(at)).unwrap();
        let mut buf = [0u8; 1];
        file.read_exact(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        file.seek(SeekFrom::Start(at)).unwrap();
        file.write_all(&buf).unwrap();
        file.sync_all().unwrap();
    }
}
