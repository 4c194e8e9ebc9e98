//! Compaction log.
//!
//! One log per storage group records the merge in flight so that a restart
//! can undo or finish it. Records are framed like this:
//!
//! ```text
//! | magic (4) | type (1) | len (4) | payload (len) | crc32 (4) |
//! ```
//!
//! The CRC covers everything before it. A record cut short at the end of
//! the log is a torn append and ends the log; a CRC mismatch on a complete
//! record is corruption.

use crate::error::{CoreError, CoreResult};
use std::path::{Path, PathBuf};
use tslevel_storage::{FileLog, LogBackend};

/// Magic bytes opening every log record.
pub const LOG_MAGIC: [u8; 4] = *b"TSCL";

/// Suffix of the log file, appended to the storage group name.
pub const COMPACTION_LOG_SUFFIX: &str = ".compaction.log";

/// magic (4) + type (1) + length (4)
const HEADER_SIZE: usize = 9;

const CRC_SIZE: usize = 4;

/// Type of a log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A merge source.
    Source = 1,
    /// The merge target.
    Target = 2,
    /// The swap committed.
    MergeFinished = 3,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Source),
            2 => Some(Self::Target),
            3 => Some(Self::MergeFinished),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// One compaction log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A file being merged away.
    Source {
        /// Path of the source file.
        path: PathBuf,
        /// Whether it is a sequence file.
        sequence: bool,
    },
    /// The primary output of the merge.
    Target {
        /// Path of the target file.
        path: PathBuf,
    },
    /// The registry swap committed; only cleanup remains.
    MergeFinished,
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub const fn record_type(&self) -> LogRecordType {
        match self {
            Self::Source { .. } => LogRecordType::Source,
            Self::Target { .. } => LogRecordType::Target,
            Self::MergeFinished => LogRecordType::MergeFinished,
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        match self {
            Self::Source { path, sequence } => {
                let mut buf = vec![u8::from(*sequence)];
                buf.extend_from_slice(path.to_string_lossy().as_bytes());
                buf
            }
            Self::Target { path } => path.to_string_lossy().as_bytes().to_vec(),
            Self::MergeFinished => Vec::new(),
        }
    }

    fn decode_payload(log_path: &Path, record_type: LogRecordType, payload: &[u8]) -> CoreResult<Self> {
        let utf8_path = |bytes: &[u8]| -> CoreResult<PathBuf> {
            std::str::from_utf8(bytes)
                .map(PathBuf::from)
                .map_err(|_| CoreError::log_corruption(log_path, "path is not UTF-8"))
        };

        match record_type {
            LogRecordType::Source => {
                let (flag, path) = payload
                    .split_first()
                    .ok_or_else(|| CoreError::log_corruption(log_path, "empty source record"))?;
                Ok(Self::Source {
                    path: utf8_path(path)?,
                    sequence: *flag != 0,
                })
            }
            LogRecordType::Target => Ok(Self::Target {
                path: utf8_path(payload)?,
            }),
            LogRecordType::MergeFinished => {
                if !payload.is_empty() {
                    return Err(CoreError::log_corruption(
                        log_path,
                        format!("trailing bytes in merge-finished record: {}", payload.len()),
                    ));
                }
                Ok(Self::MergeFinished)
            }
        }
    }

    /// Encodes the record with its envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload does not fit the length field.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = self.encode_payload();
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_operation("compaction log record too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&LOG_MAGIC);
        data.push(self.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }
}

/// Decodes every complete record in `data`, stopping at a torn tail.
///
/// # Errors
///
/// Returns an error on bad magic, unknown record type or CRC mismatch.
pub fn decode_records(log_path: &Path, data: &[u8]) -> CoreResult<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut offset = 0;

    while offset + HEADER_SIZE + CRC_SIZE <= data.len() {
        let header = &data[offset..offset + HEADER_SIZE];
        if header[0..4] != LOG_MAGIC {
            return Err(CoreError::log_corruption(
                log_path,
                format!("invalid magic at offset {offset}"),
            ));
        }
        let record_type = LogRecordType::from_byte(header[4]).ok_or_else(|| {
            CoreError::log_corruption(log_path, format!("unknown record type {}", header[4]))
        })?;
        let len = u32::from_le_bytes([header[5], header[6], header[7], header[8]]) as usize;

        let end = offset + HEADER_SIZE + len;
        if end + CRC_SIZE > data.len() {
            break;
        }
        let expected = u32::from_le_bytes([data[end], data[end + 1], data[end + 2], data[end + 3]]);
        let actual = crc32fast::hash(&data[offset..end]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let payload = &data[offset + HEADER_SIZE..end];
        records.push(LogRecord::decode_payload(log_path, record_type, payload)?);
        offset = end + CRC_SIZE;
    }

    Ok(records)
}

/// Appends records to the compaction log, syncing after each.
pub struct CompactionLogger {
    path: PathBuf,
    log: Box<dyn LogBackend>,
}

impl CompactionLogger {
    /// Opens the log at `path`. The file is created on first append.
    pub fn open(path: &Path) -> Self {
        Self::with_backend(path, Box::new(FileLog::new(path)))
    }

    /// Uses an explicit backend.
    pub fn with_backend(path: &Path, log: Box<dyn LogBackend>) -> Self {
        Self {
            path: path.to_path_buf(),
            log,
        }
    }

    /// Path of the log.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record durably.
    ///
    /// # Errors
    ///
    /// Returns an error if the write or sync fails.
    pub fn append(&mut self, record: &LogRecord) -> CoreResult<()> {
        self.log.append(&record.encode()?)?;
        self.log.sync()?;
        Ok(())
    }

    /// Records a merge source.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn log_source(&mut self, path: &Path, sequence: bool) -> CoreResult<()> {
        self.append(&LogRecord::Source {
            path: path.to_path_buf(),
            sequence,
        })
    }

    /// Records the merge target.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn log_target(&mut self, path: &Path) -> CoreResult<()> {
        self.append(&LogRecord::Target {
            path: path.to_path_buf(),
        })
    }

    /// Records that the swap committed.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn log_merge_finished(&mut self) -> CoreResult<()> {
        self.append(&LogRecord::MergeFinished)
    }

    /// Deletes the log. Absence of the log means a clean state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists and cannot be removed.
    pub fn remove(mut self) -> CoreResult<()> {
        self.log.remove()?;
        Ok(())
    }
}

impl std::fmt::Debug for CompactionLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompactionLogger")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// What a compaction log says about the interrupted merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionLogSummary {
    /// Source files with their axis, in log order.
    pub sources: Vec<(PathBuf, bool)>,
    /// Target of the merge, if it was logged.
    pub target: Option<PathBuf>,
    /// Whether the swap committed before the interruption.
    pub merge_finished: bool,
}

impl CompactionLogSummary {
    /// Returns true if the log holds nothing to act on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty() && self.target.is_none() && !self.merge_finished
    }
}

/// Reads a compaction log back.
#[derive(Debug)]
pub struct CompactionLogAnalyzer;

impl CompactionLogAnalyzer {
    /// Summarizes the log file at `path`. A missing file is an empty log.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is corrupted.
    pub fn analyze(path: &Path) -> CoreResult<CompactionLogSummary> {
        Self::analyze_backend(path, &FileLog::new(path))
    }

    /// Summarizes the log held by `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or is corrupted.
    pub fn analyze_backend(path: &Path, log: &dyn LogBackend) -> CoreResult<CompactionLogSummary> {
        let data = log.read_all()?;
        let mut summary = CompactionLogSummary::default();
        for record in decode_records(path, &data)? {
            match record {
                LogRecord::Source { path, sequence } => summary.sources.push((path, sequence)),
                LogRecord::Target { path } => summary.target = Some(path),
                LogRecord::MergeFinished => summary.merge_finished = true,
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tslevel_storage::MemoryLog;

    fn log_path() -> PathBuf {
        PathBuf::from("/sg/root.compaction.log")
    }

    #[test]
    fn record_type_roundtrip() {
        for t in [LogRecordType::Source, LogRecordType::Target, LogRecordType::MergeFinished] {
            assert_eq!(LogRecordType::from_byte(t.as_byte()), Some(t));
        }
        assert_eq!(LogRecordType::from_byte(0), None);
    }

    #[test]
    fn summary_of_full_cycle() {
        let memory = MemoryLog::new();
        let mut logger = CompactionLogger::with_backend(&log_path(), Box::new(memory.clone()));
        logger.log_source(Path::new("/sg/sequence/0/1-1-0.tsfile"), true).unwrap();
        logger.log_source(Path::new("/sg/unsequence/0/2-1-0.tsfile"), false).unwrap();
        logger.log_target(Path::new("/sg/sequence/0/1-1-1.tsfile")).unwrap();
        logger.log_merge_finished().unwrap();

        let summary = CompactionLogAnalyzer::analyze_backend(&log_path(), &memory).unwrap();
        assert_eq!(summary.sources.len(), 2);
        assert!(summary.sources[0].1);
        assert!(!summary.sources[1].1);
        assert_eq!(summary.target, Some(PathBuf::from("/sg/sequence/0/1-1-1.tsfile")));
        assert!(summary.merge_finished);
    }

    #[test]
    fn torn_tail_is_ignored() {
        let mut data = LogRecord::Target {
            path: PathBuf::from("/t.tsfile"),
        }
        .encode()
        .unwrap();
        let second = LogRecord::MergeFinished.encode().unwrap();
        data.extend_from_slice(&second[..second.len() - 2]);

        let records = decode_records(&log_path(), &data).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn crc_mismatch_is_corruption() {
        let mut data = LogRecord::Target {
            path: PathBuf::from("/t.tsfile"),
        }
        .encode()
        .unwrap();
        data[HEADER_SIZE] ^= 0xFF;

        let err = decode_records(&log_path(), &data).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn bad_magic_is_corruption() {
        let mut data = LogRecord::MergeFinished.encode().unwrap();
        data[0] = b'X';
        let err = decode_records(&log_path(), &data).unwrap_err();
        assert!(matches!(err, CoreError::LogCorruption { .. }));
    }

    #[test]
    fn missing_file_is_empty_log() {
        let dir = tempdir().unwrap();
        let summary = CompactionLogAnalyzer::analyze(&dir.path().join("sg.compaction.log")).unwrap();
        assert!(summary.is_empty());
    }

    #[test]
    fn file_log_removed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sg.compaction.log");
        let mut logger = CompactionLogger::open(&path);
        logger.log_target(Path::new("/t.tsfile")).unwrap();
        assert!(path.exists());

        logger.remove().unwrap();
        assert!(!path.exists());
    }
}
