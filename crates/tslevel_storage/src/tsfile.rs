//! Point data file ("tsfile") format.
//!
//! A tsfile is an immutable, sorted run of data points written in one go.
//!
//! ```text
//! | magic (4) | version (2) | point_count (8) | min_time (8) | max_time (8) |
//! | series_len (2) | series (N) | time (8) | value (8) |  ... repeated ...
//! | crc32 (4) |
//! ```
//!
//! Points are ordered by `(series, time)` with no duplicate keys. The
//! header time range covers every point; an empty file records `0..=0`.
//! The trailing CRC32 covers every byte before it, so a file that was only
//! partially written before a crash is always detected on open.

use crate::error::{StorageError, StorageResult};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes identifying a tsfile.
pub const TSFILE_MAGIC: [u8; 4] = *b"TSLF";

/// Current tsfile format version.
pub const TSFILE_VERSION: u16 = 1;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 30;

const CRC_SIZE: usize = 4;

/// A single time-series sample.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    /// Series path, e.g. `root.sg.d1.s1`.
    pub series: String,
    /// Timestamp in milliseconds.
    pub time: i64,
    /// Sample value.
    pub value: f64,
}

impl DataPoint {
    /// Creates a data point.
    pub fn new(series: impl Into<String>, time: i64, value: f64) -> Self {
        Self {
            series: series.into(),
            time,
            value,
        }
    }

    /// Compares two points by their `(series, time)` key.
    #[must_use]
    pub fn key_cmp(&self, other: &Self) -> Ordering {
        self.series
            .cmp(&other.series)
            .then(self.time.cmp(&other.time))
    }

    fn encoded_len(&self) -> usize {
        2 + self.series.len() + 8 + 8
    }
}

/// Header metadata of a tsfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsFileMeta {
    /// Number of points in the file.
    pub point_count: u64,
    /// Smallest timestamp in the file.
    pub min_time: i64,
    /// Largest timestamp in the file.
    pub max_time: i64,
}

impl TsFileMeta {
    /// Returns true if the file holds no points.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.point_count == 0
    }

    fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&TSFILE_MAGIC);
        buf[4..6].copy_from_slice(&TSFILE_VERSION.to_le_bytes());
        buf[6..14].copy_from_slice(&self.point_count.to_le_bytes());
        buf[14..22].copy_from_slice(&self.min_time.to_le_bytes());
        buf[22..30].copy_from_slice(&self.max_time.to_le_bytes());
        buf
    }

    fn decode(path: &Path, data: &[u8]) -> StorageResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StorageError::corrupted(path, "header truncated"));
        }
        if data[0..4] != TSFILE_MAGIC {
            return Err(StorageError::corrupted(path, "invalid magic"));
        }
        let version = u16::from_le_bytes([data[4], data[5]]);
        if version > TSFILE_VERSION {
            return Err(StorageError::corrupted(
                path,
                format!("unsupported version {version}"),
            ));
        }
        Ok(Self {
            point_count: read_u64(&data[6..14]),
            min_time: read_u64(&data[14..22]) as i64,
            max_time: read_u64(&data[22..30]) as i64,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

/// Buffers sorted points and writes them out as one tsfile.
///
/// Nothing touches the filesystem until [`finish`](Self::finish).
#[derive(Debug)]
pub struct TsFileWriter {
    path: PathBuf,
    points: Vec<DataPoint>,
    body_len: usize,
}

impl TsFileWriter {
    /// Creates a writer that will produce `path`.
    #[must_use]
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            points: Vec::new(),
            body_len: 0,
        }
    }

    /// Returns the target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a point.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfOrder`] unless `point` sorts strictly
    /// after the previously written point.
    pub fn write(&mut self, point: DataPoint) -> StorageResult<()> {
        if let Some(last) = self.points.last() {
            if point.key_cmp(last) != Ordering::Greater {
                return Err(StorageError::OutOfOrder {
                    series: point.series,
                    time: point.time,
                });
            }
        }
        self.body_len += point.encoded_len();
        self.points.push(point);
        Ok(())
    }

    /// Number of points buffered so far.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Size the file will have on disk if finished now.
    #[must_use]
    pub fn encoded_len(&self) -> u64 {
        (HEADER_SIZE + self.body_len + CRC_SIZE) as u64
    }

    /// Writes the file, syncs it, and returns its header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn finish(self) -> StorageResult<TsFileMeta> {
        let (min_time, max_time) = if self.points.is_empty() {
            (0, 0)
        } else {
            let min = self.points.iter().map(|p| p.time).min().unwrap_or(0);
            let max = self.points.iter().map(|p| p.time).max().unwrap_or(0);
            (min, max)
        };
        let meta = TsFileMeta {
            point_count: self.points.len() as u64,
            min_time,
            max_time,
        };

        let mut data = Vec::with_capacity(HEADER_SIZE + self.body_len + CRC_SIZE);
        data.extend_from_slice(&meta.encode());
        for point in &self.points {
            let series = point.series.as_bytes();
            let len = u16::try_from(series.len()).map_err(|_| {
                StorageError::corrupted(&self.path, format!("series name too long: {}", point.series))
            })?;
            data.extend_from_slice(&len.to_le_bytes());
            data.extend_from_slice(series);
            data.extend_from_slice(&point.time.to_le_bytes());
            data.extend_from_slice(&point.value.to_bits().to_le_bytes());
        }
        let crc = crc32fast::hash(&data);
        data.extend_from_slice(&crc.to_le_bytes());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        file.write_all(&data)?;
        file.sync_all()?;
        Ok(meta)
    }
}

/// A fully loaded, verified tsfile.
#[derive(Debug, Clone)]
pub struct TsFileReader {
    path: PathBuf,
    meta: TsFileMeta,
    points: Vec<DataPoint>,
}

impl TsFileReader {
    /// Opens and verifies a tsfile.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, truncated, or fails its
    /// checksum.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let data = fs::read(path)?;
        if data.len() < HEADER_SIZE + CRC_SIZE {
            return Err(StorageError::corrupted(path, "file truncated"));
        }

        let body_end = data.len() - CRC_SIZE;
        let expected = u32::from_le_bytes([
            data[body_end],
            data[body_end + 1],
            data[body_end + 2],
            data[body_end + 3],
        ]);
        let actual = crc32fast::hash(&data[..body_end]);
        if expected != actual {
            return Err(StorageError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                actual,
            });
        }

        let meta = TsFileMeta::decode(path, &data)?;
        let mut points = Vec::with_capacity(usize::try_from(meta.point_count).unwrap_or(0));
        let mut cursor = HEADER_SIZE;
        while cursor < body_end {
            if cursor + 2 > body_end {
                return Err(StorageError::corrupted(path, "point truncated"));
            }
            let len = u16::from_le_bytes([data[cursor], data[cursor + 1]]) as usize;
            cursor += 2;
            if cursor + len + 16 > body_end {
                return Err(StorageError::corrupted(path, "point truncated"));
            }
            let series = std::str::from_utf8(&data[cursor..cursor + len])
                .map_err(|_| StorageError::corrupted(path, "series is not UTF-8"))?
                .to_string();
            cursor += len;
            let time = read_u64(&data[cursor..cursor + 8]) as i64;
            cursor += 8;
            let value = f64::from_bits(read_u64(&data[cursor..cursor + 8]));
            cursor += 8;
            points.push(DataPoint {
                series,
                time,
                value,
            });
        }

        if points.len() as u64 != meta.point_count {
            return Err(StorageError::corrupted(
                path,
                format!(
                    "header declares {} points, found {}",
                    meta.point_count,
                    points.len()
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            meta,
            points,
        })
    }

    /// Reads only the header of a tsfile, without verifying the body.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or its header is invalid.
    pub fn read_meta(path: &Path) -> StorageResult<TsFileMeta> {
        let mut file = File::open(path)?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)
            .map_err(|_| StorageError::corrupted(path, "header truncated"))?;
        TsFileMeta::decode(path, &buf)
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the header.
    #[must_use]
    pub const fn meta(&self) -> TsFileMeta {
        self.meta
    }

    /// Returns all points in key order.
    #[must_use]
    pub fn points(&self) -> &[DataPoint] {
        &self.points
    }

    /// Consumes the reader, returning its points.
    #[must_use]
    pub fn into_points(self) -> Vec<DataPoint> {
        self.points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn write_file(path: &Path, points: &[(&str, i64, f64)]) -> TsFileMeta {
        let mut writer = TsFileWriter::new(path);
        for &(series, time, value) in points {
            writer.write(DataPoint::new(series, time, value)).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn write_then_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("1-1-0.tsfile");
        let meta = write_file(&path, &[("s1", 10, 1.0), ("s1", 20, 2.0), ("s2", 5, 3.0)]);

        assert_eq!(meta.point_count, 3);
        assert_eq!(meta.min_time, 5);
        assert_eq!(meta.max_time, 20);

        let reader = TsFileReader::open(&path).unwrap();
        assert_eq!(reader.meta(), meta);
        assert_eq!(reader.points()[2], DataPoint::new("s2", 5, 3.0));
        assert_eq!(TsFileReader::read_meta(&path).unwrap(), meta);
    }

    #[test]
    fn rejects_out_of_order_points() {
        let dir = tempdir().unwrap();
        let mut writer = TsFileWriter::new(&dir.path().join("x.tsfile"));
        writer.write(DataPoint::new("s1", 10, 0.0)).unwrap();

        let err = writer.write(DataPoint::new("s1", 10, 1.0)).unwrap_err();
        assert!(matches!(err, StorageError::OutOfOrder { time: 10, .. }));
        assert!(writer.write(DataPoint::new("s0", 99, 1.0)).is_err());
    }

    #[test]
    fn encoded_len_matches_file_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.tsfile");
        let mut writer = TsFileWriter::new(&path);
        writer.write(DataPoint::new("abc", 1, 0.5)).unwrap();
        let expected = writer.encoded_len();
        writer.finish().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn detects_truncated_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.tsfile");
        write_file(&path, &[("s1", 1, 1.0), ("s1", 2, 2.0)]);

        let data = fs::read(&path).unwrap();
        fs::write(&path, &data[..data.len() - 7]).unwrap();

        assert!(TsFileReader::open(&path).is_err());
    }

    #[test]
    fn detects_flipped_bit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.tsfile");
        write_file(&path, &[("s1", 1, 1.0)]);

        let mut data = fs::read(&path).unwrap();
        data[HEADER_SIZE + 3] ^= 0x40;
        fs::write(&path, &data).unwrap();

        assert!(matches!(
            TsFileReader::open(&path),
            Err(StorageError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn empty_file_has_zero_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("x.tsfile");
        let meta = TsFileWriter::new(&path).finish().unwrap();

        assert!(meta.is_empty());
        assert_eq!((meta.min_time, meta.max_time), (0, 0));
        assert!(TsFileReader::open(&path).unwrap().points().is_empty());
    }

    proptest! {
        #[test]
        fn any_corrupted_byte_is_detected(
            times in prop::collection::btree_set(-1_000i64..1_000, 1..20),
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let dir = tempdir().unwrap();
            let path = dir.path().join("x.tsfile");
            let points: Vec<_> = times.iter().map(|&t| ("s1", t, t as f64)).collect();
            write_file(&path, &points);

            let mut data = fs::read(&path).unwrap();
            let at = index.index(data.len());
            data[at] ^= mask;
            fs::write(&path, &data).unwrap();

            prop_assert!(TsFileReader::open(&path).is_err());
        }
    }
}
