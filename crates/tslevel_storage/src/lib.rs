//! # tslevel Storage
//!
//! On-disk primitives used by the tslevel compaction manager.
//!
//! This crate knows nothing about levels, partitions or compaction. It
//! provides:
//!
//! - [`LogBackend`] - append-only byte logs ([`FileLog`], [`MemoryLog`])
//! - [`TsFileWriter`] / [`TsFileReader`] - the immutable point data file format
//! - [`ModificationFile`] - per-file tombstone records
//! - [`ReaderPool`] / [`MetadataCache`] - path-keyed read-side caches
//!
//! ## Example
//!
//! ```rust
//! use tslevel_storage::{LogBackend, MemoryLog};
//!
//! let mut log = MemoryLog::new();
//! let offset = log.append(b"hello world").unwrap();
//! assert_eq!(offset, 0);
//! assert_eq!(log.read_all().unwrap(), b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;
mod modification;
mod reader;
mod tsfile;

pub use backend::LogBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileLog;
pub use memory::MemoryLog;
pub use modification::{mods_path_for, Modification, ModificationFile, MODS_SUFFIX, UNBOUNDED_OFFSET};
pub use reader::{MetadataCache, ReaderPool};
pub use tsfile::{DataPoint, TsFileMeta, TsFileReader, TsFileWriter, HEADER_SIZE, TSFILE_MAGIC, TSFILE_VERSION};
