//! Property-based test generators using proptest.
//!
//! Provides strategies for data file names, partition directory layouts
//! and point sets that keep the invariants the compaction code relies on.

use proptest::prelude::*;
use std::path::PathBuf;
use tslevel_core::TsFileName;

/// Strategy for generating live data file names.
pub fn ts_file_name_strategy() -> impl Strategy<Value = TsFileName> {
    (1u64..10_000, 0u64..1_000, 0u32..8, prop::option::of(1u32..4)).prop_map(
        |(time, version, merge_count, split)| {
            let name = TsFileName::new(time, version, merge_count);
            match split {
                Some(index) => name.with_split(index),
                None => name,
            }
        },
    )
}

/// Strategy for generating merge counts, including ones far above any
/// sensible level count.
pub fn merge_count_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![0u32..4, 4u32..64, Just(u32::MAX)]
}

/// Strategy for generating sequence file paths under numbered storage
/// directories: `<root>/<dir>/sequence/<partition>/<name>`.
///
/// Roots vary in depth and may carry numeric segments of their own, so
/// paths from different data roots get compared against each other.
pub fn numbered_path_strategy() -> impl Strategy<Value = PathBuf> {
    let root = prop::sample::select(vec!["/data", "/mnt/data", "/data/x", "/7/data", "/srv/0/disk"]);
    (root, 0u32..200, 0i64..3, ts_file_name_strategy()).prop_map(
        |(root, dir, partition, name)| {
            name.in_dir(
                &PathBuf::from(root)
                    .join(dir.to_string())
                    .join("sequence")
                    .join(partition.to_string()),
            )
        },
    )
}

/// Strategy for generating `(series, time, value)` points.
pub fn points_strategy() -> impl Strategy<Value = Vec<(String, i64, f64)>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["s1".to_string(), "s2".to_string()]),
            0i64..200,
            -1_000.0f64..1_000.0,
        ),
        1..40,
    )
}
