//! Merge writer over the local tsfile format.

use crate::collaborators::{FileMerger, MergeOutput, MergeRequest};
use crate::error::{CoreError, CoreResult};
use crate::naming::TsFileName;
use crate::resource::FileResource;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tslevel_storage::{DataPoint, Modification, TsFileReader, TsFileWriter};

/// Merges tsfiles point by point.
///
/// Every source is read in full, points deleted by that source's own
/// modifications are dropped, and on duplicate `(series, time)` keys the
/// later source wins. The result is written in key order and cut into a
/// new output whenever an output reaches the configured size; extra
/// outputs carry a split index in their name.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileMerger;

impl LocalFileMerger {
    /// Creates a merger.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl FileMerger for LocalFileMerger {
    fn merge(&self, request: &MergeRequest<'_>) -> CoreResult<MergeOutput> {
        let partition = request
            .sources
            .first()
            .map(|source| source.partition())
            .ok_or_else(|| CoreError::merge_failed("no source files"))?;
        if request.modifications.len() != request.sources.len() {
            return Err(CoreError::merge_failed(format!(
                "{} sources but {} modification lists",
                request.sources.len(),
                request.modifications.len()
            )));
        }
        let primary = TsFileName::from_path(request.target)?;
        let dir = request
            .target
            .parent()
            .ok_or_else(|| CoreError::merge_failed("target has no parent directory"))?;

        let mut merged: BTreeMap<(String, i64), f64> = BTreeMap::new();
        let mut applied: Vec<Modification> = Vec::new();
        for (source, modifications) in request.sources.iter().zip(request.modifications) {
            let reader = TsFileReader::open(source.path())?;
            let mut dropped = 0usize;
            for point in reader.into_points() {
                if modifications.iter().any(|m| m.covers(&point.series, point.time)) {
                    dropped += 1;
                    continue;
                }
                merged.insert((point.series, point.time), point.value);
            }
            for modification in modifications {
                if !applied.iter().any(|m| m.same_predicate(modification)) {
                    applied.push(modification.clone());
                }
            }
            debug!(source = %source.path().display(), dropped, "read merge source");
        }

        let mut outputs: Vec<PathBuf> = Vec::new();
        let mut writer = TsFileWriter::new(request.target);
        for ((series, time), value) in merged {
            if writer.point_count() > 0 && writer.encoded_len() >= request.target_file_size {
                let split = u32::try_from(outputs.len() + 1)
                    .map_err(|_| CoreError::merge_failed("too many merge outputs"))?;
                let next = TsFileWriter::new(&primary.with_split(split).in_dir(dir));
                let full = std::mem::replace(&mut writer, next);
                outputs.push(full.path().to_path_buf());
                full.finish()?;
            }
            writer.write(DataPoint::new(series, time, value))?;
        }
        outputs.push(writer.path().to_path_buf());
        writer.finish()?;

        let targets = outputs
            .into_iter()
            .map(|path| FileResource::open_sealed(path, partition).map(Arc::new))
            .collect::<CoreResult<Vec<_>>>()?;

        debug!(
            target = %request.target.display(),
            outputs = targets.len(),
            applied = applied.len(),
            "merge written"
        );
        Ok(MergeOutput { targets, applied })
    }
}
