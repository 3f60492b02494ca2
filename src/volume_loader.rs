use crate::{
    enums::RecoveryPolicy,
    slice::{SliceError, SliceRecord},
    volume::Volume,
};

use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{debug, warn};
use web_time::Instant;

/// Records at or below this many samples are never zero padded.
pub const MIN_VIABLE_SAMPLES: usize = 100;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    EmptyBatch,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from named buffers
    ///
    /// # Arguments
    ///
    /// * `buffers` - (source identifier, file contents) pairs, in any order
    /// * `policy` - How aggressively damaged streams are recovered
    ///
    /// # Errors
    ///
    /// Returns [`VolumeLoaderError::EmptyBatch`] if no buffer contributes a
    /// slice. Individual buffers that fail are logged and skipped.
    pub fn load_from_buffers<N, B>(
        buffers: &[(N, B)],
        policy: RecoveryPolicy,
    ) -> Result<Volume, VolumeLoaderError>
    where
        N: AsRef<str> + Sync,
        B: AsRef<[u8]> + Sync,
    {
        let start = Instant::now();
        let records = Self::parse_all(buffers, policy);
        let volume = Self::assemble(records)?;
        debug!(
            files = buffers.len(),
            dimensions = ?volume.dimensions(),
            elapsed = ?start.elapsed(),
            "loaded volume"
        );
        Ok(volume)
    }

    /// Load a volume from file paths, using each path as source identifier
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path>],
        policy: RecoveryPolicy,
    ) -> Result<Volume, VolumeLoaderError> {
        let buffers: Result<Vec<_>, _> = paths
            .iter()
            .map(|path| {
                let path = path.as_ref();
                fs::read(path).map(|bytes| (path.to_string_lossy().into_owned(), bytes))
            })
            .collect();

        Self::load_from_buffers(&buffers?, policy)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        policy: RecoveryPolicy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::EmptyBatch);
        }

        Self::load_from_file_paths(&paths, policy)
    }

    /// Decodes every buffer independently. Failed buffers are dropped, the
    /// survivors keep their input order.
    pub fn parse_all<N, B>(buffers: &[(N, B)], policy: RecoveryPolicy) -> Vec<SliceRecord>
    where
        N: AsRef<str> + Sync,
        B: AsRef<[u8]> + Sync,
    {
        buffers
            .par_iter()
            .filter_map(|(name, bytes)| {
                match SliceRecord::parse(name.as_ref(), bytes.as_ref(), policy) {
                    Ok(record) => Some(record),
                    Err(SliceError::NoPixelData { source_id }) => {
                        warn!(source_id = %source_id, "dropping file without pixel data");
                        None
                    }
                }
            })
            .collect()
    }

    /// Orders, validates and stacks the records into one normalized volume.
    pub fn assemble(mut records: Vec<SliceRecord>) -> Result<Volume, VolumeLoaderError> {
        if records.is_empty() {
            return Err(VolumeLoaderError::EmptyBatch);
        }

        Self::sort_records(&mut records);

        let first = &records[0];
        let (rows, columns) = (first.rows as usize, first.columns as usize);
        let slice_len = rows * columns;
        let window = first.window;

        let accepted: Vec<&SliceRecord> = records
            .iter()
            .filter(|record| Self::is_viable(record, slice_len))
            .collect();
        if accepted.is_empty() {
            return Err(VolumeLoaderError::EmptyBatch);
        }

        let depth = accepted.len();
        let mut raw = Vec::with_capacity(slice_len * depth);
        for record in &accepted {
            record.samples.write_padded(&mut raw, slice_len);
        }

        Volume::from_raw(&raw, (depth, rows, columns), window).ok_or(VolumeLoaderError::EmptyBatch)
    }

    /// Ascending instance number when every record has one, otherwise by
    /// source identifier. The sort is stable, so ties keep input order.
    pub fn sort_records(records: &mut [SliceRecord]) {
        if records.iter().all(|r| r.instance_number.is_some()) {
            records.sort_by_key(|r| r.instance_number);
        } else {
            records.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        }
    }

    fn is_viable(record: &SliceRecord, slice_len: usize) -> bool {
        let samples = record.samples.len();
        if samples >= slice_len || samples > MIN_VIABLE_SAMPLES {
            if samples < slice_len {
                debug!(source_id = %record.source_id, samples, slice_len, "zero padding short slice");
            }
            return true;
        }
        warn!(
            source_id = %record.source_id,
            samples, slice_len, "dropping slice below minimum size"
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slice::Samples;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn record(source_id: &str, instance_number: Option<i64>, samples: Samples) -> SliceRecord {
        SliceRecord {
            source_id: source_id.to_string(),
            samples,
            rows: 4,
            columns: 4,
            instance_number,
            window: None,
            metadata: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn sorts_by_instance_number_when_complete() {
        let mut records: Vec<_> = [3, 1, 4, 2]
            .iter()
            .map(|&n| record(&format!("f{n}"), Some(n), Samples::U8(vec![n as u8; 16])))
            .collect();
        VolumeLoader::sort_records(&mut records);
        let order: Vec<_> = records.iter().map(|r| r.instance_number.unwrap()).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn falls_back_to_source_order_when_any_index_missing() {
        let mut records = vec![
            record("b", Some(1), Samples::U8(vec![0; 16])),
            record("a", None, Samples::U8(vec![0; 16])),
            record("b", Some(0), Samples::U8(vec![1; 16])),
        ];
        VolumeLoader::sort_records(&mut records);
        let order: Vec<_> = records
            .iter()
            .map(|r| (r.source_id.as_str(), r.instance_number))
            .collect();
        assert_eq!(order, vec![("a", None), ("b", Some(1)), ("b", Some(0))]);
    }

    #[test]
    fn pads_viable_slices_and_drops_tiny_ones() {
        let mut big = record("a", Some(1), Samples::U8(vec![10; 400]));
        big.rows = 20;
        big.columns = 20;
        let short = record("b", Some(2), Samples::U8(vec![20; 150]));
        let tiny = record("c", Some(3), Samples::U8(vec![30; 50]));

        let volume = VolumeLoader::assemble(vec![tiny, short, big]).unwrap();
        assert_eq!(volume.dimensions(), [20, 20, 2]);
        assert_eq!(volume.data().len(), 20 * 20 * 2);
        let second = volume.slice(1).unwrap();
        assert_eq!(second[[7, 9]], 255);
        assert_eq!(second[[7, 10]], 0);
    }

    #[test]
    fn empty_batch_is_fatal() {
        assert!(matches!(
            VolumeLoader::assemble(Vec::new()),
            Err(VolumeLoaderError::EmptyBatch)
        ));
        let buffers: Vec<(&str, Vec<u8>)> = vec![("x", vec![]), ("y", vec![1, 2, 3])];
        assert!(matches!(
            VolumeLoader::load_from_buffers(&buffers, RecoveryPolicy::Strict),
            Err(VolumeLoaderError::EmptyBatch)
        ));
    }
}
