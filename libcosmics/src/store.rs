use hdf5::File;
use ndarray::s;
use std::path::{Path, PathBuf};

use super::error::StoreError;
use super::memory::MemoryMonitor;
use super::table::{Column, EventTable};

/// Suffix of the offsets dataset that accompanies every jagged column.
const OFFSETS_SUFFIX: &str = "_offsets";
/// Attribute on the table group holding the total event count.
const ENTRY_COUNT_ATTR: &str = "n_entries";

/// Parse a batch memory budget of the form `<number><unit>`, unit in
/// kB/MB/GB, e.g. "250 MB". Returns the budget in bytes.
pub fn parse_step_size(step_size: &str) -> Result<u64, StoreError> {
    let cleaned = step_size.trim();
    let (number_str, multiplier) = if let Some(prefix) = cleaned.strip_suffix("GB") {
        (prefix, 1024u64.pow(3))
    } else if let Some(prefix) = cleaned.strip_suffix("MB") {
        (prefix, 1024u64.pow(2))
    } else if let Some(prefix) = cleaned.strip_suffix("kB") {
        (prefix, 1024u64)
    } else {
        return Err(StoreError::BadStepSize(step_size.to_string()));
    };
    let number = number_str
        .trim()
        .parse::<f64>()
        .map_err(|_| StoreError::BadStepSize(step_size.to_string()))?;
    if !number.is_finite() || number <= 0.0 {
        return Err(StoreError::BadStepSize(step_size.to_string()));
    }
    Ok((number * multiplier as f64) as u64)
}

/// Parse a step size and warn if it is large relative to the memory this
/// machine currently has to spare. The 1/20 fraction is chosen from
/// experience with our cosmics files.
pub fn checked_step_size(
    step_size: &str,
    monitor: &mut MemoryMonitor,
) -> Result<u64, StoreError> {
    let step_bytes = parse_step_size(step_size)?;
    let available = monitor.available_bytes();
    if step_bytes > available / 20 {
        log::warn!(
            "The batch size seems too large for this machine's memory: {} with {} available.",
            step_size,
            human_bytes::human_bytes(available as f64)
        );
    }
    Ok(step_bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnKind {
    Scalar,
    Jagged,
}

/// A columnar event store backed by an HDF5 file.
///
/// One group per table. The group carries an `n_entries` attribute; a scalar
/// column is a 1-D f64 dataset named after the column, and a jagged column is
/// a flat f64 dataset plus a `<name>_offsets` u64 dataset of length
/// `n_entries + 1`.
#[derive(Debug)]
pub struct EventStore {
    table: hdf5::Group,
    table_name: String,
    n_entries: u64,
    schema: Vec<(String, ColumnKind)>,
    // Keeps the HDF5 file handle alive for the lifetime of the store
    _file: File,
}

impl EventStore {
    /// Open a store file and the named table inside it.
    pub fn open(path: &Path, table_name: &str) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let table = file
            .group(table_name)
            .map_err(|_| StoreError::MissingTable(table_name.to_string()))?;
        let n_entries = table
            .attr(ENTRY_COUNT_ATTR)
            .and_then(|attr| attr.read_scalar::<u64>())
            .map_err(|_| StoreError::MissingEntryCount(table_name.to_string()))?;

        let members = table.member_names()?;
        let mut schema = Vec::new();
        for name in &members {
            if name.ends_with(OFFSETS_SUFFIX) {
                continue;
            }
            let kind = if members.contains(&format!("{name}{OFFSETS_SUFFIX}")) {
                ColumnKind::Jagged
            } else {
                ColumnKind::Scalar
            };
            schema.push((name.clone(), kind));
        }
        schema.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(Self {
            table,
            table_name: table_name.to_string(),
            n_entries,
            schema,
            _file: file,
        })
    }

    pub fn n_entries(&self) -> u64 {
        self.n_entries
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.schema.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.schema.iter().any(|(n, _)| n == name)
    }

    /// Average stored bytes per event across the given columns, used to turn
    /// a byte budget into a row count per batch.
    fn bytes_per_entry(&self, columns: &[(String, ColumnKind)]) -> Result<f64, StoreError> {
        if self.n_entries == 0 {
            return Ok(1.0);
        }
        let mut total_bytes = 0usize;
        for (name, kind) in columns {
            total_bytes += self.table.dataset(name)?.size() * std::mem::size_of::<f64>();
            if *kind == ColumnKind::Jagged {
                let offsets_name = format!("{name}{OFFSETS_SUFFIX}");
                total_bytes += self.table.dataset(&offsets_name)?.size() * std::mem::size_of::<u64>();
            }
        }
        Ok(total_bytes as f64 / self.n_entries as f64)
    }

    fn subset_schema(&self, columns: Option<&[&str]>) -> Result<Vec<(String, ColumnKind)>, StoreError> {
        match columns {
            None => Ok(self.schema.clone()),
            Some(names) => {
                let mut subset = Vec::with_capacity(names.len());
                for name in names {
                    let entry = self
                        .schema
                        .iter()
                        .find(|(n, _)| n == name)
                        .ok_or_else(|| StoreError::MissingColumn((*name).to_string()))?;
                    subset.push(entry.clone());
                }
                subset.sort_by(|a, b| a.0.cmp(&b.0));
                Ok(subset)
            }
        }
    }

    fn read_column(&self, name: &str, kind: &ColumnKind, start: u64, stop: u64) -> Result<Column, StoreError> {
        let (start, stop) = (start as usize, stop as usize);
        match kind {
            ColumnKind::Scalar => {
                let values = if start == stop {
                    Vec::new()
                } else {
                    self.table
                        .dataset(name)?
                        .read_slice_1d::<f64, _>(s![start..stop])?
                        .to_vec()
                };
                Ok(Column::Scalar(values))
            }
            ColumnKind::Jagged => {
                let offsets_name = format!("{name}{OFFSETS_SUFFIX}");
                let raw_offsets = self
                    .table
                    .dataset(&offsets_name)?
                    .read_slice_1d::<u64, _>(s![start..stop + 1])?;
                let base = *raw_offsets
                    .first()
                    .ok_or_else(|| StoreError::BadOffsets(name.to_string()))?;
                let mut offsets = Vec::with_capacity(raw_offsets.len());
                for raw in &raw_offsets {
                    if *raw < base {
                        return Err(StoreError::BadOffsets(name.to_string()));
                    }
                    offsets.push((raw - base) as usize);
                }
                let value_stop = base as usize + offsets[offsets.len() - 1];
                let values = if base as usize == value_stop {
                    Vec::new()
                } else {
                    self.table
                        .dataset(name)?
                        .read_slice_1d::<f64, _>(s![base as usize..value_stop])?
                        .to_vec()
                };
                Ok(Column::Jagged { offsets, values })
            }
        }
    }

    /// Read the row range `[start, stop)` of the given columns (all columns
    /// if `None`) into an in-memory table.
    pub fn read_rows(
        &self,
        start: u64,
        stop: u64,
        columns: Option<&[&str]>,
    ) -> Result<EventTable, StoreError> {
        let schema = self.subset_schema(columns)?;
        let mut table = EventTable::new();
        for (name, kind) in &schema {
            table.insert(name, self.read_column(name, kind, start, stop)?)?;
        }
        Ok(table)
    }

    /// Read the whole table.
    pub fn read_all(&self) -> Result<EventTable, StoreError> {
        self.read_rows(0, self.n_entries, None)
    }

    /// Iterate the table in batches whose decompressed size stays near
    /// `step_bytes`, stopping after `entry_stop` raw events if given.
    pub fn batches(
        &self,
        columns: Option<&[&str]>,
        entry_stop: Option<u64>,
        step_bytes: u64,
    ) -> Result<BatchIter<'_>, StoreError> {
        let schema = self.subset_schema(columns)?;
        let bytes_per_entry = self.bytes_per_entry(&schema)?.max(1.0);
        let rows_per_batch = ((step_bytes as f64 / bytes_per_entry) as u64).max(1);
        let stop = entry_stop
            .unwrap_or(self.n_entries)
            .min(self.n_entries);
        Ok(BatchIter {
            store: self,
            schema,
            cursor: 0,
            stop,
            rows_per_batch,
        })
    }
}

/// Batch-sequential iterator over an [`EventStore`] table. Each batch is
/// fully materialized before the next one is requested, which bounds peak
/// memory to roughly one batch.
#[derive(Debug)]
pub struct BatchIter<'a> {
    store: &'a EventStore,
    schema: Vec<(String, ColumnKind)>,
    cursor: u64,
    stop: u64,
    rows_per_batch: u64,
}

impl BatchIter<'_> {
    /// Number of raw events this iterator will cover in total.
    pub fn total_entries(&self) -> u64 {
        self.stop
    }
}

impl Iterator for BatchIter<'_> {
    type Item = Result<EventTable, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.stop {
            return None;
        }
        let stop = (self.cursor + self.rows_per_batch).min(self.stop);
        let mut table = EventTable::new();
        for (name, kind) in &self.schema {
            match self.store.read_column(name, kind, self.cursor, stop) {
                Ok(column) => {
                    if let Err(e) = table.insert(name, column) {
                        return Some(Err(e));
                    }
                }
                Err(e) => return Some(Err(e)),
            }
        }
        self.cursor = stop;
        Some(Ok(table))
    }
}

/// Persist a table to `path` under the given table name, in the same layout
/// [`EventStore`] reads. The file is written in one pass after the table is
/// fully in memory.
pub fn write_table(path: &Path, table_name: &str, table: &EventTable) -> Result<(), StoreError> {
    let file = File::create(path)?;
    let group = file.create_group(table_name)?;
    group
        .new_attr::<u64>()
        .create(ENTRY_COUNT_ATTR)?
        .write_scalar(&(table.n_rows() as u64))?;
    for (name, column) in table.columns() {
        match column {
            Column::Scalar(values) => {
                group
                    .new_dataset_builder()
                    .with_data(values.as_slice())
                    .create(name)?;
            }
            Column::Jagged { offsets, values } => {
                group
                    .new_dataset_builder()
                    .with_data(values.as_slice())
                    .create(name)?;
                let offsets_u64: Vec<u64> = offsets.iter().map(|off| *off as u64).collect();
                group
                    .new_dataset_builder()
                    .with_data(offsets_u64.as_slice())
                    .create(format!("{name}{OFFSETS_SUFFIX}").as_str())?;
            }
        }
    }
    Ok(())
}

/// The path of a sibling file in `dir`, used for cache entries.
pub fn table_file_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{stem}.h5"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EventTable {
        let mut table = EventTable::new();
        table
            .insert(
                "nhit_slab",
                Column::Scalar(vec![3.0, 8.0, 12.0, 8.0, 1.0]),
            )
            .unwrap();
        table
            .insert(
                "hit_x",
                Column::Jagged {
                    offsets: vec![0, 2, 3, 3, 6, 7],
                    values: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0],
                },
            )
            .unwrap();
        table
    }

    #[test]
    fn test_write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_file_path(dir.path(), "events");
        let table = sample_table();
        write_table(&path, "ecal", &table).unwrap();

        let store = EventStore::open(&path, "ecal").unwrap();
        assert_eq!(store.n_entries(), 5);
        let back = store.read_all().unwrap();
        assert_eq!(back, table);
    }

    #[test]
    fn test_batches_cover_all_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_file_path(dir.path(), "events");
        write_table(&path, "ecal", &sample_table()).unwrap();
        let store = EventStore::open(&path, "ecal").unwrap();

        // A tiny budget forces one row per batch.
        let batches: Vec<EventTable> = store
            .batches(None, None, 1)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(batches.len(), 5);
        let mut merged = EventTable::new();
        for batch in &batches {
            merged.append(batch).unwrap();
        }
        assert_eq!(merged, sample_table());
    }

    #[test]
    fn test_entry_stop_bounds_raw_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_file_path(dir.path(), "events");
        write_table(&path, "ecal", &sample_table()).unwrap();
        let store = EventStore::open(&path, "ecal").unwrap();

        let iter = store.batches(None, Some(2), 1024 * 1024).unwrap();
        assert_eq!(iter.total_entries(), 2);
        let rows: usize = iter.map(|b| b.unwrap().n_rows()).sum();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_column_subset() {
        let dir = tempfile::tempdir().unwrap();
        let path = table_file_path(dir.path(), "events");
        write_table(&path, "ecal", &sample_table()).unwrap();
        let store = EventStore::open(&path, "ecal").unwrap();

        let subset = store.read_rows(1, 4, Some(&["hit_x"])).unwrap();
        assert_eq!(subset.n_rows(), 3);
        assert!(subset.column("nhit_slab").is_none());
        assert_eq!(subset.column("hit_x").unwrap().row(0), &[3.0]);
        assert_eq!(subset.column("hit_x").unwrap().row(2), &[4.0, 5.0, 6.0]);

        assert!(matches!(
            store.read_rows(0, 1, Some(&["no_such"])),
            Err(StoreError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_missing_file_and_table() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.h5");
        assert!(matches!(
            EventStore::open(&missing, "ecal"),
            Err(StoreError::BadFilePath(_))
        ));

        let path = table_file_path(dir.path(), "events");
        write_table(&path, "ecal", &sample_table()).unwrap();
        assert!(matches!(
            EventStore::open(&path, "hcal"),
            Err(StoreError::MissingTable(_))
        ));
    }

    #[test]
    fn test_parse_step_size_units() {
        assert_eq!(parse_step_size("1 kB").unwrap(), 1024);
        assert_eq!(parse_step_size("250 MB").unwrap(), 250 * 1024 * 1024);
        assert_eq!(parse_step_size("2GB").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_step_size("0.5 MB").unwrap(), 512 * 1024);
        assert!(parse_step_size("100").is_err());
        assert!(parse_step_size("100 TB").is_err());
        assert!(parse_step_size("lots MB").is_err());
        assert!(parse_step_size("-1 MB").is_err());
    }
}
