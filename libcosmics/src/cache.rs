use std::path::{Path, PathBuf};
use std::time::Instant;

use super::error::CacheError;
use super::filter::{normalize_trigger, trigger_to_filename, Filter};
use super::memory::MemoryMonitor;
use super::status::{publish, ScanStatus, SharedStatus};
use super::store::{checked_step_size, table_file_path, write_table, EventStore};
use super::table::EventTable;

/// Load (or create) only those events passing a trigger.
///
/// The first unbounded request for a trigger runs the full filtered scan of
/// the build file and persists the result in the triggered-file directory,
/// keyed by the whitespace-normalized trigger text. Every later unbounded
/// request for the same trigger loads that file instead of rescanning.
/// Bounded requests never touch the cache in either direction: their result
/// depends on the truncation point and would poison the cache for future
/// differently-bounded requests.
#[derive(Debug, Clone)]
pub struct TriggeredCache {
    triggered_dir: PathBuf,
    build_file: PathBuf,
    build_tree: String,
    step_size: String,
}

impl TriggeredCache {
    pub fn new(
        triggered_dir: &Path,
        build_file: &Path,
        build_tree: &str,
        step_size: &str,
    ) -> Self {
        Self {
            triggered_dir: triggered_dir.to_path_buf(),
            build_file: build_file.to_path_buf(),
            build_tree: build_tree.to_string(),
            step_size: step_size.to_string(),
        }
    }

    /// The cache entry path a trigger maps to. Triggers differing only in
    /// whitespace map to the same entry.
    pub fn cache_file(&self, trigger: &str) -> PathBuf {
        let stem = trigger_to_filename(&normalize_trigger(trigger));
        table_file_path(&self.triggered_dir, &stem)
    }

    /// Return the events passing `trigger`.
    ///
    /// With `entry_stop` set, at most that many triggered events are
    /// accumulated (the scan stops early once the bound is reached) and the
    /// result is neither written to nor read from the cache.
    pub fn get(
        &self,
        trigger: &str,
        entry_stop: Option<u64>,
        status: Option<&SharedStatus>,
    ) -> Result<EventTable, CacheError> {
        let trigger_cleaned = normalize_trigger(trigger);
        let filter: Filter = trigger_cleaned.parse()?;
        let filename = self.cache_file(&trigger_cleaned);
        if entry_stop.is_none() && filename.exists() {
            self.load_events(&filename)
        } else {
            self.select_events(&filter, &trigger_cleaned, &filename, entry_stop, status)
        }
    }

    fn load_events(&self, filename: &Path) -> Result<EventTable, CacheError> {
        let store = EventStore::open(filename, &self.build_tree)?;
        let events = store.read_all()?;
        log::debug!(
            "Loaded {} prebuilt triggered events from {:?}.",
            events.n_rows(),
            filename
        );
        Ok(events)
    }

    fn select_events(
        &self,
        filter: &Filter,
        trigger_cleaned: &str,
        filename: &Path,
        entry_stop: Option<u64>,
        status: Option<&SharedStatus>,
    ) -> Result<EventTable, CacheError> {
        let time_start_building = Instant::now();
        log::info!("No prebuilt file for trigger: {trigger_cleaned}. Please wait.");
        if let Some(stop) = entry_stop {
            log::info!(
                "Only partial reading ({stop} triggered events) was chosen. \
                 In this setting, the selected events will not be saved to disk."
            );
        } else if !self.triggered_dir.exists() {
            // Fail before the scan, not after it
            return Err(CacheError::BadCacheDir(self.triggered_dir.clone()));
        }

        let store = EventStore::open(&self.build_file, &self.build_tree)?;
        let mut monitor = MemoryMonitor::new();
        let step_bytes = checked_step_size(&self.step_size, &mut monitor)?;
        let batches = store.batches(None, None, step_bytes)?;
        let total_raw = batches.total_entries();

        let mut events = EventTable::new();
        let mut scanned: u64 = 0;
        for batch in batches {
            let batch = batch?;
            scanned += batch.n_rows() as u64;
            let keep = filter.evaluate(&batch)?;
            events.append(&batch.select(&keep))?;

            monitor.check_swap_growth();
            let memory_percent = monitor.percent_used();
            log::info!(
                "Raw events: {scanned}/{total_raw}, n_triggered: {}, mem [%]: {memory_percent:.1}",
                events.n_rows()
            );
            publish(
                status,
                ScanStatus {
                    fraction: scanned as f32 / total_raw.max(1) as f32,
                    n_triggered: events.n_rows() as u64,
                    cells_found: 0,
                    memory_percent: memory_percent as f32,
                },
            );

            if let Some(stop) = entry_stop {
                if events.n_rows() as u64 >= stop {
                    events = events.truncated(stop as usize);
                    break;
                }
            }
        }

        if entry_stop.is_none() {
            write_table(filename, &self.build_tree, &events)?;
        }
        log::info!(
            "Selecting the events took {}s.",
            time_start_building.elapsed().as_secs()
        );
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store;
    use crate::table::Column;

    fn write_build_file(dir: &Path) -> PathBuf {
        let mut table = EventTable::new();
        table
            .insert(
                "nhit_slab",
                Column::Scalar(vec![3.0, 8.0, 12.0, 5.0, 9.0, 10.0]),
            )
            .unwrap();
        table
            .insert(
                "hit_x",
                Column::Jagged {
                    offsets: vec![0, 1, 3, 4, 4, 6, 7],
                    values: vec![0.5, 1.5, 2.5, 3.5, 4.5, 5.5, 6.5],
                },
            )
            .unwrap();
        let path = store::table_file_path(dir, "build");
        store::write_table(&path, "ecal", &table).unwrap();
        path
    }

    fn cache_in(dir: &Path) -> (TriggeredCache, PathBuf) {
        let build_file = write_build_file(dir);
        let triggered_dir = dir.join("triggered");
        std::fs::create_dir_all(&triggered_dir).unwrap();
        (
            TriggeredCache::new(&triggered_dir, &build_file, "ecal", "1 kB"),
            triggered_dir,
        )
    }

    #[test]
    fn test_unbounded_scan_creates_cache_and_hits_it() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, triggered_dir) = cache_in(dir.path());

        let selected = cache.get("nhit_slab > 7", None, None).unwrap();
        assert_eq!(selected.n_rows(), 4);
        let entry = triggered_dir.join("nhit_slab_greater_than_7.h5");
        assert!(entry.exists());

        // Whitespace variants hit the same entry; the loaded table matches.
        let reloaded = cache.get("nhit_slab\t>   7", None, None).unwrap();
        assert_eq!(reloaded, selected);
        assert_eq!(
            std::fs::read_dir(&triggered_dir).unwrap().count(),
            1,
            "a second entry must not appear"
        );
    }

    #[test]
    fn test_bounded_request_never_caches() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, triggered_dir) = cache_in(dir.path());

        let selected = cache.get("nhit_slab > 7", Some(2), None).unwrap();
        assert_eq!(selected.n_rows(), 2);
        assert_eq!(selected.column("nhit_slab").unwrap().row(0), &[8.0]);
        assert_eq!(selected.column("nhit_slab").unwrap().row(1), &[12.0]);
        assert_eq!(std::fs::read_dir(&triggered_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_bounded_request_ignores_existing_cache() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        let full = cache.get("nhit_slab > 7", None, None).unwrap();
        assert_eq!(full.n_rows(), 4);
        // Larger bound than the cached row count: a rescan returns all 4
        // matches, it does not report the cache's contents.
        let bounded = cache.get("nhit_slab > 7", Some(10), None).unwrap();
        assert_eq!(bounded.n_rows(), 4);
    }

    #[test]
    fn test_cache_preserves_all_columns() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _) = cache_in(dir.path());

        let selected = cache.get("nhit_slab>9", None, None).unwrap();
        assert_eq!(selected.n_rows(), 2);
        // Rows 2 and 5 of the build file
        assert_eq!(selected.column("hit_x").unwrap().row(0), &[3.5]);
        assert_eq!(selected.column("hit_x").unwrap().row(1), &[6.5]);
        let reloaded = cache.get("nhit_slab>9", None, None).unwrap();
        assert_eq!(reloaded, selected);
    }

    #[test]
    fn test_bad_trigger_is_fatal_before_any_scan() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, triggered_dir) = cache_in(dir.path());
        assert!(cache.get("nhit_slab >", None, None).is_err());
        assert!(cache.get("nhit_slap > 7", None, None).is_err());
        assert_eq!(std::fs::read_dir(&triggered_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_cache_dir_is_fatal_for_unbounded() {
        let dir = tempfile::tempdir().unwrap();
        let build_file = write_build_file(dir.path());
        let cache = TriggeredCache::new(
            &dir.path().join("does_not_exist"),
            &build_file,
            "ecal",
            "1 kB",
        );
        assert!(matches!(
            cache.get("nhit_slab > 7", None, None),
            Err(CacheError::BadCacheDir(_))
        ));
    }
}
