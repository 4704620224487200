use fxhash::FxHashMap;
use ndarray::Array3;
use std::path::{Path, PathBuf};

use super::config::GridAxes;
use super::error::{MaskError, StoreError};
use super::memory::MemoryMonitor;
use super::plot;
use super::status::{publish, ScanStatus, SharedStatus};
use super::store::{checked_step_size, EventStore};
use super::table::EventTable;

/// Cell value for a channel no hit has ever touched.
pub const UNDEFINED: i32 = -1;

/// The hit columns a mask build reads from the build file.
pub const HIT_COLUMNS: [&str; 4] = ["hit_x", "hit_y", "hit_z", "hit_isMasked"];

const SHAPE_HEADER: &str = "# Array shape (z, y, x): ";
const SLICE_HEADER: &str = "# New slice: ";

/// Exact-match lookup from a coordinate value to its bin index along one
/// axis. Keyed on the f64 bit pattern: axis values and hit coordinates
/// originate from the same build, so equality is exact by construction.
fn axis_lookup(centers: &[f64]) -> FxHashMap<u64, usize> {
    centers
        .iter()
        .enumerate()
        .map(|(index, center)| (center.to_bits(), index))
        .collect()
}

/// Resolve still-undefined grid cells from one batch, first observation wins.
///
/// One pass over the batch's hits with computed indices; a cell that already
/// left the undefined state is never rewritten.
fn fill_batch_is_masked(
    batch: &EventTable,
    is_masked: &mut Array3<i32>,
    lookups: &[FxHashMap<u64, usize>; 3],
    cells_found: &mut usize,
) -> Result<(), MaskError> {
    let [x_lookup, y_lookup, z_lookup] = lookups;
    let columns: Vec<_> = HIT_COLUMNS
        .iter()
        .map(|name| {
            batch
                .column(name)
                .ok_or_else(|| MaskError::MissingColumn((*name).to_string()))
        })
        .collect::<Result<_, _>>()?;
    let (col_x, col_y, col_z, col_m) = (columns[0], columns[1], columns[2], columns[3]);

    for row in 0..batch.n_rows() {
        let xs = col_x.row(row);
        let ys = col_y.row(row);
        let zs = col_z.row(row);
        let ms = col_m.row(row);
        for (((x, y), z), m) in xs.iter().zip(ys).zip(zs).zip(ms) {
            let (Some(&x_id), Some(&y_id), Some(&z_id)) = (
                x_lookup.get(&x.to_bits()),
                y_lookup.get(&y.to_bits()),
                z_lookup.get(&z.to_bits()),
            ) else {
                continue;
            };
            let cell = &mut is_masked[[x_id, y_id, z_id]];
            if *cell == UNDEFINED {
                *cell = i32::from(*m != 0.0);
                *cells_found += 1;
            }
        }
    }
    Ok(())
}

/// Scan batches and record, for every grid coordinate, the masked flag of the
/// first hit observed there. Cells never touched stay [`UNDEFINED`].
///
/// Stops early once every cell is resolved; the mask state of a channel is
/// static for the run, so the first hit per channel is sufficient.
pub fn get_is_masked<I>(
    batches: I,
    axes: &GridAxes,
    total_entries: u64,
    status: Option<&SharedStatus>,
) -> Result<Array3<i32>, MaskError>
where
    I: IntoIterator<Item = Result<EventTable, StoreError>>,
{
    let shape = (axes.x.len(), axes.y.len(), axes.z.len());
    let mut is_masked = Array3::from_elem(shape, UNDEFINED);
    let total_cells = is_masked.len();
    let lookups = [
        axis_lookup(&axes.x),
        axis_lookup(&axes.y),
        axis_lookup(&axes.z),
    ];

    let mut monitor = MemoryMonitor::new();
    let mut cells_found = 0usize;
    let mut scanned: u64 = 0;
    for batch in batches {
        let batch = batch?;
        scanned += batch.n_rows() as u64;
        fill_batch_is_masked(&batch, &mut is_masked, &lookups, &mut cells_found)?;

        monitor.check_swap_growth();
        log::info!(
            "Cells found: {cells_found}/{total_cells}, events: {scanned}/{total_entries}"
        );
        publish(
            status,
            ScanStatus {
                fraction: scanned as f32 / total_entries.max(1) as f32,
                n_triggered: 0,
                cells_found: cells_found as u64,
                memory_percent: monitor.percent_used() as f32,
            },
        );

        if cells_found == total_cells {
            break;
        }
    }
    Ok(is_masked)
}

/// Dump a 3-D grid to a plain-text file, transposed to (z, y, x) axis order.
///
/// Lines starting with `#` are comments for the reader: the shape header and
/// one marker per z-slice. The written file is immediately read back to check
/// that it reproduces the grid exactly.
pub fn write_grid(data: &Array3<i32>, file_name: &Path) -> Result<(), MaskError> {
    let zyx_data = data.view().permuted_axes([2, 1, 0]);
    let mut text = String::new();
    let shape = zyx_data.shape();
    text.push_str(&format!(
        "{SHAPE_HEADER}({}, {}, {})\n",
        shape[0], shape[1], shape[2]
    ));
    for (slice_index, yx_data) in zyx_data.outer_iter().enumerate() {
        text.push_str(&format!("{SLICE_HEADER}{slice_index}\n"));
        for row in yx_data.outer_iter() {
            let formatted: Vec<String> = row.iter().map(|value| format!("{value:+}")).collect();
            text.push_str(&formatted.join(" "));
            text.push('\n');
        }
        text.push('\n');
    }
    std::fs::write(file_name, text)?;

    // Check that the written file can be recovered.
    let loaded = read_grid(file_name)?;
    if loaded != *data {
        return Err(MaskError::RoundTripFailure(file_name.to_path_buf()));
    }
    Ok(())
}

/// Read a grid written by [`write_grid`] back into (x, y, z) axis order.
pub fn read_grid(file_name: &Path) -> Result<Array3<i32>, MaskError> {
    let text = std::fs::read_to_string(file_name)?;
    let header = text
        .lines()
        .find_map(|line| line.strip_prefix(SHAPE_HEADER))
        .ok_or_else(|| MaskError::MissingHeader(file_name.to_path_buf()))?;
    let inner = header
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| MaskError::BadHeader(header.to_string()))?;
    let shape: Vec<usize> = inner
        .split(',')
        .map(|number| number.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|_| MaskError::BadHeader(header.to_string()))?;
    if shape.len() != 3 {
        return Err(MaskError::BadHeader(header.to_string()));
    }

    let mut values = Vec::with_capacity(shape.iter().product());
    for line in text.lines() {
        if line.starts_with('#') {
            continue;
        }
        for number in line.split_whitespace() {
            values.push(number.parse::<i32>()?);
        }
    }
    let expected = shape[0] * shape[1] * shape[2];
    if values.len() != expected {
        return Err(MaskError::BadValueCount {
            expected,
            found: values.len(),
        });
    }
    let zyx = Array3::from_shape_vec((shape[0], shape[1], shape[2]), values)
        .map_err(|_| MaskError::BadValueCount {
            expected,
            found: 0,
        })?;
    Ok(zyx.permuted_axes([2, 1, 0]).to_owned())
}

/// Bin edges for plotting an axis of coordinate centers: midpoints between
/// consecutive centers, with the two boundary edges mirroring the adjacent
/// gap.
pub fn bin_edges(centers: &[f64]) -> Result<Vec<f64>, MaskError> {
    if centers.len() < 2 {
        return Err(MaskError::AxisTooShort(centers.len()));
    }
    let mut edges = Vec::with_capacity(centers.len() + 1);
    edges.push(centers[0] - (centers[1] - centers[0]) / 2.0);
    for pair in centers.windows(2) {
        edges.push((pair[0] + pair[1]) / 2.0);
    }
    edges.push(centers[centers.len() - 1] + (centers[centers.len() - 1] - centers[centers.len() - 2]) / 2.0);
    Ok(edges)
}

/// Per-channel mask grid: for every (x, y, z) detector channel, whether its
/// readout is excluded from analysis (1), included (0) or never observed
/// ([`UNDEFINED`]).
#[derive(Debug, Clone)]
pub struct Mask {
    pub values: Array3<i32>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub z: Vec<f64>,
    pub bins_x: Vec<f64>,
    pub bins_y: Vec<f64>,
    pub bins_z: Vec<f64>,
}

impl Mask {
    /// Wrap a grid with axis metadata. Without axes, bin indices stand in
    /// for coordinates.
    pub fn new(values: Array3<i32>, axes: Option<&GridAxes>) -> Result<Self, MaskError> {
        let (x, y, z) = match axes {
            Some(axes) => (axes.x.clone(), axes.y.clone(), axes.z.clone()),
            None => {
                let shape = values.shape();
                (
                    (0..shape[0]).map(|i| i as f64).collect(),
                    (0..shape[1]).map(|i| i as f64).collect(),
                    (0..shape[2]).map(|i| i as f64).collect(),
                )
            }
        };
        let bins_x = bin_edges(&x)?;
        let bins_y = bin_edges(&y)?;
        let bins_z = bin_edges(&z)?;
        Ok(Self {
            values,
            x,
            y,
            z,
            bins_x,
            bins_y,
            bins_z,
        })
    }

    pub fn n_layers(&self) -> usize {
        self.values.shape()[2]
    }

    /// Render one diagnostic image per z-layer into `save_folder`.
    pub fn save_plots(&self, save_folder: &Path) -> Result<(), MaskError> {
        for layer in 0..self.n_layers() {
            let path = save_folder.join(format!("mask_{layer:02}.png"));
            plot::render_layer(self, layer, &path)?;
        }
        Ok(())
    }

    /// Build the mask from the build file, or load it if `mask_dir/mask.txt`
    /// already exists. A fresh build persists the grid (text format) and one
    /// diagnostic image per layer into `mask_dir`.
    pub fn from_build_file(
        mask_dir: &Path,
        build_file: &Path,
        build_tree: &str,
        axes: &GridAxes,
        entry_stop: Option<u64>,
        step_size: &str,
        status: Option<&SharedStatus>,
    ) -> Result<Mask, MaskError> {
        let mask_file: PathBuf = mask_dir.join("mask.txt");
        if mask_file.exists() {
            let values = read_grid(&mask_file)?;
            return Mask::new(values, Some(axes));
        }

        log::info!("Mask file not found, will be created.");
        let store = EventStore::open(build_file, build_tree)?;
        for name in HIT_COLUMNS {
            if !store.has_column(name) {
                return Err(MaskError::MissingColumn(name.to_string()));
            }
        }
        let mut monitor = MemoryMonitor::new();
        let step_bytes = checked_step_size(step_size, &mut monitor)?;
        let batches = store.batches(Some(&HIT_COLUMNS), entry_stop, step_bytes)?;
        let total_entries = batches.total_entries();
        let values = get_is_masked(batches, axes, total_entries, status)?;
        write_grid(&values, &mask_file)?;
        let mask = Mask::new(values, Some(axes))?;
        mask.save_plots(mask_dir)?;
        Ok(mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    fn hit_batch(hits: &[(f64, f64, f64, f64)]) -> Result<EventTable, StoreError> {
        // One event holding all the hits
        let mut table = EventTable::new();
        let n = hits.len();
        let columns: [(&str, fn(&(f64, f64, f64, f64)) -> f64); 4] = [
            ("hit_x", |h| h.0),
            ("hit_y", |h| h.1),
            ("hit_z", |h| h.2),
            ("hit_isMasked", |h| h.3),
        ];
        for (name, pick) in columns {
            table
                .insert(
                    name,
                    Column::Jagged {
                        offsets: vec![0, n],
                        values: hits.iter().map(pick).collect(),
                    },
                )
                .unwrap();
        }
        Ok(table)
    }

    fn square_axes() -> GridAxes {
        GridAxes {
            x: vec![0.0, 1.0],
            y: vec![0.0, 1.0],
            z: vec![0.0],
        }
    }

    #[test]
    fn test_grid_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mask.txt");
        let mut data = Array3::<i32>::zeros((10, 9, 5));
        for (index, value) in data.iter_mut().enumerate() {
            *value = (index as i32 % 7) - 3;
        }
        write_grid(&data, &file).unwrap();
        let loaded = read_grid(&file).unwrap();
        assert_eq!(loaded.shape(), data.shape());
        assert_eq!(loaded, data);
    }

    #[test]
    fn test_grid_header_is_zyx() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mask.txt");
        let data = Array3::<i32>::from_elem((10, 9, 5), UNDEFINED);
        write_grid(&data, &file).unwrap();
        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.starts_with("# Array shape (z, y, x): (5, 9, 10)\n"));
        assert!(text.contains("# New slice: 4\n"));
        assert!(text.contains("-1 -1"));
    }

    #[test]
    fn test_malformed_grid_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mask.txt");

        std::fs::write(&file, "+1 +0 -1\n").unwrap();
        assert!(matches!(
            read_grid(&file),
            Err(MaskError::MissingHeader(_))
        ));

        std::fs::write(&file, "# Array shape (z, y, x): (1, 2\n+1\n").unwrap();
        assert!(matches!(read_grid(&file), Err(MaskError::BadHeader(_))));

        std::fs::write(&file, "# Array shape (z, y, x): (1, 1, 2)\n+1 +0 -1\n").unwrap();
        assert!(matches!(
            read_grid(&file),
            Err(MaskError::BadValueCount { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_first_observation_wins() {
        let axes = square_axes();
        let batches = vec![
            hit_batch(&[(0.0, 0.0, 0.0, 1.0)]),
            hit_batch(&[(0.0, 0.0, 0.0, 0.0), (1.0, 1.0, 0.0, 1.0)]),
        ];
        let grid = get_is_masked(batches, &axes, 2, None).unwrap();
        // Cell (0,0,0) keeps the value of the first batch
        assert_eq!(grid[[0, 0, 0]], 1);
        assert_eq!(grid[[1, 1, 0]], 1);
        // Coordinates never hit stay undefined
        assert_eq!(grid[[0, 1, 0]], UNDEFINED);
        assert_eq!(grid[[1, 0, 0]], UNDEFINED);
    }

    #[test]
    fn test_off_grid_hits_are_ignored() {
        let axes = square_axes();
        let batches = vec![hit_batch(&[(5.0, 0.0, 0.0, 1.0), (0.0, 0.0, 7.5, 0.0)])];
        let grid = get_is_masked(batches, &axes, 1, None).unwrap();
        assert!(grid.iter().all(|cell| *cell == UNDEFINED));
    }

    #[test]
    fn test_bin_edges() {
        let edges = bin_edges(&[0.0, 1.0, 2.0]).unwrap();
        assert_eq!(edges, vec![-0.5, 0.5, 1.5, 2.5]);
        // Boundary edges mirror the adjacent gap even when gaps differ
        let uneven = bin_edges(&[0.0, 1.0, 3.0]).unwrap();
        assert_eq!(uneven, vec![-0.5, 0.5, 2.0, 4.0]);
        assert!(matches!(
            bin_edges(&[1.0]),
            Err(MaskError::AxisTooShort(1))
        ));
    }

    #[test]
    fn test_build_then_load_skips_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let build_file = dir.path().join("build.h5");
        let batch = hit_batch(&[(0.0, 0.0, 0.0, 1.0), (1.0, 1.0, 0.0, 1.0)]).unwrap();
        crate::store::write_table(&build_file, "ecal", &batch).unwrap();

        let axes = square_axes_with_two_layers();
        let mask = Mask::from_build_file(
            dir.path(),
            &build_file,
            "ecal",
            &axes,
            None,
            "1 kB",
            None,
        )
        .unwrap();
        assert_eq!(mask.values[[0, 0, 0]], 1);
        assert_eq!(mask.values[[1, 1, 0]], 1);
        assert_eq!(mask.values[[0, 1, 0]], UNDEFINED);
        assert!(dir.path().join("mask.txt").exists());
        assert!(dir.path().join("mask_00.png").exists());
        assert!(dir.path().join("mask_01.png").exists());

        // With mask.txt present the build file is never opened.
        let reloaded = Mask::from_build_file(
            dir.path(),
            &dir.path().join("no_such_build.h5"),
            "ecal",
            &axes,
            None,
            "1 kB",
            None,
        )
        .unwrap();
        assert_eq!(reloaded.values, mask.values);
    }

    fn square_axes_with_two_layers() -> GridAxes {
        GridAxes {
            x: vec![0.0, 1.0],
            y: vec![0.0, 1.0],
            z: vec![0.0, 1.0],
        }
    }
}
