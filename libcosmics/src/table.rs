use std::collections::BTreeMap;

use super::error::StoreError;

/// One named column of an event batch.
///
/// Scalar columns hold one value per event (e.g. `nhit_slab`, `sum_energy`).
/// Jagged columns hold a variable-length sequence per event (e.g. `hit_x`),
/// stored as a flat value buffer plus per-event offsets with
/// `offsets.len() == n_rows + 1`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Scalar(Vec<f64>),
    Jagged {
        offsets: Vec<usize>,
        values: Vec<f64>,
    },
}

impl Column {
    pub fn n_rows(&self) -> usize {
        match self {
            Column::Scalar(values) => values.len(),
            Column::Jagged { offsets, .. } => offsets.len().saturating_sub(1),
        }
    }

    /// In-memory footprint of the column data
    pub fn estimated_bytes(&self) -> usize {
        match self {
            Column::Scalar(values) => std::mem::size_of_val(values.as_slice()),
            Column::Jagged { offsets, values } => {
                std::mem::size_of_val(offsets.as_slice()) + std::mem::size_of_val(values.as_slice())
            }
        }
    }

    /// The values of row `row`. Scalar rows are one-element slices.
    pub fn row(&self, row: usize) -> &[f64] {
        match self {
            Column::Scalar(values) => &values[row..=row],
            Column::Jagged { offsets, values } => &values[offsets[row]..offsets[row + 1]],
        }
    }

    fn select(&self, keep: &[bool]) -> Column {
        match self {
            Column::Scalar(values) => Column::Scalar(
                values
                    .iter()
                    .zip(keep)
                    .filter_map(|(v, k)| k.then_some(*v))
                    .collect(),
            ),
            Column::Jagged { offsets, values } => {
                let mut new_offsets = Vec::with_capacity(keep.iter().filter(|k| **k).count() + 1);
                let mut new_values = Vec::new();
                new_offsets.push(0);
                for (row, kept) in keep.iter().enumerate() {
                    if *kept {
                        new_values.extend_from_slice(&values[offsets[row]..offsets[row + 1]]);
                        new_offsets.push(new_values.len());
                    }
                }
                Column::Jagged {
                    offsets: new_offsets,
                    values: new_values,
                }
            }
        }
    }

    fn truncated(&self, n_rows: usize) -> Column {
        match self {
            Column::Scalar(values) => Column::Scalar(values[..n_rows].to_vec()),
            Column::Jagged { offsets, values } => Column::Jagged {
                offsets: offsets[..=n_rows].to_vec(),
                values: values[..offsets[n_rows]].to_vec(),
            },
        }
    }

    fn append(&mut self, other: &Column) -> Result<(), StoreError> {
        match (self, other) {
            (Column::Scalar(values), Column::Scalar(other_values)) => {
                values.extend_from_slice(other_values);
                Ok(())
            }
            (
                Column::Jagged { offsets, values },
                Column::Jagged {
                    offsets: other_offsets,
                    values: other_values,
                },
            ) => {
                let base = values.len();
                values.extend_from_slice(other_values);
                offsets.extend(other_offsets.iter().skip(1).map(|off| base + off));
                Ok(())
            }
            _ => Err(StoreError::SchemaMismatch(String::from(
                "scalar and jagged columns share a name",
            ))),
        }
    }
}

/// An immutable table of named columns over independent event rows.
///
/// Columns are kept in a BTreeMap so that iteration (and therefore anything
/// persisted from a table) has a stable order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTable {
    columns: BTreeMap<String, Column>,
    n_rows: usize,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(name, col)| (name.as_str(), col))
    }

    /// Add a column. The first column fixes the row count; later columns must
    /// agree with it.
    pub fn insert(&mut self, name: &str, column: Column) -> Result<(), StoreError> {
        if self.columns.is_empty() {
            self.n_rows = column.n_rows();
        } else if column.n_rows() != self.n_rows {
            return Err(StoreError::SchemaMismatch(format!(
                "column {:?} has {} rows, table has {}",
                name,
                column.n_rows(),
                self.n_rows
            )));
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Rows where `keep` is true, across every column.
    pub fn select(&self, keep: &[bool]) -> EventTable {
        let n_rows = keep.iter().filter(|k| **k).count();
        EventTable {
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.select(keep)))
                .collect(),
            n_rows,
        }
    }

    /// The first `n_rows` rows (all of them if the table is shorter).
    pub fn truncated(&self, n_rows: usize) -> EventTable {
        let n_rows = n_rows.min(self.n_rows);
        EventTable {
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.truncated(n_rows)))
                .collect(),
            n_rows,
        }
    }

    /// Append another table's rows. Schemas must match exactly.
    pub fn append(&mut self, other: &EventTable) -> Result<(), StoreError> {
        if self.columns.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if !self
            .columns
            .keys()
            .eq(other.columns.keys()) {
            return Err(StoreError::SchemaMismatch(String::from(
                "tables have different column sets",
            )));
        }
        for (name, column) in self.columns.iter_mut() {
            column.append(&other.columns[name])?;
        }
        self.n_rows += other.n_rows;
        Ok(())
    }

    /// In-memory footprint of all column data
    pub fn estimated_bytes(&self) -> usize {
        self.columns.values().map(Column::estimated_bytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> EventTable {
        let mut table = EventTable::new();
        table
            .insert("nhit_slab", Column::Scalar(vec![3.0, 8.0, 12.0]))
            .unwrap();
        table
            .insert(
                "hit_x",
                Column::Jagged {
                    offsets: vec![0, 2, 2, 5],
                    values: vec![1.0, 2.0, 10.0, 11.0, 12.0],
                },
            )
            .unwrap();
        table
    }

    #[test]
    fn test_select_keeps_jagged_rows_aligned() {
        let table = sample_table();
        let selected = table.select(&[true, false, true]);
        assert_eq!(selected.n_rows(), 2);
        assert_eq!(selected.column("nhit_slab").unwrap().row(0), &[3.0]);
        assert_eq!(selected.column("hit_x").unwrap().row(0), &[1.0, 2.0]);
        assert_eq!(
            selected.column("hit_x").unwrap().row(1),
            &[10.0, 11.0, 12.0]
        );
    }

    #[test]
    fn test_append_then_truncate() {
        let mut table = sample_table();
        table.append(&sample_table()).unwrap();
        assert_eq!(table.n_rows(), 6);
        assert_eq!(table.column("hit_x").unwrap().row(3), &[1.0, 2.0]);

        let head = table.truncated(4);
        assert_eq!(head.n_rows(), 4);
        assert_eq!(head.column("hit_x").unwrap().row(3), &[1.0, 2.0]);
        match head.column("hit_x").unwrap() {
            Column::Jagged { offsets, values } => {
                assert_eq!(offsets, &[0, 2, 2, 5, 7]);
                assert_eq!(values.len(), 7);
            }
            Column::Scalar(_) => panic!("hit_x must stay jagged"),
        }
    }

    #[test]
    fn test_append_rejects_mismatched_schema() {
        let mut table = sample_table();
        let mut other = EventTable::new();
        other
            .insert("nhit_slab", Column::Scalar(vec![1.0]))
            .unwrap();
        assert!(table.append(&other).is_err());
    }

    #[test]
    fn test_row_count_mismatch_rejected() {
        let mut table = sample_table();
        let short = Column::Scalar(vec![1.0]);
        assert!(table.insert("sum_energy", short).is_err());
    }
}
