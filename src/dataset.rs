//! Tabular dataset source.
//!
//! Loads a CSV file into typed columns. A column is numeric when every
//! non-empty cell parses as a number, otherwise it is a string column.
//! `NaN` and infinite cells are treated like empty ones.
//! Column types are fixed at load time so the feature contract sees a
//! stable type per column.

use crate::error::{PipelineError, Result};
use crate::schema::ColumnType;
use crate::types::FieldValue;
use csv::{ReaderBuilder, StringRecord};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Column metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
}

/// In-memory table with typed columns
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Option<FieldValue>>>,
}

/// Borrowed view of one row
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    dataset: &'a Dataset,
    values: &'a [Option<FieldValue>],
}

impl<'a> RowRef<'a> {
    /// Cell value by column name; `None` for unknown columns and empty cells
    pub fn get(&self, name: &str) -> Option<&'a FieldValue> {
        let idx = *self.dataset.index.get(name)?;
        self.values.get(idx).and_then(|v| v.as_ref())
    }
}

impl Dataset {
    /// Build a dataset from already-typed columns and rows
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Option<FieldValue>>>) -> Result<Self> {
        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(PipelineError::InvalidTrainingData(format!(
                "row {} has {} cells, expected {}",
                bad,
                rows[bad].len(),
                columns.len()
            )));
        }
        let index = Self::build_index(&columns);
        Ok(Self {
            columns,
            index,
            rows,
        })
    }

    /// Load a CSV file with a header row
    pub fn from_csv_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Reading dataset");
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Load CSV data from any reader
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let raw: Vec<StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;

        let dtypes: Vec<ColumnType> = (0..headers.len())
            .map(|col| infer_column_type(raw.iter().map(|r| r.get(col).unwrap_or(""))))
            .collect();

        let rows = raw
            .iter()
            .map(|record| {
                dtypes
                    .iter()
                    .enumerate()
                    .map(|(col, dtype)| parse_cell(record.get(col).unwrap_or(""), *dtype))
                    .collect()
            })
            .collect();

        let columns: Vec<Column> = headers
            .into_iter()
            .zip(dtypes)
            .map(|(name, dtype)| Column { name, dtype })
            .collect();

        debug!(
            columns = columns.len(),
            rows = raw.len(),
            "Dataset parsed"
        );

        Self::new(columns, rows)
    }

    fn build_index(columns: &[Column]) -> HashMap<String, usize> {
        columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// `(name, type)` pairs in dataset order
    pub fn column_types(&self) -> Vec<(String, ColumnType)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.dtype))
            .collect()
    }

    pub fn row(&self, idx: usize) -> Option<RowRef<'_>> {
        self.rows.get(idx).map(|values| RowRef {
            dataset: self,
            values,
        })
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |values| RowRef {
            dataset: self,
            values,
        })
    }

    /// Lowercase every column name
    pub fn lowercase_columns(mut self) -> Self {
        for column in &mut self.columns {
            column.name = column.name.to_lowercase();
        }
        self.index = Self::build_index(&self.columns);
        self
    }

    /// Rename columns; names not present are ignored
    pub fn rename_columns(mut self, renames: &HashMap<String, String>) -> Self {
        for column in &mut self.columns {
            if let Some(new_name) = renames.get(&column.name) {
                column.name = new_name.clone();
            }
        }
        self.index = Self::build_index(&self.columns);
        self
    }

    /// Drop columns by name; names not present are ignored
    pub fn drop_columns(mut self, names: &[String]) -> Self {
        let keep: Vec<bool> = self
            .columns
            .iter()
            .map(|c| !names.contains(&c.name))
            .collect();
        self.columns = self
            .columns
            .into_iter()
            .zip(&keep)
            .filter_map(|(c, k)| k.then_some(c))
            .collect();
        for row in &mut self.rows {
            let mut flags = keep.iter();
            row.retain(|_| *flags.next().unwrap_or(&true));
        }
        self.index = Self::build_index(&self.columns);
        self
    }

    /// Binary labels from a 0/1 or true/false column
    pub fn labels(&self, label_column: &str) -> Result<Vec<u8>> {
        let idx = *self.index.get(label_column).ok_or_else(|| {
            PipelineError::Schema(format!("label column '{}' not found", label_column))
        })?;

        self.rows
            .iter()
            .enumerate()
            .map(|(row_idx, row)| {
                parse_label(row[idx].as_ref()).ok_or_else(|| {
                    PipelineError::Schema(format!(
                        "label column '{}' has a non-binary value at row {}",
                        label_column, row_idx
                    ))
                })
            })
            .collect()
    }

    /// Shuffled train/test split, reproducible for a given seed.
    ///
    /// The test side receives `ceil(len * test_size)` rows.
    pub fn split(&self, test_size: f64, seed: u64) -> Result<(Dataset, Dataset)> {
        if !(0.0..1.0).contains(&test_size) {
            return Err(PipelineError::InvalidTrainingData(format!(
                "test_size must be in [0, 1), got {}",
                test_size
            )));
        }

        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let n_test = (self.rows.len() as f64 * test_size).ceil() as usize;
        let (test_idx, train_idx) = order.split_at(n_test);

        Ok((self.select_rows(train_idx), self.select_rows(test_idx)))
    }

    fn select_rows(&self, indices: &[usize]) -> Dataset {
        Dataset {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

fn infer_column_type<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnType {
    let mut saw_value = false;
    for cell in cells.filter(|c| !is_missing(c)) {
        saw_value = true;
        if cell.parse::<f64>().is_err() {
            return ColumnType::String;
        }
    }
    if saw_value {
        ColumnType::Numeric
    } else {
        ColumnType::String
    }
}

/// Empty cells and non-finite numbers (`NaN`, `inf`, overflow) carry no value
fn is_missing(cell: &str) -> bool {
    cell.is_empty() || cell.parse::<f64>().is_ok_and(|n| !n.is_finite())
}

fn parse_cell(cell: &str, dtype: ColumnType) -> Option<FieldValue> {
    if is_missing(cell) {
        return None;
    }
    match dtype {
        ColumnType::Numeric => cell.parse::<f64>().ok().map(FieldValue::Number),
        ColumnType::String => Some(FieldValue::Text(cell.to_string())),
    }
}

fn parse_label(value: Option<&FieldValue>) -> Option<u8> {
    match value? {
        FieldValue::Number(n) if *n == 0.0 => Some(0),
        FieldValue::Number(n) if *n == 1.0 => Some(1),
        FieldValue::Number(_) => None,
        FieldValue::Text(s) => match s.to_ascii_lowercase().as_str() {
            "0" | "false" => Some(0),
            "1" | "true" => Some(1),
            _ => None,
        },
    }
}
