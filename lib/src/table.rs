use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use indexmap::{IndexMap, IndexSet};
use log::info;

use crate::{
    error::{CellExpError, Result},
    metrics::{FieldValue, MetricsRow, DEFAULT_COLUMNS},
};

/// File name used for the metrics table when none is given
pub const DEFAULT_TABLE_FILENAME: &str = "label_metrics.csv";

/// One row of the table, keyed by column name
pub type MetricsRecord = IndexMap<String, FieldValue>;

#[derive(Clone, Copy, Debug)]
enum ColumnType {
    Text,
    Integer,
    Float,
}

struct KnownColumnDescription {
    name: &'static str,
    column_type: ColumnType,
}

// Anything not listed here is a measurement
const KNOWN_HEADERS: &[KnownColumnDescription] = &[
    KnownColumnDescription {
        name: "image",
        column_type: ColumnType::Text,
    },
    KnownColumnDescription {
        name: "label_type",
        column_type: ColumnType::Text,
    },
    KnownColumnDescription {
        name: "label_id",
        column_type: ColumnType::Integer,
    },
    KnownColumnDescription {
        name: "nuclei_channel",
        column_type: ColumnType::Integer,
    },
    KnownColumnDescription {
        name: "nuclei_channel_label",
        column_type: ColumnType::Text,
    },
];

fn column_type(name: &str) -> ColumnType {
    KNOWN_HEADERS
        .iter()
        .find(|known| known.name == name)
        .map(|known| known.column_type)
        .unwrap_or(ColumnType::Float)
}

/// Accumulates metrics rows from every processed image and writes them as a single table.
///
/// The header starts with [`DEFAULT_COLUMNS`]; any other column seen in an accumulated row is
/// appended once, in the order first encountered.
#[derive(Debug, Clone)]
pub struct MetricsTable {
    header: IndexSet<String>,
    rows: Vec<MetricsRecord>,
}

impl Default for MetricsTable {
    fn default() -> Self {
        MetricsTable::new()
    }
}

impl MetricsTable {
    /// Create an empty table with the default header
    pub fn new() -> Self {
        MetricsTable {
            header: DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append rows, extending the header with any previously unseen columns
    pub fn accumulate<I: IntoIterator<Item = MetricsRow>>(&mut self, rows: I) {
        for row in rows {
            self.push_record(row.fields().into_iter().collect());
        }
    }

    /// Append an already flattened record
    pub fn push_record(&mut self, record: MetricsRecord) {
        for column in record.keys() {
            if !self.header.contains(column) {
                self.header.insert(column.clone());
            }
        }

        self.rows.push(record);
    }

    /// Returns the resolved header, in output order
    pub fn header(&self) -> impl Iterator<Item = &str> + '_ {
        self.header.iter().map(String::as_str)
    }

    /// Returns the accumulated rows, in accumulation order
    pub fn rows(&self) -> &[MetricsRecord] {
        &self.rows
    }

    /// Returns the number of accumulated rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if no rows have been accumulated
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the table to `output_directory/filename`, creating the directory if necessary.
    ///
    /// Nothing is written when the table is empty, in which case `None` is returned. Fields
    /// missing from a row are left blank.
    pub fn write<P: AsRef<Path>>(
        &self,
        output_directory: P,
        filename: &str,
    ) -> Result<Option<PathBuf>> {
        if self.rows.is_empty() {
            return Ok(None);
        }

        let output_directory = output_directory.as_ref();
        std::fs::create_dir_all(output_directory)?;
        let path = output_directory.join(filename);

        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&self.header)?;

        for row in &self.rows {
            writer.write_record(self.header.iter().map(|column| {
                row.get(column)
                    .map(|value| value.to_string())
                    .unwrap_or_default()
            }))?;
        }
        writer.flush()?;

        info!("Wrote {} rows to {:?}", self.rows.len(), path);

        Ok(Some(path))
    }

    /// Read a table previously written by [`MetricsTable::write`]
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        MetricsTable::read(reader)
    }

    /// Parse a metrics table. Identifier columns are read as text or integers, every other
    /// column as a floating point measurement. Blank fields are omitted from the record.
    pub fn read<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);

        let headers: Vec<(String, ColumnType)> = rdr
            .headers()?
            .iter()
            .map(|name| (name.to_string(), column_type(name)))
            .collect();

        let mut table = MetricsTable {
            header: headers.iter().map(|(name, _)| name.clone()).collect(),
            rows: Vec::new(),
        };

        for result in rdr.records() {
            let record = result?;
            let mut row = MetricsRecord::with_capacity(headers.len());

            for (entry, (name, column_type)) in record.iter().zip(headers.iter()) {
                if entry.is_empty() {
                    continue;
                }

                let value = match column_type {
                    ColumnType::Text => FieldValue::Text(entry.to_string()),
                    ColumnType::Integer => {
                        FieldValue::Integer(entry.parse::<i64>().map_err(|error| {
                            invalid_field(name, entry, &error.to_string())
                        })?)
                    }
                    ColumnType::Float => {
                        FieldValue::Float(entry.parse::<f64>().map_err(|error| {
                            invalid_field(name, entry, &error.to_string())
                        })?)
                    }
                };

                row.insert(name.clone(), value);
            }

            table.rows.push(row);
        }

        Ok(table)
    }
}

fn invalid_field(column: &str, entry: &str, reason: &str) -> CellExpError {
    CellExpError::validation(format!(
        "failed to parse '{}' in column '{}': {}",
        entry, column, reason
    ))
}
