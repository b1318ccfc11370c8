//! In-memory dataset assembled from the downloaded CSV extracts.
//!
//! The extracts come semicolon-delimited with a header row. `orders.csv` is
//! the order stream; every other CSV in the directory carries customer
//! action events and is unioned into one batch.

use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

const CSV_DELIMITER: u8 = b';';

/// One order row. `order_id` is the natural key enforced by a unique index
/// after the first load.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderRecord {
    pub order_id: i64,
    pub customer_id: i64,
    /// Raw timestamp string, parsed inside the store with the configured
    /// date format.
    pub first_action_at: String,
    pub total_price: f64,
    pub status: String,
}

/// One customer action row, keyed by `action_id`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EventRecord {
    pub action_id: i64,
    pub customer_id: i64,
    pub occurred_at: String,
}

/// Batches ready for loading. `None` means the corresponding stream had no
/// source file at all, as opposed to an empty file.
#[derive(Debug, Default, Clone)]
pub struct Dataset {
    pub orders: Option<Vec<OrderRecord>>,
    pub events: Option<Vec<EventRecord>>,
}

impl Dataset {
    pub fn is_empty(&self) -> bool {
        self.orders.is_none() && self.events.is_none()
    }
}

/// Builds a [`Dataset`] from every `*.csv` under a local directory.
pub struct DatasetBuilder;

impl DatasetBuilder {
    /// Unreadable files are excluded with a warning; individual rows that do
    /// not match the expected shape are skipped. Files are visited in name
    /// order so event batches are stable across runs.
    pub fn from_dir(dir: &Path) -> std::io::Result<Dataset> {
        let mut csv_paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let is_csv = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if path.is_file() && is_csv {
                csv_paths.push(path);
            }
        }
        csv_paths.sort();

        let mut dataset = Dataset::default();
        for path in csv_paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name == "orders.csv" {
                match read_rows::<OrderRecord>(&path) {
                    Ok(rows) => {
                        info!(file = %name, rows = rows.len(), "parsed order extract");
                        dataset.orders = Some(rows);
                    }
                    Err(err) => warn!(file = %name, error = %err, "skipping unreadable order extract"),
                }
            } else {
                match read_rows::<EventRecord>(&path) {
                    Ok(rows) => {
                        info!(file = %name, rows = rows.len(), "parsed event extract");
                        dataset.events.get_or_insert_with(Vec::new).extend(rows);
                    }
                    Err(err) => warn!(file = %name, error = %err, "skipping unreadable event extract"),
                }
            }
        }
        Ok(dataset)
    }
}

fn read_rows<T: serde::de::DeserializeOwned>(path: &Path) -> csv::Result<Vec<T>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(CSV_DELIMITER)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.deserialize::<T>() {
        match record {
            Ok(row) => rows.push(row),
            Err(err) => {
                skipped += 1;
                warn!(file = %path.display(), error = %err, "skipping malformed row");
            }
        }
    }
    if skipped > 0 {
        warn!(file = %path.display(), skipped, "rows skipped during parse");
    }
    Ok(rows)
}
