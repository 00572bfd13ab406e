//! Reference dataset: loading it for comparison, and building it from the
//! raw sensor export.

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::AirsenseConfig;
use crate::error::{MonitoringError, StorageError};
use crate::models::{FEATURE_COLUMNS, FEATURE_COUNT};

/// Raw export header -> canonical column name. Headers are matched after
/// every non-ASCII character is replaced with `?`.
const COLUMN_RENAMES: [(&str, &str); 11] = [
    ("Temperature (?C)", "temperature"),
    ("Humidity (%)", "humidity"),
    ("CO2 (ppm)", "co2"),
    ("PM2.5 (?g/m?)", "pm25"),
    ("PM10 (?g/m?)", "pm10"),
    ("TVOC (ppb)", "tvoc"),
    ("CO (ppm)", "co"),
    ("Light Intensity (lux)", "light"),
    ("Motion Detected", "motion"),
    ("Occupancy Count", "occupancy"),
    ("Ventilation Status", "ventilation"),
];

/// Baseline feature rows with optional labels.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReferenceData {
    pub features: Vec<[f64; FEATURE_COUNT]>,
    pub target: Option<Vec<i64>>,
    pub prediction: Option<Vec<i64>>,
}

impl ReferenceData {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// `(target, prediction)` pairs when both label columns are present.
    pub fn labelled_pairs(&self) -> Option<Vec<(i64, i64)>> {
        let target = self.target.as_ref()?;
        let prediction = self.prediction.as_ref()?;
        Some(target.iter().copied().zip(prediction.iter().copied()).collect())
    }
}

fn parse_number(path: &Path, column: &str, raw: &str) -> Result<f64, StorageError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| StorageError::InvalidValue {
            path: path.to_path_buf(),
            column: column.to_string(),
            value: raw.to_string(),
        })
}

fn parse_label(path: &Path, column: &str, raw: &str) -> Result<i64, StorageError> {
    // Labels may be written as "1" or "1.0".
    let value = parse_number(path, column, raw)?;
    Ok(value.round() as i64)
}

/// Load the reference CSV, keeping only the feature and label columns.
pub fn load_reference(path: &Path) -> Result<ReferenceData, MonitoringError> {
    if !path.exists() {
        return Err(MonitoringError::MissingInput {
            path: path.to_path_buf(),
        });
    }

    let mut reader = csv::Reader::from_path(path).map_err(|e| StorageError::csv(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| StorageError::csv(path, e))?
        .clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let feature_idx = FEATURE_COLUMNS
        .iter()
        .map(|name| {
            position(name).ok_or_else(|| StorageError::MissingColumn {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let target_idx = position("target");
    let prediction_idx = position("prediction");

    let mut data = ReferenceData {
        target: target_idx.map(|_| Vec::new()),
        prediction: prediction_idx.map(|_| Vec::new()),
        ..ReferenceData::default()
    };

    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.map_err(|e| StorageError::csv(path, e))?;
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let parsed = (|| -> Result<_, StorageError> {
            let mut row = [0.0; FEATURE_COUNT];
            for (slot, (&idx, name)) in row.iter_mut().zip(feature_idx.iter().zip(FEATURE_COLUMNS)) {
                *slot = parse_number(path, name, field(idx))?;
            }
            let target = target_idx
                .map(|idx| parse_label(path, "target", field(idx)))
                .transpose()?;
            let prediction = prediction_idx
                .map(|idx| parse_label(path, "prediction", field(idx)))
                .transpose()?;
            Ok((row, target, prediction))
        })();

        let (row, target, prediction) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping incomplete reference row");
                skipped += 1;
                continue;
            }
        };
        data.features.push(row);
        if let (Some(value), Some(column)) = (target, data.target.as_mut()) {
            column.push(value);
        }
        if let (Some(value), Some(column)) = (prediction, data.prediction.as_mut()) {
            column.push(value);
        }
    }

    if skipped > 0 {
        tracing::warn!(
            path = %path.display(),
            skipped,
            kept = data.len(),
            "Reference rows with missing or non-numeric values were skipped"
        );
    }
    tracing::debug!(path = %path.display(), rows = data.len(), "Reference data loaded");
    Ok(data)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// The reference file was kept because `force` was not set.
    AlreadyExists { path: PathBuf },
    Created { path: PathBuf, rows: usize },
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}

fn rename_column(raw: &str) -> String {
    let normalized = normalize_header(raw);
    COLUMN_RENAMES
        .iter()
        .find(|(from, _)| *from == normalized)
        .map(|(_, to)| to.to_string())
        .unwrap_or_else(|| raw.trim().to_string())
}

/// Build the reference dataset from the full sensor export.
///
/// Columns are renamed to canonical names, a `target` column is derived
/// from occupancy (0 when occupied, 1 otherwise), and a seeded sample of
/// rows is written without replacement.
pub fn prepare_reference_data(
    config: &AirsenseConfig,
    force: bool,
) -> Result<PrepareOutcome, MonitoringError> {
    let source = &config.paths.full_dataset_path;
    let target_path = &config.paths.reference_data_path;

    if target_path.exists() && !force {
        tracing::warn!(
            path = %target_path.display(),
            "Reference data already exists, pass --force to rebuild it"
        );
        return Ok(PrepareOutcome::AlreadyExists {
            path: target_path.clone(),
        });
    }
    if !source.exists() {
        return Err(MonitoringError::MissingInput {
            path: source.clone(),
        });
    }

    let mut reader = csv::Reader::from_path(source).map_err(|e| StorageError::csv(source, e))?;
    let raw_headers = reader
        .byte_headers()
        .map_err(|e| StorageError::csv(source, e))?
        .clone();
    let mut headers: Vec<String> = raw_headers
        .iter()
        .map(|h| rename_column(&String::from_utf8_lossy(h)))
        .collect();

    let occupancy_idx = headers
        .iter()
        .position(|h| h == "occupancy")
        .ok_or_else(|| StorageError::MissingColumn {
            path: source.clone(),
            column: "occupancy".to_string(),
        })?;

    let mut rows = Vec::new();
    let mut skipped = 0usize;
    for record in reader.byte_records() {
        let mut record = record.map_err(|e| StorageError::csv(source, e))?;
        let occupancy = String::from_utf8_lossy(record.get(occupancy_idx).unwrap_or_default())
            .into_owned();
        let occupancy = match parse_number(source, "occupancy", &occupancy) {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Skipping source row without occupancy");
                skipped += 1;
                continue;
            }
        };
        let target = if occupancy > 0.0 { "0" } else { "1" };
        record.push_field(target.as_bytes());
        rows.push(record);
    }
    if skipped > 0 {
        tracing::warn!(
            path = %source.display(),
            skipped,
            "Source rows without a usable occupancy were skipped"
        );
    }
    headers.push("target".to_string());

    let sample_size = config.monitoring.reference_sample_size.min(rows.len());
    let mut rng = StdRng::seed_from_u64(config.monitoring.sample_seed);
    let picked = rand::seq::index::sample(&mut rng, rows.len(), sample_size);

    if let Some(parent) = target_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let mut writer =
        csv::Writer::from_path(target_path).map_err(|e| StorageError::csv(target_path, e))?;
    writer
        .write_record(&headers)
        .map_err(|e| StorageError::csv(target_path, e))?;
    for idx in picked.iter() {
        writer
            .write_byte_record(&rows[idx])
            .map_err(|e| StorageError::csv(target_path, e))?;
    }
    writer
        .flush()
        .map_err(|e| StorageError::io(target_path, e))?;

    tracing::info!(
        path = %target_path.display(),
        rows = sample_size,
        source_rows = rows.len(),
        "Reference data created"
    );
    Ok(PrepareOutcome::Created {
        path: target_path.clone(),
        rows: sample_size,
    })
}
