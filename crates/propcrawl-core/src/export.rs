use crate::{Field, PropertyRecord, Result};
use csv::Writer;
use regex::Regex;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;
use url::Url;

pub(crate) const CHARACTERISTIC_PREFIX: &str = "characteristic:";

fn non_word() -> &'static Regex {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    NON_WORD.get_or_init(|| Regex::new(r"\W+").expect("static pattern compiles"))
}

/// Derive the output file name for a source: host, last path segment and
/// query, with every run of non-word characters collapsed to `_`.
pub fn output_file_name(source_url: &Url) -> String {
    let host = source_url.host_str().unwrap_or("source");
    let last_segment = source_url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let mut raw = format!("{}_{}", host, last_segment);
    if let Some(query) = source_url.query() {
        raw.push('_');
        raw.push_str(query);
    }

    let name = non_word().replace_all(&raw, "_");
    format!("{}.csv", name.trim_matches('_'))
}

/// Writes one spreadsheet per run. Columns are the standard fields followed by
/// every extra field and characteristic label seen in the run.
#[derive(Debug, Clone)]
pub struct TabularExporter {
    output_dir: PathBuf,
}

impl TabularExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn path_for(&self, source_url: &Url) -> PathBuf {
        self.output_dir.join(output_file_name(source_url))
    }

    /// Write `records` to the file derived from `source_url`, replacing any previous run.
    pub fn export(&self, source_url: &Url, records: &[PropertyRecord]) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let path = self.path_for(source_url);

        let mut writer = Writer::from_path(&path)?;
        write_records(&mut writer, records)?;
        writer.flush()?;

        info!("Saved {} records to {}", records.len(), path.display());
        Ok(path)
    }
}

/// Header row for a set of records.
pub fn columns(records: &[PropertyRecord]) -> Vec<String> {
    let extras: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.extras.keys().map(String::as_str))
        .collect();
    let characteristics: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.characteristics.keys().map(String::as_str))
        .collect();

    let mut columns = vec!["url".to_string()];
    columns.extend(Field::ALL.iter().map(|f| f.as_str().to_string()));
    columns.extend(extras.into_iter().map(str::to_string));
    columns.extend(
        characteristics
            .into_iter()
            .map(|label| format!("{}{}", CHARACTERISTIC_PREFIX, label)),
    );
    columns
}

pub fn write_records<W: io::Write>(
    writer: &mut Writer<W>,
    records: &[PropertyRecord],
) -> Result<()> {
    let header = columns(records);
    writer.write_record(&header)?;

    for record in records {
        let row: Vec<String> = header
            .iter()
            .map(|column| cell(record, column).unwrap_or_default())
            .collect();
        writer.write_record(&row)?;
    }
    Ok(())
}

fn cell(record: &PropertyRecord, column: &str) -> Option<String> {
    if column == "url" {
        return Some(record.url.to_string());
    }
    if let Ok(field) = column.parse::<Field>() {
        return record.get(field);
    }
    if let Some(label) = column.strip_prefix(CHARACTERISTIC_PREFIX) {
        return record.characteristics.get(label).cloned();
    }
    record.extras.get(column).cloned()
}
