//! Record Source: lazily yields tenant records from a CSV table.
//!
//! Header problems are fatal (`SourceError`). Problems with a single row are
//! yielded as `Err(RowError)` and iteration continues with the next row.

use std::collections::{BTreeMap, HashSet};
use std::io::{Cursor, Read};
use std::path::Path;

use crate::config::SourceConfig;
use crate::errors::{RowError, SourceError};
use crate::models::TenantRecord;

/// Values treated as "no value" in numeric columns.
const EMPTY_MARKERS: &[&str] = &["", "n/a", "na", "-", "null", "none"];

/// Where the input table lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    File(String),
    Object { bucket: String, key: String },
}

impl InputLocation {
    pub fn parse(input: &str) -> Self {
        if let Some(rest) = input.strip_prefix("s3://") {
            if let Some((bucket, key)) = rest.split_once('/') {
                if !bucket.is_empty() && !key.is_empty() {
                    return InputLocation::Object {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    };
                }
            }
        }
        InputLocation::File(input.to_string())
    }
}

pub struct CsvRecordSource<R> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    id_index: usize,
    id_column: String,
    numeric: Vec<bool>,
    seen: HashSet<String>,
    row: usize,
    exhausted: bool,
}

impl CsvRecordSource<Cursor<Vec<u8>>> {
    /// Reads the whole file up front so iteration never blocks a runtime thread.
    pub async fn load(path: &Path, config: &SourceConfig) -> Result<Self, SourceError> {
        let body = tokio::fs::read(path).await.map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_reader(Cursor::new(body), config)
    }
}

impl<R: Read> CsvRecordSource<R> {
    pub fn from_reader(input: R, config: &SourceConfig) -> Result<Self, SourceError> {
        Self::new(reader_builder().from_reader(input), config)
    }

    fn new(mut reader: csv::Reader<R>, config: &SourceConfig) -> Result<Self, SourceError> {
        let headers: Vec<String> = reader
            .headers()
            .map_err(SourceError::Header)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let id_index = headers
            .iter()
            .position(|h| h.eq_ignore_ascii_case(&config.id_column))
            .ok_or_else(|| SourceError::MissingIdColumn(config.id_column.clone()))?;

        let numeric = headers
            .iter()
            .map(|h| {
                config
                    .numeric_columns
                    .iter()
                    .any(|c| c.eq_ignore_ascii_case(h))
            })
            .collect();

        Ok(Self {
            reader,
            headers,
            id_index,
            id_column: config.id_column.clone(),
            numeric,
            seen: HashSet::new(),
            row: 0,
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn parse_row(&mut self, raw: &csv::StringRecord) -> Result<TenantRecord, RowError> {
        let row = self.row;
        let tenant_id = raw.get(self.id_index).unwrap_or("").trim().to_string();
        if tenant_id.is_empty() {
            return Err(RowError::MissingIdentifier {
                row,
                column: self.id_column.clone(),
            });
        }

        let mut fields = BTreeMap::new();
        let mut metrics = BTreeMap::new();
        for (index, header) in self.headers.iter().enumerate() {
            if index == self.id_index {
                continue;
            }
            // Short rows read as empty trailing fields.
            let value = raw.get(index).unwrap_or("").trim();
            if self.numeric[index] {
                if let Some(number) = parse_number(value).map_err(|_| RowError::InvalidNumber {
                    row,
                    tenant_id: tenant_id.clone(),
                    field: header.clone(),
                    value: value.to_string(),
                })? {
                    metrics.insert(header.clone(), number);
                }
            }
            fields.insert(header.clone(), value.to_string());
        }

        if !self.seen.insert(tenant_id.clone()) {
            return Err(RowError::DuplicateId { row, tenant_id });
        }

        Ok(TenantRecord::new(tenant_id, row, fields, metrics))
    }
}

impl<R: Read> Iterator for CsvRecordSource<R> {
    type Item = Result<TenantRecord, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut raw = csv::StringRecord::new();
        match self.reader.read_record(&mut raw) {
            Ok(false) => {
                self.exhausted = true;
                None
            }
            Ok(true) => {
                self.row += 1;
                Some(self.parse_row(&raw))
            }
            Err(err) => {
                self.row += 1;
                // An I/O failure will not recover; report it once and stop.
                if err.is_io_error() {
                    self.exhausted = true;
                }
                Some(Err(RowError::Malformed {
                    row: self.row,
                    message: err.to_string(),
                }))
            }
        }
    }
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true).flexible(true);
    builder
}

/// Parses a human-formatted number ("1,200", "$35.5"). `Ok(None)` means no value.
fn parse_number(value: &str) -> Result<Option<f64>, ()> {
    if EMPTY_MARKERS.contains(&value.to_ascii_lowercase().as_str()) {
        return Ok(None);
    }
    let cleaned: String = value
        .chars()
        .filter(|c| !matches!(c, ',' | '$' | '_' | ' '))
        .collect();
    match cleaned.parse::<f64>() {
        Ok(n) if n.is_finite() => Ok(Some(n)),
        _ => Err(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(id_column: &str) -> SourceConfig {
        SourceConfig {
            input: String::new(),
            id_column: id_column.to_string(),
            numeric_columns: vec!["employees".to_string(), "seats".to_string()],
        }
    }

    fn collect(csv: &str, id_column: &str) -> Vec<Result<TenantRecord, RowError>> {
        CsvRecordSource::from_reader(csv.as_bytes(), &config(id_column))
            .unwrap()
            .collect()
    }

    #[test]
    fn test_reads_records_with_opaque_columns() {
        let rows = collect(
            "tenant_id,name,industry,employees,notes\n\
             t1,Acme,Manufacturing,\"1,200\",likes fiber\n\
             t2,Globex,,N/A,\n",
            "tenant_id",
        );
        assert_eq!(rows.len(), 2);
        let acme = rows[0].as_ref().unwrap();
        assert_eq!(acme.tenant_id(), "t1");
        assert_eq!(acme.row(), 1);
        assert_eq!(acme.name(), Some("Acme"));
        assert_eq!(acme.field("notes"), "likes fiber");
        assert_eq!(acme.metrics().get("employees"), Some(&1200.0));

        let globex = rows[1].as_ref().unwrap();
        assert_eq!(globex.industry(), None);
        assert!(globex.metrics().is_empty());
    }

    #[test]
    fn test_bad_row_does_not_stop_iteration() {
        let rows = collect(
            "id,name,seats\n\
             t1,Acme,10\n\
             t2,Globex,lots\n\
             ,BadRow,3\n\
             t4,Initech,4\n",
            "id",
        );
        assert_eq!(rows.len(), 4);
        assert!(rows[0].is_ok());
        assert!(matches!(
            rows[1],
            Err(RowError::InvalidNumber { row: 2, ref field, .. }) if field == "seats"
        ));
        assert!(matches!(rows[2], Err(RowError::MissingIdentifier { row: 3, .. })));
        assert_eq!(rows[3].as_ref().unwrap().tenant_id(), "t4");
    }

    #[test]
    fn test_duplicate_ids_are_reported() {
        let rows = collect("id,name\nt1,Acme\nt1,Acme again\n", "id");
        assert!(rows[0].is_ok());
        assert!(matches!(
            rows[1],
            Err(RowError::DuplicateId { row: 2, ref tenant_id }) if tenant_id == "t1"
        ));
    }

    #[test]
    fn test_short_rows_default_to_empty() {
        let rows = collect("id,name,industry\nt1,Acme\n", "id");
        let record = rows[0].as_ref().unwrap();
        assert_eq!(record.field("industry"), "");
    }

    #[test]
    fn test_header_without_id_column_is_fatal() {
        let result = CsvRecordSource::from_reader("name,industry\nAcme,x\n".as_bytes(), &config("id"));
        assert!(matches!(result, Err(SourceError::MissingIdColumn(ref c)) if c == "id"));
    }

    #[test]
    fn test_header_match_is_case_insensitive() {
        let rows = collect("Tenant_ID,Name\nt9,Acme\n", "tenant_id");
        assert_eq!(rows[0].as_ref().unwrap().tenant_id(), "t9");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_fatal() {
        let result = CsvRecordSource::load(Path::new("/definitely/not/here.csv"), &config("id")).await;
        assert!(matches!(result, Err(SourceError::Open { .. })));
    }

    #[tokio::test]
    async fn test_load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "id,name").unwrap();
        writeln!(file, "t1,Acme").unwrap();
        file.flush().unwrap();
        let records: Vec<_> = CsvRecordSource::load(file.path(), &config("id"))
            .await
            .unwrap()
            .collect();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_parse_number_formats() {
        assert_eq!(parse_number("$35.50"), Ok(Some(35.5)));
        assert_eq!(parse_number("n/a"), Ok(None));
        assert_eq!(parse_number(""), Ok(None));
        assert!(parse_number("ten").is_err());
        assert!(parse_number("inf").is_err());
    }

    #[test]
    fn test_input_location() {
        assert_eq!(
            InputLocation::parse("s3://bucket/in/tenants.csv"),
            InputLocation::Object {
                bucket: "bucket".to_string(),
                key: "in/tenants.csv".to_string()
            }
        );
        assert_eq!(
            InputLocation::parse("./tenants.csv"),
            InputLocation::File("./tenants.csv".to_string())
        );
        assert_eq!(
            InputLocation::parse("s3://bucket"),
            InputLocation::File("s3://bucket".to_string())
        );
    }
}
