//! Streaming CSV access for import files.
//!
//! Files are read twice by the worker (pre-pass and main pass) and never
//! loaded whole into memory. Handles the quirks of real LinkedIn exports:
//! an optional UTF-8 BOM, `,`/`;`/tab delimiters depending on locale, and
//! duplicate header names.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CsvError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("file has no header row")]
    MissingHeader,
}

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];
const DELIMITER_CANDIDATES: [u8; 3] = [b',', b';', b'\t'];

/// Internal field names a CSV column can map onto.
pub const MAPPABLE_FIELDS: [&str; 7] = [
    "first_name",
    "last_name",
    "email",
    "company",
    "job_title",
    "linkedin_url",
    "connected_on",
];

fn open_past_bom(path: &Path) -> Result<BufReader<File>, CsvError> {
    let mut file = File::open(path)?;
    let mut bom = [0u8; 3];
    let read = file.read(&mut bom)?;
    if read != 3 || bom != UTF8_BOM {
        file.seek(SeekFrom::Start(0))?;
    }
    Ok(BufReader::new(file))
}

/// Majority vote over the first five lines; ties fall back to the comma.
fn sniff_delimiter(path: &Path) -> Result<u8, CsvError> {
    let reader = open_past_bom(path)?;
    let mut counts: HashMap<u8, usize> = HashMap::new();

    for line in reader.lines().take(5) {
        let line = line?;
        for candidate in DELIMITER_CANDIDATES {
            *counts.entry(candidate).or_insert(0) +=
                line.bytes().filter(|b| *b == candidate).count();
        }
    }

    let mut best = b',';
    let mut best_count = counts.get(&b',').copied().unwrap_or(0);
    for candidate in [b';', b'\t'] {
        let count = counts.get(&candidate).copied().unwrap_or(0);
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    Ok(best)
}

/// Disambiguate duplicate headers with `_2`, `_3`, ... suffixes.
fn disambiguate_headers(raw: &csv::StringRecord) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.iter()
        .map(|h| {
            let header = h.trim().to_string();
            let count = seen.entry(header.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                header
            } else {
                format!("{}_{}", header, count)
            }
        })
        .collect()
}

/// A CSV file opened for streaming, with delimiter and headers resolved.
pub struct CsvFile {
    path: PathBuf,
    delimiter: u8,
    headers: Vec<String>,
}

impl CsvFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CsvError> {
        let path = path.into();
        let delimiter = sniff_delimiter(&path)?;

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(open_past_bom(&path)?);

        let headers = disambiguate_headers(reader.headers()?);
        if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
            return Err(CsvError::MissingHeader);
        }

        Ok(Self {
            path,
            delimiter,
            headers,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Data rows only, header excluded. Streams the whole file.
    pub fn count_rows(&self) -> Result<usize, CsvError> {
        let mut count = 0;
        for record in self.raw_records()? {
            record?;
            count += 1;
        }
        Ok(count)
    }

    fn raw_records(
        &self,
    ) -> Result<impl Iterator<Item = Result<csv::StringRecord, csv::Error>> + Send + 'static, CsvError>
    {
        let reader = csv::ReaderBuilder::new()
            .delimiter(self.delimiter)
            .flexible(true)
            .from_reader(open_past_bom(&self.path)?);
        Ok(reader.into_records())
    }

    /// Stream data rows as `(row_number, values)`, 1-based row numbers.
    pub fn rows(&self) -> Result<RowIter, CsvError> {
        Ok(RowIter {
            inner: Box::new(self.raw_records()?),
            row_number: 0,
            width: self.headers.len(),
        })
    }

    /// First `limit` rows, for preview endpoints.
    pub fn preview(&self, limit: usize) -> Result<Vec<Vec<String>>, CsvError> {
        let mut out = Vec::new();
        for row in self.rows()?.take(limit) {
            out.push(row?.values);
        }
        Ok(out)
    }
}

/// One data row: 1-based position and values padded to header width.
#[derive(Debug, Clone)]
pub struct CsvRow {
    pub row_number: usize,
    pub values: Vec<String>,
}

pub struct RowIter {
    inner: Box<dyn Iterator<Item = Result<csv::StringRecord, csv::Error>> + Send>,
    row_number: usize,
    width: usize,
}

impl Iterator for RowIter {
    type Item = Result<CsvRow, CsvError>;

    fn next(&mut self) -> Option<Self::Item> {
        let record = match self.inner.next()? {
            Ok(record) => record,
            Err(e) => return Some(Err(e.into())),
        };
        self.row_number += 1;

        let mut values: Vec<String> = record.iter().map(|v| v.trim().to_string()).collect();
        values.resize(self.width, String::new());

        Some(Ok(CsvRow {
            row_number: self.row_number,
            values,
        }))
    }
}

/// Resolved column indices for one job's column mapping.
#[derive(Debug, Default, Clone)]
pub struct MappedColumns {
    pub first_name: Option<usize>,
    pub last_name: Option<usize>,
    pub email: Option<usize>,
    pub company: Option<usize>,
    pub job_title: Option<usize>,
    pub linkedin_url: Option<usize>,
    pub connected_on: Option<usize>,
}

impl MappedColumns {
    /// Resolve a header→field mapping into positional indices.
    pub fn resolve(headers: &[String], mapping: &HashMap<String, String>) -> Self {
        let mut columns = Self::default();
        for (header, field) in mapping {
            let Some(index) = headers.iter().position(|h| h == header) else {
                continue;
            };
            match field.as_str() {
                "first_name" => columns.first_name = Some(index),
                "last_name" => columns.last_name = Some(index),
                "email" => columns.email = Some(index),
                "company" => columns.company = Some(index),
                "job_title" => columns.job_title = Some(index),
                "linkedin_url" => columns.linkedin_url = Some(index),
                "connected_on" => columns.connected_on = Some(index),
                _ => {}
            }
        }
        columns
    }

    pub fn get<'a>(&self, row: &'a CsvRow, index: Option<usize>) -> Option<&'a str> {
        index
            .and_then(|i| row.values.get(i))
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

/// Guess the header→field mapping from LinkedIn's known header names.
pub fn suggest_mapping(headers: &[String]) -> HashMap<String, String> {
    let mut mapping = HashMap::new();
    for header in headers {
        let folded = header.trim().to_lowercase();
        let field = match folded.as_str() {
            "first name" | "nombre" => Some("first_name"),
            "last name" | "apellido" | "apellidos" => Some("last_name"),
            "email address" | "email" | "correo electrónico" => Some("email"),
            "company" | "empresa" => Some("company"),
            "position" | "title" | "cargo" | "puesto" => Some("job_title"),
            "url" | "profile url" | "linkedin url" => Some("linkedin_url"),
            "connected on" | "conectado el" => Some("connected_on"),
            _ => None,
        };
        if let Some(field) = field {
            // First matching header wins; `_2` duplicates stay unmapped.
            if !mapping.values().any(|v| v == field) {
                mapping.insert(header.clone(), field.to_string());
            }
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(content).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn sniffs_semicolon_delimiter() {
        let file = write_temp(b"First Name;Last Name;Email\nJane;Doe;jane@acme.com\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.delimiter(), b';');
        assert_eq!(csv.headers(), ["First Name", "Last Name", "Email"]);
    }

    #[test]
    fn sniffs_tab_delimiter() {
        let file = write_temp(b"A\tB\tC\n1\t2\t3\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.delimiter(), b'\t');
    }

    #[test]
    fn strips_utf8_bom() {
        let file = write_temp(b"\xEF\xBB\xBFFirst Name,Email\nJane,jane@acme.com\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.headers()[0], "First Name");
    }

    #[test]
    fn disambiguates_duplicate_headers() {
        let file = write_temp(b"Email,Email,Name\na@x.com,b@x.com,Jane\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.headers(), ["Email", "Email_2", "Name"]);
    }

    #[test]
    fn counts_rows_excluding_header() {
        let file = write_temp(b"Name\nJane\nJohn\nMia\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.count_rows().unwrap(), 3);
    }

    #[test]
    fn header_only_file_counts_zero() {
        let file = write_temp(b"Name,Email\n");
        let csv = CsvFile::open(file.path()).unwrap();
        assert_eq!(csv.count_rows().unwrap(), 0);
    }

    #[test]
    fn rows_pad_short_records() {
        let file = write_temp(b"A,B,C\n1,2\n");
        let csv = CsvFile::open(file.path()).unwrap();
        let rows: Vec<_> = csv.rows().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(rows[0].values, vec!["1", "2", ""]);
        assert_eq!(rows[0].row_number, 1);
    }

    #[test]
    fn suggested_mapping_covers_linkedin_headers() {
        let headers: Vec<String> = ["First Name", "Last Name", "Email Address", "Company", "Position", "Connected On", "URL"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mapping = suggest_mapping(&headers);
        assert_eq!(mapping.get("First Name").unwrap(), "first_name");
        assert_eq!(mapping.get("Position").unwrap(), "job_title");
        assert_eq!(mapping.get("URL").unwrap(), "linkedin_url");
        assert_eq!(mapping.get("Connected On").unwrap(), "connected_on");
        assert_eq!(mapping.len(), 7);
    }

    #[test]
    fn mapped_columns_resolve_indices() {
        let headers: Vec<String> = ["Email", "Company"].iter().map(|s| s.to_string()).collect();
        let mut mapping = HashMap::new();
        mapping.insert("Email".to_string(), "email".to_string());
        mapping.insert("Company".to_string(), "company".to_string());
        mapping.insert("Missing".to_string(), "job_title".to_string());
        let columns = MappedColumns::resolve(&headers, &mapping);
        assert_eq!(columns.email, Some(0));
        assert_eq!(columns.company, Some(1));
        assert_eq!(columns.job_title, None);
    }
}
