//! Source readers: decode raw input files into header-keyed row sets
//!
//! Every reader yields a `RawTable`: normalized header names plus rows that
//! map those names to untyped cell values. Typing happens later, in
//! `normalize`.

use calamine::{open_workbook_auto, Data, Range, Reader};
use encoding_rs::WINDOWS_1252;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error("file not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("{0}")]
    Format(String),
}

/// A single untyped cell.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Empty,
    Text(String),
    Number(f64),
}

impl RawValue {
    /// Text cells are trimmed; blank text collapses to `Empty`.
    pub fn text(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            RawValue::Empty
        } else {
            RawValue::Text(trimmed.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RawValue::Empty)
    }
}

/// One data row. `index` is the zero-based data-row position in the
/// source file, stable across sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    pub index: usize,
    pub fields: BTreeMap<String, RawValue>,
}

impl RawRow {
    pub fn get(&self, header: &str) -> Option<&RawValue> {
        self.fields.get(&normalize_header(header))
    }
}

#[derive(Debug, Clone, Default)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
    /// Data rows seen in the file, before any sampling.
    pub rows_in_source: usize,
}

impl RawTable {
    pub fn has_column(&self, header: &str) -> bool {
        let wanted = normalize_header(header);
        self.headers.iter().any(|h| *h == wanted)
    }
}

/// Canonical header form: BOM stripped, trimmed, inner whitespace
/// collapsed, lowercased.
pub fn normalize_header(raw: &str) -> String {
    raw.trim_start_matches('\u{feff}')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

// =============================================================================
// DELIMITED READER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub cap: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
pub struct DelimitedOptions {
    pub delimiter: u8,
    pub sample: Option<SampleSpec>,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            sample: None,
        }
    }
}

pub fn read_delimited_path(path: &Path, opts: &DelimitedOptions) -> Result<RawTable, ReadError> {
    if !path.exists() {
        return Err(ReadError::Missing(path.to_path_buf()));
    }
    let file = File::open(path)
        .map_err(|e| ReadError::Format(format!("cannot open {}: {}", path.display(), e)))?;
    read_delimited(file, opts)
}

/// Read a delimited extract. When `opts.sample` is set and the source holds
/// more rows than the cap, a uniform sample without replacement is kept
/// (reservoir sampling, seeded) and returned in source order.
pub fn read_delimited<R: Read>(input: R, opts: &DelimitedOptions) -> Result<RawTable, ReadError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers: Vec<String> = reader
        .byte_headers()
        .map_err(|e| ReadError::Format(format!("failed to read header row: {}", e)))?
        .iter()
        .map(|h| normalize_header(&decode_cell(h)))
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ReadError::Format("header row is empty".to_string()));
    }

    let mut sink = RowSink::new(opts.sample);
    let mut record = csv::ByteRecord::new();
    let mut index = 0usize;

    loop {
        match reader.read_byte_record(&mut record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                return Err(ReadError::Format(format!(
                    "read failed after {} data rows: {}",
                    index, e
                )));
            }
            Err(e) => {
                // Not counted: the record never became a row.
                tracing::warn!(row = index, error = %e, "skipping unreadable record");
                continue;
            }
        }

        let mut fields = BTreeMap::new();
        for (header, cell) in headers.iter().zip(record.iter()) {
            if header.is_empty() || fields.contains_key(header) {
                continue;
            }
            fields.insert(header.clone(), RawValue::text(&decode_cell(cell)));
        }
        sink.offer(RawRow { index, fields });
        index += 1;
    }

    Ok(RawTable {
        headers,
        rows: sink.finish(),
        rows_in_source: index,
    })
}

/// UTF-8 first; anything else is taken as Windows-1252.
fn decode_cell(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => WINDOWS_1252
            .decode_without_bom_handling(bytes)
            .0
            .into_owned(),
    }
}

/// Collects every row, or a seeded reservoir sample of them.
struct RowSink {
    sample: Option<(usize, StdRng)>,
    seen: usize,
    rows: Vec<RawRow>,
}

impl RowSink {
    fn new(sample: Option<SampleSpec>) -> Self {
        Self {
            sample: sample
                .filter(|s| s.cap > 0)
                .map(|s| (s.cap, StdRng::seed_from_u64(s.seed))),
            seen: 0,
            rows: Vec::new(),
        }
    }

    fn offer(&mut self, row: RawRow) {
        match &mut self.sample {
            Some((cap, rng)) if self.rows.len() >= *cap => {
                let slot = rng.gen_range(0..=self.seen);
                if slot < *cap {
                    self.rows[slot] = row;
                }
            }
            _ => self.rows.push(row),
        }
        self.seen += 1;
    }

    fn finish(mut self) -> Vec<RawRow> {
        if self.sample.is_some() {
            self.rows.sort_by_key(|r| r.index);
        }
        self.rows
    }
}

// =============================================================================
// SPREADSHEET READER
// =============================================================================

#[derive(Debug, Clone)]
pub struct SpreadsheetOptions {
    /// 1-based physical row holding the column names.
    pub header_row: usize,
    pub sheet: Option<String>,
}

impl Default for SpreadsheetOptions {
    fn default() -> Self {
        Self {
            header_row: 3,
            sheet: None,
        }
    }
}

pub fn read_spreadsheet_path(
    path: &Path,
    opts: &SpreadsheetOptions,
) -> Result<RawTable, ReadError> {
    if !path.exists() {
        return Err(ReadError::Missing(path.to_path_buf()));
    }

    // calamine auto-detects xls, xlsx, xlsb, ods
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ReadError::Format(format!("cannot open workbook: {}", e)))?;

    let sheet_name = match &opts.sheet {
        Some(name) => name.clone(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ReadError::Format("workbook has no sheets".to_string()))?,
    };
    tracing::debug!(sheet = %sheet_name, "reading worksheet");

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| ReadError::Format(format!("cannot read sheet '{}': {}", sheet_name, e)))?;

    rows_from_range(&range, opts.header_row)
}

/// Turn a worksheet range into a `RawTable`, taking column names from the
/// 1-based physical `header_row`.
///
/// Worksheet ranges start at the first non-empty cell, so the physical row
/// is located through `range.start()` rather than by position.
pub fn rows_from_range(range: &Range<Data>, header_row: usize) -> Result<RawTable, ReadError> {
    if header_row == 0 {
        return Err(ReadError::Format("header row is 1-based".to_string()));
    }
    let header_physical = u32::try_from(header_row - 1)
        .map_err(|_| ReadError::Format(format!("header row {} is out of range", header_row)))?;
    let first_physical = match range.start() {
        Some((row, _)) => row,
        None => return Err(ReadError::Format("sheet is empty".to_string())),
    };
    if header_physical < first_physical {
        return Err(ReadError::Format(format!(
            "header row {} lies above the first populated row {}",
            header_row,
            first_physical + 1
        )));
    }

    let mut rows = range
        .rows()
        .skip((header_physical - first_physical) as usize);

    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| {
            ReadError::Format(format!("sheet has no row {} to use as header", header_row))
        })?
        .iter()
        .map(|cell| match cell {
            Data::String(s) => normalize_header(s),
            Data::Empty => String::new(),
            other => normalize_header(&other.to_string()),
        })
        .collect();

    if headers.iter().all(|h| h.is_empty()) {
        return Err(ReadError::Format(format!("header row {} is blank", header_row)));
    }

    let mut out = Vec::new();
    let mut index = 0usize;
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        let mut fields = BTreeMap::new();
        for (header, cell) in headers.iter().zip(row.iter()) {
            if header.is_empty() || fields.contains_key(header) {
                continue;
            }
            fields.insert(header.clone(), cell_value(cell));
        }
        out.push(RawRow { index, fields });
        index += 1;
    }

    Ok(RawTable {
        headers,
        rows: out,
        rows_in_source: index,
    })
}

fn cell_value(cell: &Data) -> RawValue {
    match cell {
        Data::Empty => RawValue::Empty,
        Data::String(s) => RawValue::text(s),
        Data::Float(f) => RawValue::Number(*f),
        Data::Int(i) => RawValue::Number(*i as f64),
        other => RawValue::text(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // -------------------------------------------------------------------------
    // HEADER NORMALIZATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_normalize_header_trims_and_lowercases() {
        assert_eq!(normalize_header("  Rndrng_NPI "), "rndrng_npi");
        assert_eq!(normalize_header(" BETOS "), "betos");
    }

    #[test]
    fn test_normalize_header_collapses_inner_whitespace() {
        assert_eq!(normalize_header("Allowed   Services"), "allowed services");
        assert_eq!(normalize_header("Payment\tAmt"), "payment amt");
    }

    #[test]
    fn test_normalize_header_strips_bom() {
        assert_eq!(normalize_header("\u{feff}HCPCS_Cd"), "hcpcs_cd");
    }

    // -------------------------------------------------------------------------
    // DELIMITED READER
    // -------------------------------------------------------------------------

    #[test]
    fn test_read_delimited_basic() {
        let csv = "Rndrng_NPI,HCPCS_Cd\n111,99213\n222,99214\n";
        let table = read_delimited(csv.as_bytes(), &DelimitedOptions::default()).unwrap();

        assert_eq!(table.headers, vec!["rndrng_npi", "hcpcs_cd"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows_in_source, 2);
        assert_eq!(
            table.rows[1].get("HCPCS_Cd"),
            Some(&RawValue::Text("99214".to_string()))
        );
        assert_eq!(table.rows[1].index, 1);
    }

    #[test]
    fn test_read_delimited_empty_cells_are_empty() {
        let csv = "a,b\n1,\n";
        let table = read_delimited(csv.as_bytes(), &DelimitedOptions::default()).unwrap();
        assert_eq!(table.rows[0].get("b"), Some(&RawValue::Empty));
    }

    #[test]
    fn test_read_delimited_ragged_rows_tolerated() {
        let csv = "a,b,c\n1,2\n3,4,5\n";
        let table = read_delimited(csv.as_bytes(), &DelimitedOptions::default()).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("c"), None);
    }

    #[test]
    fn test_read_delimited_latin1_fallback() {
        let mut bytes = b"name,city\n".to_vec();
        bytes.extend_from_slice(b"Jos\xe9,Bogot\xe1\n");
        let table = read_delimited(bytes.as_slice(), &DelimitedOptions::default()).unwrap();
        assert_eq!(
            table.rows[0].get("name"),
            Some(&RawValue::Text("José".to_string()))
        );
        assert_eq!(
            table.rows[0].get("city"),
            Some(&RawValue::Text("Bogotá".to_string()))
        );
    }

    #[test]
    fn test_read_delimited_custom_delimiter() {
        let csv = "a;b\n1;2\n";
        let opts = DelimitedOptions {
            delimiter: b';',
            sample: None,
        };
        let table = read_delimited(csv.as_bytes(), &opts).unwrap();
        assert_eq!(table.rows[0].get("b"), Some(&RawValue::Text("2".to_string())));
    }

    #[test]
    fn test_read_delimited_missing_path() {
        let err = read_delimited_path(
            Path::new("/definitely/not/here.csv"),
            &DelimitedOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReadError::Missing(_)));
    }

    #[test]
    fn test_read_delimited_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "hcpcs_cd,rbcs_id").unwrap();
        writeln!(file, "0001A,M1").unwrap();
        let table = read_delimited_path(file.path(), &DelimitedOptions::default()).unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    /// Yields `data` once, then fails every later read.
    struct FailingReader {
        data: Option<Vec<u8>>,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.data.take() {
                Some(bytes) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                None => Err(std::io::Error::new(std::io::ErrorKind::Other, "EIO")),
            }
        }
    }

    #[test]
    fn test_read_delimited_io_failure_is_format_error() {
        let input = FailingReader {
            data: Some(b"Rndrng_NPI,HCPCS_Cd\n111,99213\n".to_vec()),
        };
        let err = read_delimited(input, &DelimitedOptions::default()).unwrap_err();
        match err {
            ReadError::Format(reason) => assert!(reason.contains("EIO"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
    }

    // -------------------------------------------------------------------------
    // SAMPLING
    // -------------------------------------------------------------------------

    fn numbered_csv(n: usize) -> String {
        let mut csv = String::from("id\n");
        for i in 0..n {
            csv.push_str(&format!("{}\n", i));
        }
        csv
    }

    fn sampled(n: usize, cap: usize, seed: u64) -> RawTable {
        let opts = DelimitedOptions {
            delimiter: b',',
            sample: Some(SampleSpec { cap, seed }),
        };
        read_delimited(numbered_csv(n).as_bytes(), &opts).unwrap()
    }

    #[test]
    fn test_sample_caps_row_count() {
        let table = sampled(500, 50, 42);
        assert_eq!(table.rows.len(), 50);
        assert_eq!(table.rows_in_source, 500);
    }

    #[test]
    fn test_sample_is_reproducible_for_fixed_seed() {
        let a: Vec<usize> = sampled(1000, 25, 42).rows.iter().map(|r| r.index).collect();
        let b: Vec<usize> = sampled(1000, 25, 42).rows.iter().map(|r| r.index).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_sample_without_replacement_in_source_order() {
        let idx: Vec<usize> = sampled(1000, 100, 7).rows.iter().map(|r| r.index).collect();
        let mut sorted = idx.clone();
        sorted.dedup();
        assert_eq!(sorted.len(), 100);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sample_keeps_everything_under_cap() {
        let table = sampled(10, 50, 42);
        assert_eq!(table.rows.len(), 10);
    }

    #[test]
    fn test_sample_cap_zero_disables_sampling() {
        let table = sampled(10, 0, 42);
        assert_eq!(table.rows.len(), 10);
    }

    #[test]
    fn test_sampled_rows_keep_source_index() {
        let table = sampled(300, 10, 42);
        for row in &table.rows {
            let id = match row.get("id") {
                Some(RawValue::Text(s)) => s.parse::<usize>().unwrap(),
                other => panic!("unexpected cell {:?}", other),
            };
            assert_eq!(id, row.index);
        }
    }

    // -------------------------------------------------------------------------
    // SPREADSHEET READER
    // -------------------------------------------------------------------------

    fn betos_range(header: [&str; 4]) -> Range<Data> {
        let mut range = Range::new((0, 0), (5, 3));
        range.set_value((0, 0), Data::String("BETOS CY 2024".to_string()));
        for (col, name) in header.iter().enumerate() {
            range.set_value((2, col as u32), Data::String(name.to_string()));
        }
        range.set_value((3, 0), Data::String("M1A".to_string()));
        range.set_value((3, 1), Data::Float(1200.0));
        range.set_value((3, 2), Data::Float(98000.5));
        range.set_value((3, 3), Data::Int(77000));
        range.set_value((5, 0), Data::String("M1B".to_string()));
        range.set_value((5, 3), Data::String("n/a".to_string()));
        range
    }

    #[test]
    fn test_rows_from_range_uses_header_offset() {
        let range = betos_range(["BETOS", "Allowed Services", "Allowed Charges", "Payment Amt"]);
        let table = rows_from_range(&range, 3).unwrap();

        assert_eq!(
            table.headers,
            vec!["betos", "allowed services", "allowed charges", "payment amt"]
        );
        // Blank row 5 is skipped.
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Allowed Services"), Some(&RawValue::Number(1200.0)));
        assert_eq!(table.rows[0].get("Payment Amt"), Some(&RawValue::Number(77000.0)));
        assert_eq!(
            table.rows[1].get("Payment Amt"),
            Some(&RawValue::Text("n/a".to_string()))
        );
    }

    #[test]
    fn test_rows_from_range_padded_headers_identical() {
        let plain = rows_from_range(
            &betos_range(["BETOS", "Allowed Services", "Allowed Charges", "Payment Amt"]),
            3,
        )
        .unwrap();
        let padded = rows_from_range(
            &betos_range([" BETOS ", "  Allowed Services", "Allowed Charges  ", " Payment Amt "]),
            3,
        )
        .unwrap();

        assert_eq!(plain.headers, padded.headers);
        assert_eq!(plain.rows, padded.rows);
    }

    #[test]
    fn test_rows_from_range_honours_range_start() {
        // Worksheet ranges begin at the first populated cell.
        let mut range = Range::new((2, 0), (3, 1));
        range.set_value((2, 0), Data::String("BETOS".to_string()));
        range.set_value((2, 1), Data::String("Payment Amt".to_string()));
        range.set_value((3, 0), Data::String("O1A".to_string()));
        range.set_value((3, 1), Data::Float(10.0));

        let table = rows_from_range(&range, 3).unwrap();
        assert_eq!(table.headers, vec!["betos", "payment amt"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_rows_from_range_header_above_data_fails() {
        let mut range = Range::new((4, 0), (5, 0));
        range.set_value((4, 0), Data::String("BETOS".to_string()));
        let err = rows_from_range(&range, 3).unwrap_err();
        assert!(matches!(err, ReadError::Format(_)));
    }

    #[test]
    fn test_rows_from_range_zero_header_row_fails() {
        let range = betos_range(["BETOS", "a", "b", "c"]);
        assert!(rows_from_range(&range, 0).is_err());
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_rows_from_range_oversized_header_row_fails() {
        let range = betos_range(["BETOS", "a", "b", "c"]);
        let err = rows_from_range(&range, u32::MAX as usize + 2).unwrap_err();
        assert!(matches!(err, ReadError::Format(reason) if reason.contains("out of range")));
    }

    /// Two sheets: a notes sheet first, then the data sheet with its header
    /// on physical row 3.
    fn write_workbook(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();

        let notes = workbook.add_worksheet();
        notes.set_name("Notes").unwrap();
        notes.write_string(0, 0, "Source: CMS").unwrap();

        let data = workbook.add_worksheet();
        data.set_name("CY2024").unwrap();
        data.write_string(0, 0, "BETOS Summary, CY 2024").unwrap();
        for (col, name) in [" BETOS ", "Allowed Services", "Allowed Charges", "Payment Amt"]
            .iter()
            .enumerate()
        {
            data.write_string(2, col as u16, *name).unwrap();
        }
        data.write_string(3, 0, "M1A").unwrap();
        data.write_number(3, 1, 1200.0).unwrap();
        data.write_number(3, 2, 98000.5).unwrap();
        data.write_string(3, 3, "n/a").unwrap();

        workbook.save(path).unwrap();
    }

    #[test]
    fn test_read_spreadsheet_named_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("betos.xlsx");
        write_workbook(&path);

        let opts = SpreadsheetOptions {
            header_row: 3,
            sheet: Some("CY2024".to_string()),
        };
        let table = read_spreadsheet_path(&path, &opts).unwrap();

        assert_eq!(
            table.headers,
            vec!["betos", "allowed services", "allowed charges", "payment amt"]
        );
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].get("BETOS"), Some(&RawValue::Text("M1A".to_string())));
        assert_eq!(table.rows[0].get("Allowed Services"), Some(&RawValue::Number(1200.0)));
    }

    #[test]
    fn test_read_spreadsheet_defaults_to_first_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("betos.xlsx");
        write_workbook(&path);

        // "Notes" has a single row, so there is no row 3 to use as header.
        let err = read_spreadsheet_path(&path, &SpreadsheetOptions::default()).unwrap_err();
        assert!(matches!(err, ReadError::Format(_)));
    }

    #[test]
    fn test_read_spreadsheet_unknown_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("betos.xlsx");
        write_workbook(&path);

        let opts = SpreadsheetOptions {
            header_row: 3,
            sheet: Some("Nope".to_string()),
        };
        match read_spreadsheet_path(&path, &opts).unwrap_err() {
            ReadError::Format(reason) => assert!(reason.contains("Nope"), "{}", reason),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_read_spreadsheet_missing_path() {
        let err = read_spreadsheet_path(
            Path::new("/definitely/not/here.xlsx"),
            &SpreadsheetOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ReadError::Missing(_)));
    }
}
