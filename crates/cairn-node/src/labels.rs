//! CSV label tables and ledger rows.
//!
//! A label table is `address,label` records with an optional header line.
//! Quoting follows RFC 4180, so labels may contain commas, quotes and line
//! breaks.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use cairn_core::error::{CairnError, SourceError};
use cairn_core::ledger::LedgerEvent;
use cairn_core::traits::ClusterSink;
use cairn_core::types::ClusterAssignment;

const LABEL_HEADER: [&str; 2] = ["address", "label"];
const LEDGER_HEADER: [&str; 9] = [
    "block_height",
    "txid",
    "sort_key",
    "address",
    "address_prefix",
    "effect",
    "value",
    "label",
    "is_change",
];

/// Read an `address,label` table. Later rows override earlier ones.
pub fn read_label_table(reader: impl Read) -> Result<HashMap<String, String>, CairnError> {
    let mut csv = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut table = HashMap::new();
    for (index, record) in csv.records().enumerate() {
        let record = record.map_err(csv_error)?;
        if index == 0 && record.iter().eq(LABEL_HEADER) {
            continue;
        }
        let line = record.position().map_or(0, |p| p.line() as usize);
        match (record.len(), record.get(0), record.get(1)) {
            (2, Some(address), Some(label)) => {
                table.insert(address.to_string(), label.to_string());
            }
            (fields, ..) => {
                return Err(SourceError::Parse {
                    line,
                    message: format!("expected 2 fields, got {fields}"),
                }
                .into());
            }
        }
    }
    Ok(table)
}

pub fn load_label_table(path: impl AsRef<Path>) -> Result<HashMap<String, String>, CairnError> {
    let table = read_label_table(File::open(path.as_ref())?)?;
    tracing::info!(path = %path.as_ref().display(), entries = table.len(), "label table loaded");
    Ok(table)
}

/// [`ClusterSink`] writing an `address,label` CSV.
pub struct CsvClusterSink<W: Write> {
    out: csv::Writer<W>,
    written: u64,
}

impl CsvClusterSink<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CairnError> {
        Self::new(File::create(path)?)
    }
}

impl<W: Write> CsvClusterSink<W> {
    pub fn new(out: W) -> Result<Self, CairnError> {
        let mut out = csv::Writer::from_writer(out);
        out.write_record(LABEL_HEADER).map_err(csv_error)?;
        Ok(Self { out, written: 0 })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush and return the underlying writer.
    pub fn into_inner(self) -> Result<W, CairnError> {
        into_inner(self.out)
    }
}

impl<W: Write> ClusterSink for CsvClusterSink<W> {
    fn emit(&mut self, assignment: &ClusterAssignment) -> Result<(), CairnError> {
        self.out
            .write_record([assignment.address.as_str(), assignment.label.as_str()])
            .map_err(csv_error)?;
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), CairnError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes ledger events as CSV rows.
pub struct LedgerCsvWriter<W: Write> {
    out: csv::Writer<W>,
}

impl<W: Write> LedgerCsvWriter<W> {
    pub fn new(out: W) -> Result<Self, CairnError> {
        let mut out = csv::Writer::from_writer(out);
        out.write_record(LEDGER_HEADER).map_err(csv_error)?;
        Ok(Self { out })
    }

    pub fn write_all(&mut self, events: &[LedgerEvent]) -> Result<(), CairnError> {
        for event in events {
            let height = event.block_height.to_string();
            let sort_key = event.sort_key.to_string();
            let effect = event.effect.sign().to_string();
            let value = event.value.to_string();
            self.out
                .write_record([
                    height.as_str(),
                    event.txid.as_str(),
                    sort_key.as_str(),
                    event.address.as_str(),
                    event.address_prefix.as_str(),
                    effect.as_str(),
                    value.as_str(),
                    event.label.as_str(),
                    if event.is_change { "true" } else { "false" },
                ])
                .map_err(csv_error)?;
        }
        Ok(())
    }

    pub fn finish(self) -> Result<W, CairnError> {
        into_inner(self.out)
    }
}

fn into_inner<W: Write>(out: csv::Writer<W>) -> Result<W, CairnError> {
    out.into_inner()
        .map_err(|e| CairnError::Io(std::io::Error::new(e.error().kind(), e.to_string())))
}

/// I/O failures stay I/O errors; anything else is a malformed record.
fn csv_error(err: csv::Error) -> CairnError {
    let line = err.position().map_or(0, |p| p.line() as usize);
    let message = err.to_string();
    match err.into_kind() {
        csv::ErrorKind::Io(io) => CairnError::Io(io),
        _ => SourceError::Parse { line, message }.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::ledger::Effect;

    fn assignment(address: &str, label: &str) -> ClusterAssignment {
        ClusterAssignment {
            address: address.to_string(),
            label: label.to_string(),
        }
    }

    fn event(label: &str) -> LedgerEvent {
        LedgerEvent {
            block_height: 9,
            txid: "ab".into(),
            sort_key: 1,
            address: "1A".into(),
            address_prefix: "1A".into(),
            effect: Effect::Debit,
            value: 500,
            label: label.into(),
            is_change: false,
        }
    }

    #[test]
    fn sink_output_reads_back() {
        let mut sink = CsvClusterSink::new(Vec::new()).unwrap();
        sink.emit(&assignment("1A", "Wallet-1")).unwrap();
        sink.emit(&assignment("3B", "Pool, Inc.")).unwrap();
        sink.emit(&assignment("3C", "Big \"Bad\" Exchange")).unwrap();
        sink.finish().unwrap();
        assert_eq!(sink.written(), 3);

        let bytes = sink.into_inner().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with("address,label\n"));
        assert!(text.contains("3B,\"Pool, Inc.\"\n"));
        assert!(text.contains("3C,\"Big \"\"Bad\"\" Exchange\"\n"));

        let table = read_label_table(bytes.as_slice()).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table["3B"], "Pool, Inc.");
        assert_eq!(table["3C"], "Big \"Bad\" Exchange");
    }

    #[test]
    fn quoted_line_breaks_stay_in_one_field() {
        let mut sink = CsvClusterSink::new(Vec::new()).unwrap();
        sink.emit(&assignment("1A", "Desk\r\nFloor 2")).unwrap();
        sink.emit(&assignment("1B", "plain")).unwrap();
        let bytes = sink.into_inner().unwrap();

        let table = read_label_table(bytes.as_slice()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["1A"], "Desk\r\nFloor 2");
        assert_eq!(table["1B"], "plain");

        let crlf = read_label_table("1C,\"a\r\nb\"\r\n1D,x\r\n".as_bytes()).unwrap();
        assert_eq!(crlf["1C"], "a\r\nb");
        assert_eq!(crlf["1D"], "x");
    }

    #[test]
    fn table_without_header() {
        let table = read_label_table("1A,x\n\n1B,y\n1A,z\n".as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table["1A"], "z");
    }

    #[test]
    fn empty_label_is_kept() {
        let table = read_label_table("1A,\n".as_bytes()).unwrap();
        assert_eq!(table["1A"], "");
    }

    #[test]
    fn wrong_field_count_reports_line() {
        let err = read_label_table("address,label\n1A\n".as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            CairnError::Source(SourceError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn ledger_rows_use_signed_effect() {
        let mut writer = LedgerCsvWriter::new(Vec::new()).unwrap();
        writer.write_all(&[event(""), event("Pool, Inc.")]).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some(LEDGER_HEADER.join(",").as_str()));
        assert_eq!(lines.next(), Some("9,ab,1,1A,1A,-1,500,,false"));
        assert_eq!(lines.next(), Some("9,ab,1,1A,1A,-1,500,\"Pool, Inc.\",false"));
    }
}
