//! CSV and JSON writers for report outputs.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Header row of `T`, taken from the serde field names of a default value.
fn header_of<T: Serialize + Default>() -> Result<csv::StringRecord> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.serialize(T::default())?;
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("CSV buffer error: {}", e))?;
    let mut reader = csv::Reader::from_reader(bytes.as_slice());
    Ok(reader.headers()?.clone())
}

fn write_rows<T: Serialize + Default, W: Write>(writer: &mut csv::Writer<W>, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        writer.write_record(&header_of::<T>()?)?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    Ok(())
}

/// Write `rows` as CSV with a header row taken from the serde field names,
/// also when `rows` is empty. The file starts with a UTF-8 BOM so
/// spreadsheet tools detect the encoding.
pub fn write_csv<T: Serialize + Default>(path: &Path, rows: &[T]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = fs::File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all("\u{feff}".as_bytes())?;

    let mut writer = csv::Writer::from_writer(file);
    write_rows(&mut writer, rows).with_context(|| format!("Failed to write rows to {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

/// Render `rows` as CSV text, without a BOM.
pub fn to_csv_string<T: Serialize + Default>(rows: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    write_rows(&mut writer, rows)?;
    let bytes = writer.into_inner().map_err(|e| anyhow::anyhow!("CSV buffer error: {}", e))?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

/// Pretty-printed JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::community_report::CommunityReportRow;
    use crate::analysis::insights::LabelValue;

    #[test]
    fn test_empty_export_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("community_report.csv");
        write_csv::<CommunityReportRow>(&path, &[]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let text = text.strip_prefix('\u{feff}').unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("備查編號,社區名稱,縣市,行政區"));
        assert!(lines[0].ends_with("是否完整季"));
        assert_eq!(lines[0].split(',').count(), 32);
    }

    #[test]
    fn test_header_written_once_with_rows() {
        let rows = vec![LabelValue { label: "台北市".to_string(), value: 1.5 }];
        assert_eq!(to_csv_string(&rows).unwrap(), "label,value\n台北市,1.5\n");
        assert_eq!(to_csv_string::<LabelValue>(&[]).unwrap(), "label,value\n");
    }
}
