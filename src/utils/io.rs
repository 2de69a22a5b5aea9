//! File IO helpers for the pipeline inputs and outputs

use crate::error::{Result, TripcastError};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Read a Parquet file into a DataFrame
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)
        .map_err(|e| TripcastError::DataError(format!("cannot open {}: {e}", path.display())))?;

    ParquetReader::new(file)
        .finish()
        .map_err(|e| TripcastError::DataError(e.to_string()))
}

/// Read a delimited text file with a header row.
///
/// Schema inference scans the whole file: a numeric column that only turns
/// fractional far into the file must still come out as Float64, not abort
/// the parse.
pub fn read_csv(path: &Path) -> Result<DataFrame> {
    let file = File::open(path)
        .map_err(|e| TripcastError::DataError(format!("cannot open {}: {e}", path.display())))?;

    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(None)
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(|e| TripcastError::DataError(e.to_string()))
}

/// Write a DataFrame as CSV
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| TripcastError::DataError(format!("cannot create {}: {e}", path.display())))?;

    CsvWriter::new(&mut file)
        .finish(df)
        .map_err(|e| TripcastError::DataError(e.to_string()))
}

/// Serialize a model or metrics document as pretty JSON
pub fn write_json<T: serde::Serialize>(value: &T, path: &Path) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| TripcastError::DataError(format!("cannot create {}: {e}", path.display())))?;
    serde_json::to_writer_pretty(file, value)
        .map_err(|e| TripcastError::SerializationError(e.to_string()))
}

/// Create a directory and its parents if absent
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_csv_round_trip() {
        let mut df = df!(
            "a" => &[1i64, 2, 3],
            "b" => &[0.5f64, 1.5, 2.5]
        )
        .unwrap();

        let file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        write_csv(&mut df, file.path()).unwrap();

        let loaded = read_csv(file.path()).unwrap();
        assert_eq!(loaded.height(), 3);
        assert_eq!(loaded.width(), 2);
    }

    #[test]
    fn test_read_csv_infers_float_from_late_decimals() {
        // Whole numbers for well over a hundred rows, then a fractional
        // value; the column must infer as Float64 rather than fail to parse
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "hour,precip_mm").unwrap();
        for i in 0..150 {
            writeln!(file, "{i},0").unwrap();
        }
        writeln!(file, "150,1.2").unwrap();

        let df = read_csv(file.path()).unwrap();
        assert_eq!(df.height(), 151);
        let precip = df.column("precip_mm").unwrap().f64().unwrap();
        assert_eq!(precip.get(150), Some(1.2));
    }

    #[test]
    fn test_read_csv_missing_file() {
        let err = read_csv(Path::new("/nonexistent/weather.csv"));
        assert!(err.is_err());
    }

    #[test]
    fn test_read_csv_header_only() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "timestamp,precip_mm,temp_c").unwrap();
        writeln!(file, "2023-01-01 00:00:00,0.0,5.0").unwrap();
        let df = read_csv(file.path()).unwrap();
        assert_eq!(df.height(), 1);
        assert!(df.column("precip_mm").is_ok());
    }
}
