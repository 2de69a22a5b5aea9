//! Utility functions and types

pub mod io;

pub use io::{ensure_dir, read_csv, read_parquet, write_csv, write_json};
