//! Utility functions used in all other light-minded modules.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::bufread::GzDecoder;
use serde::Serialize;

use crate::error::Result;

/// Check whether the file extension ends with ".gz".
pub fn is_gz_file<P>(path: P) -> bool
where
    P: AsRef<Path>,
{
    path.as_ref()
        .file_name()
        .map(|a| a.to_string_lossy().ends_with(".gz"))
        .unwrap_or(false)
}

/// Read a whole UTF-8 text file. If the file's name ends with ".gz", the file is gunzipped on the fly.
pub fn read_text_file<P: AsRef<Path>>(path: P) -> Result<String> {
    let gz = is_gz_file(&path);
    let file = BufReader::new(File::open(path)?);
    let mut text = String::new();
    if gz {
        GzDecoder::new(file).read_to_string(&mut text)?;
    } else {
        let mut file = file;
        file.read_to_string(&mut text)?;
    }
    Ok(text)
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir<P: AsRef<Path>>(path: P) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Write a UTF-8 text file, creating parent directories as needed.
pub fn write_text_file<P: AsRef<Path>>(path: P, contents: &str) -> Result<()> {
    ensure_parent_dir(&path)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Serialize `value` as compact JSON into the file at `path`.
pub fn write_json_file<P, T>(path: P, value: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize + ?Sized,
{
    ensure_parent_dir(&path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
