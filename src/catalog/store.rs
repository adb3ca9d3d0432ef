//! Flat-file persistence for catalog documents.

use crate::Result;
use ohno::IntoAppError;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Load a JSON document from a file.
pub fn load_json(path: impl AsRef<Path>) -> Result<serde_json::Value> {
    let path = path.as_ref();
    let file = File::open(path).into_app_err_with(|| format!("unable to open '{}'", path.display()))?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).into_app_err_with(|| format!("unable to parse '{}'", path.display()))
}

/// Write a JSON document with 2-space indentation and a trailing newline,
/// creating parent directories as needed. Keys serialize sorted, which keeps
/// rebuild diffs stable.
pub fn save_json(path: impl AsRef<Path>, doc: &serde_json::Value) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).into_app_err_with(|| format!("unable to create directory '{}'", parent.display()))?;
    }

    let file = File::create(path).into_app_err_with(|| format!("unable to create '{}'", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, doc).into_app_err_with(|| format!("unable to write '{}'", path.display()))?;
    writer
        .write_all(b"\n")
        .and_then(|()| writer.flush())
        .into_app_err_with(|| format!("unable to flush '{}'", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn round_trips_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");

        let doc = json!({"b": 1, "a": {"z": [1, 2, 3]}});
        save_json(&path, &doc).unwrap();

        let loaded = load_json(&path).unwrap();
        assert_eq!(loaded, doc);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn missing_file_is_an_error() {
        let result = load_json("/nonexistent/doc.json");
        assert!(result.unwrap_err().to_string().contains("unable to open"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let result = load_json(&path);
        assert!(result.unwrap_err().to_string().contains("unable to parse"));
    }
}
