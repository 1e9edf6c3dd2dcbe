use anyhow::{Context, Result};
use log::warn;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Load a JSON document from disk, falling back to the type's default when the
/// file does not exist yet or cannot be parsed. A corrupt store is logged and
/// replaced on the next flush rather than aborting the scanner.
pub fn load_json_or_default<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return T::default(),
    };

    match serde_json::from_str(&contents) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Failed to parse {}: {} - starting from empty state",
                path.display(),
                e
            );
            T::default()
        }
    }
}

/// Write a JSON document with atomic replace: serialize to a sibling temp file,
/// then rename over the target. A crash mid-write leaves the previous document
/// intact; readers never observe a partial file.
pub fn write_json_atomic<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    let json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize state for {}", path.display()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }

    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, json)
        .with_context(|| format!("Failed to write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let loaded: HashMap<String, Vec<String>> = load_json_or_default(&path);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = HashMap::new();
        state.insert("FG2605".to_string(), vec!["a".to_string(), "b".to_string()]);

        write_json_atomic(&path, &state).unwrap();
        let loaded: HashMap<String, Vec<String>> = load_json_or_default(&path);
        assert_eq!(loaded, state);
    }

    #[test]
    fn test_corrupt_file_yields_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "{not json").unwrap();

        let loaded: HashMap<String, Vec<String>> = load_json_or_default(&path);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_overwrite_replaces_previous_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = HashMap::new();
        state.insert("RB2510".to_string(), vec!["x".to_string()]);
        write_json_atomic(&path, &state).unwrap();

        state.insert("RB2510".to_string(), vec!["y".to_string()]);
        write_json_atomic(&path, &state).unwrap();

        let loaded: HashMap<String, Vec<String>> = load_json_or_default(&path);
        assert_eq!(loaded["RB2510"], vec!["y".to_string()]);
    }
}
