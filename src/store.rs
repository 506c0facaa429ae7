use crate::error::ResultsError;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A JSON file holding an array of round results.
///
/// Every append rewrites the whole file: read, parse (a missing or empty file is `[]`), push,
/// write back. Appends through the same store are serialized, concurrent writers from other
/// stores or processes are not.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append<T: Serialize>(&self, record: &T) -> Result<usize, ResultsError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut results = self.read_all()?;
        results.push(serde_json::to_value(record)?);
        fs::write(&self.path, serde_json::to_string_pretty(&results)?)?;

        Ok(results.len())
    }

    pub fn read_all(&self) -> Result<Vec<Value>, ResultsError> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => String::new(),
            Err(err) => return Err(err.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }
}
