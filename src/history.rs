use std::fmt;

use serde::{Deserialize, Serialize};

use crate::storage::{Storage, StorageError};

/// Delimiter used by the plain-string record format of older saves.
const LEGACY_DELIMITER: &str = " - ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub query_text: String,
    pub result_label: String,
}

impl HistoryRecord {
    pub fn new(query_text: impl Into<String>, result_label: impl Into<String>) -> Self {
        HistoryRecord {
            query_text: query_text.into(),
            result_label: result_label.into(),
        }
    }

    /// Parses `"<query> - <label>"`. Labels never contain the delimiter but
    /// queries may, so the split happens at the last occurrence.
    pub fn from_legacy(line: &str) -> Self {
        match line.rsplit_once(LEGACY_DELIMITER) {
            Some((query, label)) => HistoryRecord::new(query, label),
            None => HistoryRecord::new(line, ""),
        }
    }
}

impl fmt::Display for HistoryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.query_text, LEGACY_DELIMITER, self.result_label)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Structured(HistoryRecord),
    Legacy(String),
}

impl From<StoredRecord> for HistoryRecord {
    fn from(stored: StoredRecord) -> Self {
        match stored {
            StoredRecord::Structured(record) => record,
            StoredRecord::Legacy(line) => HistoryRecord::from_legacy(&line),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("stored history is not valid: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("history index {index} out of range (len {len})")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered history of past classifications, mirrored into one storage slot.
///
/// Every mutation writes the whole list back before returning. When the
/// write fails the in-memory change is kept and the error is returned.
pub struct HistoryStore<S: Storage> {
    storage: S,
    key: String,
    records: Vec<HistoryRecord>,
}

impl<S: Storage> HistoryStore<S> {
    /// Creates the store and loads whatever the slot currently holds.
    pub fn open(storage: S, key: impl Into<String>) -> Self {
        let mut store = HistoryStore {
            storage,
            key: key.into(),
            records: Vec::new(),
        };
        store.records = store.load();
        store
    }

    /// Reads the slot. Unreadable or unparsable data yields an empty list.
    pub fn load(&self) -> Vec<HistoryRecord> {
        match self.read() {
            Ok(records) => {
                tracing::debug!(count = records.len(), key = %self.key, "loaded history");
                records
            }
            Err(e) => {
                tracing::warn!(key = %self.key, "discarding stored history: {}", e);
                Vec::new()
            }
        }
    }

    fn read(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let Some(raw) = self.storage.get_item(&self.key)? else {
            return Ok(Vec::new());
        };
        let stored: Vec<StoredRecord> = serde_json::from_str(&raw)?;
        Ok(stored.into_iter().map(HistoryRecord::from).collect())
    }

    pub fn save(&mut self) -> Result<(), HistoryError> {
        let serialized = serde_json::to_string(&self.records)?;
        self.storage.set_item(&self.key, &serialized)?;
        Ok(())
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn append(&mut self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records.push(record);
        self.save()
    }

    pub fn remove_at(&mut self, index: usize) -> Result<HistoryRecord, HistoryError> {
        if index >= self.records.len() {
            return Err(HistoryError::IndexOutOfRange {
                index,
                len: self.records.len(),
            });
        }
        let removed = self.records.remove(index);
        self.save()?;
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.records.clear();
        self.save()
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &S {
        &self.storage
    }

    #[cfg(test)]
    pub(crate) fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }
}
