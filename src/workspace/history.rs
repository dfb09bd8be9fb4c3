use serde::Serialize;

use crate::model::HistoryRecord;

/// State of the patient history page: the search box, the loaded records,
/// and which record (if any) is open in the preview modal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistoryView {
    pub query: String,
    pub records: Vec<HistoryRecord>,
    pub error: Option<String>,
    selected: Option<String>,
}

impl HistoryView {
    /// Replace the records after a successful search. A selection that no
    /// longer matches any record is dropped.
    pub fn set_results(&mut self, records: Vec<HistoryRecord>) {
        self.records = records;
        self.error = None;
        if let Some(key) = &self.selected
            && !self.records.iter().any(|r| &r.key() == key)
        {
            self.selected = None;
        }
    }

    pub fn set_error(&mut self, message: String) {
        self.records.clear();
        self.selected = None;
        self.error = Some(message);
    }

    /// Open the preview modal for `key`. Returns `false` for unknown keys.
    pub fn select(&mut self, key: &str) -> bool {
        if self.records.iter().any(|r| r.key() == key) {
            self.selected = Some(key.to_string());
            true
        } else {
            false
        }
    }

    pub fn close_preview(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<&HistoryRecord> {
        let key = self.selected.as_deref()?;
        self.records.iter().find(|r| r.key() == key)
    }
}
