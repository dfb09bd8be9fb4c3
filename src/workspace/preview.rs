use std::collections::HashMap;

use crate::model::ImageFile;

const PREVIEW_PREFIX: &str = "/preview/";

/// Local preview URLs for uploaded images, the server-side counterpart of a
/// browser object URL. URLs stay valid until revoked.
#[derive(Debug, Default)]
pub struct PreviewStore {
    entries: HashMap<u64, ImageFile>,
    next_id: u64,
}

impl PreviewStore {
    /// Register `file` and return the URL it is served under.
    pub fn create(&mut self, file: &ImageFile) -> String {
        self.next_id += 1;
        self.entries.insert(self.next_id, file.clone());
        format!("{PREVIEW_PREFIX}{}", self.next_id)
    }

    pub fn get(&self, url: &str) -> Option<&ImageFile> {
        self.entries.get(&parse_id(url)?)
    }

    /// Release a URL. Returns `false` if it was unknown or already revoked.
    pub fn revoke(&mut self, url: &str) -> bool {
        parse_id(url)
            .and_then(|id| self.entries.remove(&id))
            .is_some()
    }

    pub fn revoke_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_id(url: &str) -> Option<u64> {
    url.strip_prefix(PREVIEW_PREFIX)?.parse().ok()
}
