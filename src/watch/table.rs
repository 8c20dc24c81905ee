use std::collections::HashMap;

/// One line of the watch display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRow {
    pub event_type: String,
    pub kind: String,
    pub name: String,
    pub detail: String,
    pub ready: bool,
}

impl WatchRow {
    pub fn waiting(kind: &str, name: &str) -> Self {
        Self {
            event_type: String::new(),
            kind: kind.to_string(),
            name: name.to_string(),
            detail: "Waiting".to_string(),
            ready: false,
        }
    }
}

/// Per-resource completion table, rows kept in the order they were seeded.
#[derive(Debug, Clone, Default)]
pub struct WatchTable {
    keys: Vec<String>,
    rows: HashMap<String, WatchRow>,
}

impl WatchTable {
    /// Seed one waiting row per Kubernetes object id
    /// (`apiVersion:kind[:namespace]:name`).
    pub fn from_object_ids(ids: &[String]) -> Self {
        let mut table = Self::default();
        for id in ids {
            let segments: Vec<&str> = id.split(':').collect();
            let kind = segments.get(1).copied().unwrap_or_default();
            let name = segments.last().copied().unwrap_or_default();
            table.insert(id, WatchRow::waiting(kind, name));
        }
        table
    }

    pub fn insert(&mut self, key: &str, row: WatchRow) {
        if !self.rows.contains_key(key) {
            self.keys.push(key.to_string());
        }
        self.rows.insert(key.to_string(), row);
    }

    /// Replace the row for `key`. Unknown keys are ignored and reported as
    /// `false`.
    pub fn update(&mut self, key: &str, row: WatchRow) -> bool {
        match self.rows.get_mut(key) {
            Some(existing) => {
                *existing = row;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&WatchRow> {
        self.rows.get(key)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&str, &WatchRow)> {
        self.keys
            .iter()
            .filter_map(|k| self.rows.get(k).map(|r| (k.as_str(), r)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Non-empty and every row ready.
    pub fn all_completed(&self) -> bool {
        !self.rows.is_empty() && self.rows.values().all(|r| r.ready)
    }
}
