//! Multi-select over the loaded part of a scan result

use crate::error::{Result, SessionError};
use crate::model::{Category, FileEntry, ScanResult};
use std::collections::HashSet;

/// Checkbox state of a category, computed over its loaded files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryCheck {
    All,
    Partial,
    None,
}

/// Selected entry ids.
///
/// Every operation that adds keys consults the result so that only loaded
/// entries can ever be selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionSet {
    keys: HashSet<String>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn selected_count(&self) -> usize {
        self.keys.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.keys.contains(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Flip one entry. Ids that are not loaded are ignored. Returns whether the id is now selected.
    pub fn toggle(&mut self, result: &ScanResult, id: &str) -> bool {
        if self.keys.remove(id) {
            return false;
        }
        if result.contains_entry(id) {
            self.keys.insert(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn select_all(&mut self, result: &ScanResult) {
        self.keys
            .extend(result.loaded_entries().map(|entry| entry.id.clone()));
    }

    pub fn deselect_all(&mut self) {
        self.keys.clear();
    }

    /// Select every loaded file of the category unless all already are, in which
    /// case deselect them. Other categories are untouched.
    pub fn toggle_category(&mut self, result: &ScanResult, key: &str) -> Result<CategoryCheck> {
        let category = result
            .category(key)
            .ok_or_else(|| SessionError::UnknownCategory(key.to_string()))?;

        if self.category_check(category) == CategoryCheck::All {
            for file in &category.files {
                self.keys.remove(&file.id);
            }
        } else {
            self.keys
                .extend(category.files.iter().map(|file| file.id.clone()));
        }
        Ok(self.category_check(category))
    }

    pub fn selected_in(&self, category: &Category) -> usize {
        category
            .files
            .iter()
            .filter(|file| self.keys.contains(&file.id))
            .count()
    }

    pub fn category_check(&self, category: &Category) -> CategoryCheck {
        let selected = self.selected_in(category);
        if selected == 0 {
            CategoryCheck::None
        } else if selected == category.files.len() {
            CategoryCheck::All
        } else {
            CategoryCheck::Partial
        }
    }

    /// Sum over loaded selected files. Unloaded entries have no known size and never count.
    pub fn selected_size(&self, result: &ScanResult) -> u64 {
        result
            .loaded_entries()
            .filter(|entry| self.keys.contains(&entry.id))
            .map(|entry| entry.size)
            .sum()
    }

    pub fn selected_entries<'r>(&self, result: &'r ScanResult) -> Vec<&'r FileEntry> {
        result
            .loaded_entries()
            .filter(|entry| self.keys.contains(&entry.id))
            .collect()
    }

    pub fn remove_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) {
        for id in ids {
            self.keys.remove(id);
        }
    }

    /// Drop keys that no longer name a loaded entry. Returns how many were dropped.
    pub fn prune(&mut self, result: &ScanResult) -> usize {
        let loaded = result.loaded_ids();
        let before = self.keys.len();
        self.keys.retain(|key| loaded.contains(key.as_str()));
        before - self.keys.len()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
