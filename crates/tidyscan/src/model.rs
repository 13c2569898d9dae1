//! Data model shared by every scan domain

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// The five kinds of scan the worker exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDomain {
    LargeFile,
    JunkFile,
    AppCache,
    SoftwareResidue,
    FileClassification,
}

impl ScanDomain {
    pub const ALL: [ScanDomain; 5] = [
        ScanDomain::LargeFile,
        ScanDomain::JunkFile,
        ScanDomain::AppCache,
        ScanDomain::SoftwareResidue,
        ScanDomain::FileClassification,
    ];

    /// Prefix shared by every worker command of this domain (`<prefix>_start`, ...)
    pub fn command_prefix(&self) -> &'static str {
        match self {
            ScanDomain::LargeFile => "large_file_scan",
            ScanDomain::JunkFile => "junk_file_scan",
            ScanDomain::AppCache => "app_cache_scan",
            ScanDomain::SoftwareResidue => "residue_scan",
            ScanDomain::FileClassification => "disk_scan",
        }
    }

    pub fn progress_channel(&self) -> &'static str {
        match self {
            ScanDomain::LargeFile => "large_file:progress",
            ScanDomain::JunkFile => "junk_file:progress",
            ScanDomain::AppCache => "app_cache:progress",
            ScanDomain::SoftwareResidue => "residue:progress",
            ScanDomain::FileClassification => "scan:progress",
        }
    }

    pub fn complete_channel(&self) -> &'static str {
        match self {
            ScanDomain::LargeFile => "large_file:complete",
            ScanDomain::JunkFile => "junk_file:complete",
            ScanDomain::AppCache => "app_cache:complete",
            ScanDomain::SoftwareResidue => "residue:complete",
            ScanDomain::FileClassification => "scan:complete",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ScanDomain::LargeFile => "Large files",
            ScanDomain::JunkFile => "Junk files",
            ScanDomain::AppCache => "Application cache",
            ScanDomain::SoftwareResidue => "Software residue",
            ScanDomain::FileClassification => "File classification",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanDomain::LargeFile => "large-file",
            ScanDomain::JunkFile => "junk-file",
            ScanDomain::AppCache => "app-cache",
            ScanDomain::SoftwareResidue => "residue",
            ScanDomain::FileClassification => "classification",
        }
    }
}

impl fmt::Display for ScanDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScanDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScanDomain::ALL
            .into_iter()
            .find(|domain| domain.name() == s)
            .ok_or_else(|| format!("unknown scan domain '{}'", s))
    }
}

/// Lifecycle status of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    #[default]
    Idle,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl ScanStatus {
    /// A session is active while the worker may still be producing events for it
    pub fn is_active(&self) -> bool {
        matches!(self, ScanStatus::Scanning | ScanStatus::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Error
        )
    }

    /// `start()` is only accepted from these states
    pub fn can_start(&self) -> bool {
        !self.is_active()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "idle",
            ScanStatus::Scanning => "scanning",
            ScanStatus::Paused => "paused",
            ScanStatus::Completed => "completed",
            ScanStatus::Cancelled => "cancelled",
            ScanStatus::Error => "error",
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque identifier handed out by the worker when a scan starts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// The session a controller is currently tracking.
#[derive(Debug, Clone)]
pub struct ScanSession {
    /// `None` until the worker has acknowledged the start command
    pub id: Option<SessionId>,
    pub domain: ScanDomain,
    pub status: ScanStatus,
    pub started_at: Option<DateTime<Utc>>,
}

impl ScanSession {
    pub fn new(domain: ScanDomain) -> Self {
        Self {
            id: None,
            domain,
            status: ScanStatus::Idle,
            started_at: None,
        }
    }
}

fn reported() -> bool {
    true
}

/// Snapshot of a running scan. Replaced wholesale on every progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub session_id: SessionId,
    pub status: ScanStatus,
    /// False when the worker left the status out and `status` is assumed
    #[serde(default = "reported")]
    pub status_reported: bool,
    pub current_path: String,
    pub scanned_count: u64,
    pub found_count: u64,
    pub scanned_size: u64,
    pub total_size: u64,
    pub percent: f32,
    pub speed: f64,
    pub phase: Option<String>,
    /// Failure detail carried by `error` progress events
    pub message: Option<String>,
}

impl ScanProgress {
    pub fn new(session_id: SessionId, status: ScanStatus) -> Self {
        Self {
            session_id,
            status,
            status_reported: true,
            current_path: String::new(),
            scanned_count: 0,
            found_count: 0,
            scanned_size: 0,
            total_size: 0,
            percent: 0.0,
            speed: 0.0,
            phase: None,
            message: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    File,
    Directory,
    RegistryKey,
}

/// One entry of a scan result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Unique within a scan. Equal to `path` except where paths repeat.
    pub id: String,
    pub path: String,
    pub name: String,
    pub size: u64,
    /// Milliseconds since the unix epoch
    pub modified_time: i64,
    pub kind: EntryKind,
    pub safe_to_delete: bool,
    pub detail: Option<String>,
}

impl FileEntry {
    /// Entry keyed by its path, the common case
    pub fn from_path(path: impl Into<String>, size: u64, modified_time: i64) -> Self {
        let path = path.into();
        let name = file_name(&path).to_string();
        Self {
            id: path.clone(),
            path,
            name,
            size,
            modified_time,
            kind: EntryKind::File,
            safe_to_delete: true,
            detail: None,
        }
    }
}

/// Last component of a path, accepting either separator
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\'])
        .find(|part| !part.is_empty())
        .unwrap_or(path)
}

/// A named group of entries that pages and selects independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub key: String,
    pub display_name: String,
    /// Loaded page(s); never longer than `file_count`
    pub files: Vec<FileEntry>,
    /// Authoritative total reported by the worker
    pub file_count: u64,
    pub total_size: u64,
    pub has_more: bool,
}

impl Category {
    /// Category whose files are all loaded
    pub fn complete(key: impl Into<String>, display_name: impl Into<String>, files: Vec<FileEntry>) -> Self {
        let total_size = files.iter().map(|f| f.size).sum();
        Self {
            key: key.into(),
            display_name: display_name.into(),
            file_count: files.len() as u64,
            total_size,
            files,
            has_more: false,
        }
    }

    pub fn loaded_len(&self) -> usize {
        self.files.len()
    }

    pub fn loaded_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.files.iter().any(|f| f.id == id)
    }

    /// Drop loaded entries beyond `file_count`, returning how many were dropped
    pub fn enforce_count(&mut self) -> usize {
        let limit = self.file_count as usize;
        if self.files.len() > limit {
            let dropped = self.files.len() - limit;
            self.files.truncate(limit);
            dropped
        } else {
            0
        }
    }
}

/// Result of a completed scan, reduced to categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub session_id: SessionId,
    pub categories: Vec<Category>,
    pub total_files: u64,
    pub total_size: u64,
    pub duration_ms: u64,
}

impl ScanResult {
    pub fn new(session_id: SessionId, categories: Vec<Category>, duration_ms: u64) -> Self {
        let mut result = Self {
            session_id,
            categories,
            total_files: 0,
            total_size: 0,
            duration_ms,
        };
        result.recompute_totals();
        result
    }

    pub fn recompute_totals(&mut self) {
        self.total_files = self.categories.iter().map(|c| c.file_count).sum();
        self.total_size = self.categories.iter().map(|c| c.total_size).sum();
    }

    pub fn category(&self, key: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.key == key)
    }

    pub fn category_mut(&mut self, key: &str) -> Option<&mut Category> {
        self.categories.iter_mut().find(|c| c.key == key)
    }

    /// Every loaded entry across all categories
    pub fn loaded_entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.categories.iter().flat_map(|c| c.files.iter())
    }

    pub fn loaded_count(&self) -> usize {
        self.categories.iter().map(|c| c.files.len()).sum()
    }

    pub fn find_entry(&self, id: &str) -> Option<&FileEntry> {
        self.loaded_entries().find(|f| f.id == id)
    }

    pub fn contains_entry(&self, id: &str) -> bool {
        self.find_entry(id).is_some()
    }

    pub fn loaded_ids(&self) -> HashSet<&str> {
        self.loaded_entries().map(|f| f.id.as_str()).collect()
    }

    /// Clamp every category so `files.len() <= file_count` holds
    pub fn enforce_counts(&mut self) -> usize {
        self.categories.iter_mut().map(|c| c.enforce_count()).sum()
    }
}

/// A page returned by the worker's category pagination command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPage {
    pub files: Vec<FileEntry>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOptions {
    pub move_to_recycle_bin: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            move_to_recycle_bin: true,
        }
    }
}

/// Outcome of a destructive worker call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteReport {
    pub deleted_count: u64,
    pub deleted_size: u64,
    pub failed_count: u64,
    #[serde(default)]
    pub failed_items: Vec<FailedItem>,
}

impl DeleteReport {
    pub fn is_partial(&self) -> bool {
        self.failed_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    #[serde(default)]
    pub id: String,
    pub path: String,
    pub error: String,
}

impl FailedItem {
    /// Whether this failure refers to `entry`, by id or by path
    pub fn matches(&self, entry: &FileEntry) -> bool {
        (!self.id.is_empty() && self.id == entry.id) || self.path == entry.path
    }
}
