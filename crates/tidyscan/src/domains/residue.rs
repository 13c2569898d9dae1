//! Leftovers of uninstalled software: folders, caches, config files and registry keys.
//!
//! Registry keys have no unique filesystem path, so entries are keyed by the
//! worker's item id and deletion is addressed by id as well.

use super::{humanize, DomainOps, WireStatus, Worker};
use crate::error::BackendError;
use crate::ipc::Invoker;
use crate::model::{
    Category, DeleteOptions, DeleteReport, EntryKind, FileEntry, ScanDomain, ScanProgress,
    ScanResult, ScanStatus, SessionId,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const DELETE_ITEMS: &str = "residue_delete";

const REGISTRY_KEY: &str = "registry_key";
const LEFTOVER_FOLDER: &str = "leftover_folder";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidueParams {
    pub include_leftover_folders: bool,
    pub include_registry_keys: bool,
    pub include_cache_files: bool,
    pub include_config_files: bool,
    pub scan_all_drives: bool,
    pub custom_scan_paths: Vec<String>,
}

impl Default for ResidueParams {
    fn default() -> Self {
        Self {
            include_leftover_folders: true,
            include_registry_keys: true,
            include_cache_files: true,
            include_config_files: true,
            scan_all_drives: false,
            custom_scan_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireProgress {
    scan_id: String,
    #[serde(default)]
    percent: f32,
    #[serde(default)]
    current_phase: String,
    #[serde(default)]
    current_path: String,
    #[serde(default)]
    scanned_count: u64,
    #[serde(default)]
    found_count: u64,
    status: Option<WireStatus>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireComplete {
    scan_id: String,
    results: Vec<WireGroup>,
    #[serde(default)]
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
struct WireGroup {
    residue_type: String,
    items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: String,
    #[serde(default)]
    name: String,
    path: String,
    #[serde(default)]
    size: u64,
    residue_type: String,
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    last_modified: i64,
    #[serde(default)]
    safe_to_delete: bool,
}

impl From<WireProgress> for ScanProgress {
    fn from(wire: WireProgress) -> Self {
        ScanProgress {
            session_id: SessionId::from(wire.scan_id),
            // The residue worker only reports status on state changes
            status: wire.status.map_or(ScanStatus::Scanning, Into::into),
            status_reported: wire.status.is_some(),
            current_path: wire.current_path,
            scanned_count: wire.scanned_count,
            found_count: wire.found_count,
            scanned_size: 0,
            total_size: 0,
            percent: wire.percent,
            speed: 0.0,
            phase: (!wire.current_phase.is_empty()).then_some(wire.current_phase),
            message: wire.message,
        }
    }
}

fn entry(item: WireItem) -> FileEntry {
    let kind = match item.residue_type.as_str() {
        REGISTRY_KEY => EntryKind::RegistryKey,
        LEFTOVER_FOLDER => EntryKind::Directory,
        _ => EntryKind::File,
    };
    let name = if item.name.is_empty() {
        crate::model::file_name(&item.path).to_string()
    } else {
        item.name
    };

    FileEntry {
        id: item.id,
        path: item.path,
        name,
        size: item.size,
        modified_time: item.last_modified,
        kind,
        safe_to_delete: item.safe_to_delete,
        detail: (!item.app_name.is_empty()).then_some(item.app_name),
    }
}

fn categories(groups: Vec<WireGroup>) -> Vec<Category> {
    groups
        .into_iter()
        .filter(|group| !group.items.is_empty())
        .map(|group| {
            let display = humanize(&group.residue_type);
            let files = group.items.into_iter().map(entry).collect();
            Category::complete(group.residue_type, display, files)
        })
        .collect()
}

fn residue_type(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::RegistryKey => REGISTRY_KEY,
        EntryKind::Directory => LEFTOVER_FOLDER,
        EntryKind::File => "cache_file",
    }
}

pub struct ResidueOps<I> {
    worker: Worker<I>,
}

impl<I: Invoker> ResidueOps<I> {
    pub fn new(invoker: I) -> Self {
        Self {
            worker: Worker::new(invoker, ScanDomain::SoftwareResidue),
        }
    }
}

#[async_trait]
impl<I: Invoker> DomainOps for ResidueOps<I> {
    type Params = ResidueParams;

    fn domain(&self) -> ScanDomain {
        ScanDomain::SoftwareResidue
    }

    async fn start(&self, params: &ResidueParams) -> Result<SessionId, BackendError> {
        self.worker.start(json!({ "options": params })).await
    }

    async fn pause(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("pause", id).await
    }

    async fn resume(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("resume", id).await
    }

    async fn cancel(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("cancel", id).await
    }

    async fn progress(&self, id: &SessionId) -> Result<Option<ScanProgress>, BackendError> {
        let wire: Option<WireProgress> = self.worker.fetch("progress", id).await?;
        Ok(wire.map(Into::into))
    }

    async fn result(&self, id: &SessionId) -> Result<Option<ScanResult>, BackendError> {
        let groups: Option<Vec<WireGroup>> = self.worker.fetch("result", id).await?;
        Ok(groups.map(|groups| ScanResult::new(id.clone(), categories(groups), 0)))
    }

    async fn clear_result(&self, id: &SessionId) -> Result<(), BackendError> {
        self.worker.control("clear", id).await
    }

    async fn delete(
        &self,
        _session: &SessionId,
        entries: &[FileEntry],
        options: DeleteOptions,
    ) -> Result<DeleteReport, BackendError> {
        let ids: Vec<&str> = entries.iter().map(|e| e.id.as_str()).collect();
        self.worker
            .call(
                DELETE_ITEMS,
                json!({ "itemIds": ids, "moveToRecycleBin": options.move_to_recycle_bin }),
            )
            .await
    }

    fn is_deletable(&self, entry: &FileEntry) -> Result<(), String> {
        if entry.kind == EntryKind::RegistryKey {
            return Err("registry keys cannot be removed".to_string());
        }
        if !entry.safe_to_delete {
            return Err("not marked safe to delete".to_string());
        }
        Ok(())
    }

    fn decode_progress(&self, payload: Value) -> Result<ScanProgress, BackendError> {
        let wire: WireProgress = super::decode(self.domain().progress_channel(), payload)?;
        Ok(wire.into())
    }

    fn decode_result(&self, payload: Value) -> Result<ScanResult, BackendError> {
        let wire: WireComplete = super::decode(self.domain().complete_channel(), payload)?;
        Ok(ScanResult::new(
            wire.scan_id.into(),
            categories(wire.results),
            wire.duration_ms,
        ))
    }
}

pub fn encode_progress(progress: &ScanProgress) -> Value {
    json!({
        "scan_id": progress.session_id,
        "percent": progress.percent,
        "current_phase": progress.phase.clone().unwrap_or_default(),
        "current_path": progress.current_path,
        "scanned_count": progress.scanned_count,
        "found_count": progress.found_count,
        "elapsed_time": 0,
        "status": progress.status_reported.then_some(progress.status),
        "message": progress.message,
    })
}

pub fn encode_result(result: &ScanResult) -> Value {
    let results: Vec<Value> = result
        .categories
        .iter()
        .map(|category| {
            let items: Vec<Value> = category
                .files
                .iter()
                .map(|file| {
                    json!({
                        "id": file.id,
                        "name": file.name,
                        "path": file.path,
                        "size": file.size,
                        "residue_type": residue_type(file.kind),
                        "app_name": file.detail.clone().unwrap_or_default(),
                        "description": "",
                        "last_modified": file.modified_time,
                        "safe_to_delete": file.safe_to_delete,
                        "risk_level": if file.safe_to_delete { "low" } else { "high" },
                    })
                })
                .collect();
            json!({
                "residue_type": category.key,
                "items": items,
                "total_size": category.total_size,
                "count": category.file_count,
            })
        })
        .collect();

    json!({
        "scan_id": result.session_id,
        "results": results,
        "duration_ms": result.duration_ms,
    })
}
